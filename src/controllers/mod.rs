//! Kubernetes controller loop around an [`Engine`]
//!
//! Watches the managed kind plus every kind the steps registered during
//! setup. Events on owned objects pass through the step's predicate before
//! they trigger a reconcile of the owner.

use std::sync::Arc;
use std::time::Duration;

use futures::{future, Stream, StreamExt};
use kube::{
    api::{DynamicObject, ListParams},
    discovery::{self, Scope},
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
    },
    Api, Client, Resource, ResourceExt,
};
use kube_runtime::watcher::{self, watcher, Config as WatcherConfig};
use tracing::{error, info, instrument, warn};

use crate::core::Engine;
use crate::crd::ManagedResource;
use crate::error::{Error, Result};
use crate::metrics;
use crate::predicates::{All, EventFilter, Predicate, UpdateDebug};

/// Shared state of one controller
pub struct Context<K: ManagedResource> {
    pub engine: Arc<Engine<K>>,
}

/// Run the controller for `K` until a shutdown signal arrives.
///
/// With a namespace set, only that namespace is watched.
pub async fn run<K>(client: Client, engine: Arc<Engine<K>>, namespace: Option<String>) -> Result<()>
where
    K: ManagedResource + Resource<Scope = k8s_openapi::NamespaceResourceScope>,
{
    let kind = K::kind(&()).to_string();
    let api: Api<K> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    // Verify CRD is installed
    if let Err(e) = api.list(&ListParams::default().limit(1)).await {
        error!("{} CRD not installed: {}", kind, e);
        return Err(e.into());
    }

    let registrar = engine.setup().await?;
    let update_debug = UpdateDebug::from_env();
    let mut controller = Controller::new(api, WatcherConfig::default());
    for watch in registrar.watches() {
        let (resource, caps) = discovery::pinned_kind(&client, &watch.gvk)
            .await
            .map_err(|e| Error::discovery(format!("{}/{}: {}", watch.gvk.group, watch.gvk.kind, e)))?;
        let owned: Api<DynamicObject> = match (&caps.scope, &namespace) {
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client.clone(), ns, &resource),
            _ => Api::all_with(client.clone(), &resource),
        };
        info!(controller = %engine.name(), kind = %watch.gvk.kind, "Watching owned kind");
        let predicate = with_update_debug(watch.predicate.clone(), update_debug);
        controller = controller.owns_stream_with(filtered_watch(owned, predicate), resource);
    }

    info!(controller = %engine.name(), steps = ?engine.step_names().collect::<Vec<_>>(), "Starting {} controller", kind);

    let context = Arc::new(Context { engine });
    controller
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, context.clone())
        .for_each(|result| {
            let name = context.engine.name().to_string();
            async move {
                match result {
                    Ok((obj, _action)) => {
                        info!(
                            name = %obj.name,
                            namespace = obj.namespace.as_deref().unwrap_or("default"),
                            "Reconciled"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                        metrics::RECONCILIATION_ERRORS.with_label_values(&[name.as_str()]).inc();
                    }
                }
            }
        })
        .await;

    Ok(())
}

fn with_update_debug(
    predicate: Option<Arc<dyn Predicate>>,
    update_debug: UpdateDebug,
) -> Option<Arc<dyn Predicate>> {
    if !update_debug.enabled() {
        return predicate;
    }
    let debug: Arc<dyn Predicate> = Arc::new(update_debug);
    Some(match predicate {
        Some(p) => Arc::new(All(vec![debug, p])),
        None => debug,
    })
}

/// Watch stream of owned objects that only yields events the predicate accepts
fn filtered_watch(
    api: Api<DynamicObject>,
    predicate: Option<Arc<dyn Predicate>>,
) -> impl Stream<Item = std::result::Result<DynamicObject, watcher::Error>> + Send + 'static {
    let mut filter = EventFilter::new(predicate);
    watcher(api, WatcherConfig::default()).filter_map(move |event| {
        let passed = match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                filter.on_apply(obj).map(Ok)
            }
            Ok(watcher::Event::Delete(obj)) => filter.on_delete(obj).map(Ok),
            Ok(watcher::Event::Init) => {
                filter.on_relist_start();
                None
            }
            Ok(watcher::Event::InitDone) => {
                filter.on_relist_done();
                None
            }
            Err(e) => Some(Err(e)),
        };
        future::ready(passed)
    })
}

#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile<K>(obj: Arc<K>, ctx: Arc<Context<K>>) -> Result<Action>
where
    K: ManagedResource,
{
    let controller = ctx.engine.name();
    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[controller])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[controller]).inc();

    let outcome = ctx.engine.reconcile(&ObjectRef::from_obj(obj.as_ref())).await;
    if let Some(e) = &outcome.error {
        warn!(error = %e, requeue = outcome.result.requeue, "Reconcile pass finished with errors");
    }
    outcome.into_result().map(|result| result.to_action())
}

fn error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<Context<K>>) -> Action
where
    K: ManagedResource,
{
    error!(
        name = %obj.name_any(),
        error = %error,
        "Reconciliation failed, scheduling retry"
    );

    Action::requeue(retry_delay(error))
}

/// Back off longer for errors that need a spec change to go away
fn retry_delay(error: &Error) -> Duration {
    match error {
        Error::Validation(_) | Error::Render(_) => Duration::from_secs(300),
        Error::Discovery(_) => Duration::from_secs(60),
        Error::Step { source, .. } | Error::Patch { source, .. } | Error::WithResult { source, .. } => {
            retry_delay(source)
        }
        Error::Aggregate(errors) => errors
            .iter()
            .map(retry_delay)
            .min()
            .unwrap_or(Duration::from_secs(30)),
        _ => Duration::from_secs(30),
    }
}
