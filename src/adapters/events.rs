//! Kubernetes Events published about managed resources

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, Recorder, Reporter};
use kube::Client;

use crate::error::Result;

/// Destination for Events about a managed resource
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, regarding: &ObjectReference, event: Event) -> Result<()>;
}

/// [`EventSink`] writing `events.k8s.io` Events through the API server
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    /// `controller` shows up as the reporting controller on every Event
    pub fn new(client: Client, controller: impl Into<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.into(),
                instance: std::env::var("HOSTNAME").ok(),
            },
        }
    }
}

#[async_trait]
impl EventSink for KubeEventRecorder {
    async fn publish(&self, regarding: &ObjectReference, event: Event) -> Result<()> {
        Recorder::new(self.client.clone(), self.reporter.clone(), regarding.clone())
            .publish(event)
            .await?;
        Ok(())
    }
}
