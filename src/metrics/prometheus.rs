//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Reconcile passes started
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "controller_steps_reconciliations_total",
        "Total number of reconcile passes",
        &["controller"]
    ).unwrap();

    /// Reconcile passes that returned an error
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "controller_steps_reconciliation_errors_total",
        "Total number of failed reconcile passes",
        &["controller"]
    ).unwrap();

    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "controller_steps_reconcile_duration_seconds",
        "Duration of reconcile passes in seconds",
        &["controller"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    /// Errors returned by individual steps
    pub static ref STEP_ERRORS: CounterVec = register_counter_vec!(
        "controller_steps_step_errors_total",
        "Total number of step errors",
        &["controller", "step"]
    ).unwrap();

    /// Finalizers released after cleanup completed
    pub static ref FINALIZATIONS: CounterVec = register_counter_vec!(
        "controller_steps_finalizations_total",
        "Total number of completed step finalizations",
        &["controller", "step"]
    ).unwrap();

    /// Passes skipped because of the skip-reconcile annotation
    pub static ref SKIPPED_RECONCILES: CounterVec = register_counter_vec!(
        "controller_steps_skipped_reconciles_total",
        "Total number of reconcile passes skipped by annotation",
        &["controller"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: Gauge = register_gauge!(
        "controller_steps_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => text(StatusCode::OK, "ok"),
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return text(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = text(StatusCode::OK, buffer);
    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}

/// Healthy unless the health gauge was dropped to zero
fn health_response() -> Response<Full<Bytes>> {
    if OPERATOR_HEALTH.get() > 0.0 {
        text(StatusCode::OK, "ok")
    } else {
        text(StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    }
}
