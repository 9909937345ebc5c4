use std::net::SocketAddr;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use herd_prometheus::MonitorMetrics;

pub fn router(metrics: MonitorMetrics) -> Router {
    Router::new().route("/metrics", get(exposition)).with_state(metrics)
}

/// GET /metrics
async fn exposition(State(metrics): State<MonitorMetrics>) -> impl IntoResponse {
    match metrics.encode_text() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Bind `addr` and serve `/metrics` until `shutdown` fires.
pub async fn serve(addr: SocketAddr, metrics: MonitorMetrics, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving metrics");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposes_counters_as_text() {
        let metrics = MonitorMetrics::new().unwrap();
        metrics.status_transition("COMPLETED");

        let response = exposition(State(metrics)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"herd_status_transitions_total{status="COMPLETED"} 1"#));
    }
}
