use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use std::net::SocketAddr;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Installs the Prometheus recorder and serves `/metrics` and `/health`
/// on the given address.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or binding the
/// metrics HTTP server fails.
pub async fn start_metrics_server(addr: SocketAddr) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = Router::new()
        .route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
        .route("/health", get(health_handler));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Connection count gauges.
pub mod gauges {
    /// Increment the active sessions gauge.
    pub fn inc_sessions_active() {
        metrics::gauge!("ombud_sessions_active").increment(1.0);
    }

    /// Decrement the active sessions gauge.
    pub fn dec_sessions_active() {
        metrics::gauge!("ombud_sessions_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record an authentication attempt with the given outcome label.
    pub fn auth_total(outcome: &'static str) {
        metrics::counter!("ombud_auth_total", "outcome" => outcome).increment(1);
    }

    /// Increment the relayed-messages counter for the given route.
    pub fn messages_relayed_total(route: &'static str) {
        metrics::counter!("ombud_messages_relayed_total", "route" => route).increment(1);
    }

    /// Increment the automated-replies counter.
    pub fn bot_replies_total() {
        metrics::counter!("ombud_bot_replies_total").increment(1);
    }

    /// Increment the escalated-messages counter.
    pub fn escalations_total() {
        metrics::counter!("ombud_escalations_total").increment(1);
    }

    /// Increment the dropped-messages counter with the given reason label.
    pub fn messages_dropped_total(reason: &'static str) {
        metrics::counter!("ombud_messages_dropped_total", "reason" => reason).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record a relay latency observation in seconds.
    pub fn relay_latency_seconds(value: f64) {
        metrics::histogram!("ombud_relay_latency_seconds").record(value);
    }
}
