//! Metrics HTTP server.
//!
//! Serves bridge statistics in Prometheus text format at `/metrics` and as
//! JSON at `/stats`.

use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use tokio::net::TcpListener;
use tracing::info;

use crate::stats::{BridgeStats, StatsSummary};

/// Build the router. Split out so tests can drive it without a socket.
pub fn router(stats: Arc<BridgeStats>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .with_state(stats)
}

/// Start the metrics HTTP server.
///
/// Runs until the process exits. Returns an error if the port cannot be
/// bound.
pub async fn start_metrics_server(
    port: u16,
    stats: Arc<BridgeStats>,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(stats))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler(State(stats): State<Arc<BridgeStats>>) -> impl IntoResponse {
    let output = format_prometheus_metrics(&stats.summary());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        output,
    )
}

async fn stats_handler(State(stats): State<Arc<BridgeStats>>) -> impl IntoResponse {
    match serde_json::to_string(&stats.summary()) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string(),
        ),
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {} {}", name, help);
    let _ = writeln!(output, "# TYPE {} counter", name);
    let _ = writeln!(output, "{} {}", name, value);
}

/// Format a summary as Prometheus text.
fn format_prometheus_metrics(summary: &StatsSummary) -> String {
    let mut output = String::with_capacity(4096);

    output.push_str("# HELP wtbridge_uptime_seconds Time since the bridge started\n");
    output.push_str("# TYPE wtbridge_uptime_seconds gauge\n");
    let _ = writeln!(output, "wtbridge_uptime_seconds {:.3}", summary.elapsed_secs);

    output.push_str("# HELP wtbridge_spots_relayed_total Spots broadcast to WinTest\n");
    output.push_str("# TYPE wtbridge_spots_relayed_total counter\n");
    for (source, count) in &summary.spots_by_source {
        let _ = writeln!(
            output,
            "wtbridge_spots_relayed_total{{source=\"{}\"}} {}",
            source, count
        );
    }
    if summary.spots_by_source.is_empty() {
        let _ = writeln!(output, "wtbridge_spots_relayed_total {}", summary.spots_relayed);
    }

    counter(
        &mut output,
        "wtbridge_spots_suppressed_total",
        "Spots dropped by the digital mode filter",
        summary.spots_suppressed,
    );
    counter(
        &mut output,
        "wtbridge_non_spot_lines_total",
        "Session lines that were not spots",
        summary.non_spot_lines,
    );
    counter(
        &mut output,
        "wtbridge_bytes_received_total",
        "Bytes received from the cluster and skimmer",
        summary.bytes_received,
    );
    counter(
        &mut output,
        "wtbridge_udp_send_failures_total",
        "UDP frames that could not be sent",
        summary.send_failures,
    );
    counter(
        &mut output,
        "wtbridge_frames_received_total",
        "Datagrams received from WinTest",
        summary.frames_received,
    );
    counter(
        &mut output,
        "wtbridge_decode_failures_total",
        "Datagrams that failed to decode",
        summary.decode_failures,
    );
    counter(
        &mut output,
        "wtbridge_skimmer_qsy_total",
        "Band changes sent to the skimmer",
        summary.qsy_commands,
    );
    counter(
        &mut output,
        "wtbridge_cluster_commands_total",
        "Commands forwarded to the cluster",
        summary.forwarded_commands,
    );
    counter(
        &mut output,
        "wtbridge_cat_commands_total",
        "CAT commands sent to the radio",
        summary.cat_commands,
    );
    counter(
        &mut output,
        "wtbridge_reconnects_total",
        "Session reconnect attempts",
        summary.reconnects,
    );

    output.push_str("# HELP wtbridge_spots_per_second Spot relay rate\n");
    output.push_str("# TYPE wtbridge_spots_per_second gauge\n");
    let _ = writeln!(output, "wtbridge_spots_per_second {:.3}", summary.spots_per_second);

    if let Some(ref sizes) = summary.frame_size_percentiles {
        output.push_str("# HELP wtbridge_frame_bytes Outbound frame size distribution\n");
        output.push_str("# TYPE wtbridge_frame_bytes summary\n");
        let _ = writeln!(output, "wtbridge_frame_bytes{{quantile=\"0.5\"}} {}", sizes.p50);
        let _ = writeln!(output, "wtbridge_frame_bytes{{quantile=\"0.9\"}} {}", sizes.p90);
        let _ = writeln!(output, "wtbridge_frame_bytes{{quantile=\"0.99\"}} {}", sizes.p99);
        let _ = writeln!(output, "wtbridge_frame_bytes_count {}", summary.spots_relayed);
    }

    output
}
