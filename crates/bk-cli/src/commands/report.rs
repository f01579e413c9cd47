use std::path::Path;

use anyhow::Context;
use bk_telemetry::metrics::MetricsCollector;
use tracing::info;

/// Emit the run's metrics: a JSON summary event when logging JSON, and a
/// Prometheus textfile when `metrics_file` is set.
pub async fn report_metrics(
    metrics: &MetricsCollector,
    metrics_file: Option<&Path>,
    json_logs: bool,
) -> anyhow::Result<()> {
    if json_logs {
        info!(metrics = %metrics.export_json(), "run metrics");
    }
    if let Some(path) = metrics_file {
        tokio::fs::write(path, metrics.export_prometheus())
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    Ok(())
}
