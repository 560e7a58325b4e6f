use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::info;

/// Start the Prometheus exporter with its own HTTP listener on `port`
pub fn start_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        // Buckets: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
        .set_buckets_for_metric(
            Matcher::Full("subscriber.delivery.duration_ms".to_string()),
            &[
                1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
            ],
        )
        .context("Failed to set buckets for subscriber.delivery.duration_ms")?
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus recorder")?;

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

const PROCESS_METRICS_INTERVAL: Duration = Duration::from_secs(5);

/// Publishes uptime and resident memory until the runtime shuts down.
pub async fn process_metrics_task() {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(PROCESS_METRICS_INTERVAL);

    loop {
        ticker.tick().await;
        metrics::gauge!("process.uptime.seconds").set(started.elapsed().as_secs_f64());
        metrics::gauge!("process.is_up").set(1.0);
        if let Some(bytes) = resident_memory_bytes() {
            metrics::gauge!("process.memory.bytes").set(bytes);
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> Option<f64> {
    None
}

/// `VmRSS` from `/proc/self/status`, converted from kB to bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_rss(status: &str) -> Option<f64> {
    let kb = status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))?
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()?;
    Some(kb * 1024.0)
}

/// Initialize subscriber metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_subscriber_metrics() {
    // Delivery outcomes
    metrics::counter!("subscriber.delivery.success").absolute(0);
    metrics::counter!("subscriber.delivery.decode_failure").absolute(0);
    metrics::counter!("subscriber.delivery.processing_failure").absolute(0);

    // Terminal calls
    metrics::counter!("subscriber.delivery.acked").absolute(0);
    metrics::counter!("subscriber.delivery.nacked").absolute(0);
    metrics::counter!("subscriber.delivery.exhausted").absolute(0);
    metrics::counter!("subscriber.delivery.ack_error").absolute(0);

    // Transport
    metrics::counter!("subscriber.receive_error").absolute(0);
    metrics::counter!("subscriber.worker_failed").absolute(0);
    metrics::counter!("subscriber.connection.failed").absolute(0);
    metrics::counter!("subscriber.consumer_setup.failed").absolute(0);
    metrics::gauge!("subscriber.connection.connected").set(0.0);
}
