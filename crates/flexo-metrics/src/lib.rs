//! ---
//! flx_section: "03-persistence-logging"
//! flx_subsection: "module"
//! flx_type: "source"
//! flx_scope: "code"
//! flx_description: "Metrics collection and export utilities."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the console.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address, with the real port when `:0` was requested.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Counters and gauges maintained by the monitoring session.
#[derive(Clone, Debug)]
pub struct ConsoleMetrics {
    registry: SharedRegistry,
    samples: IntCounterVec,
    sample_errors: IntCounterVec,
    commands: IntCounterVec,
    stop_episodes: IntCounter,
    orders_finished: IntCounter,
    publish_failures: IntCounter,
    line_speed: Gauge,
    relative_quantity: Gauge,
}

impl ConsoleMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let samples = IntCounterVec::new(
            Opts::new("flexo_samples_total", "Samples applied to the session by source"),
            &["source"],
        )?;
        registry.register(Box::new(samples.clone()))?;

        let sample_errors = IntCounterVec::new(
            Opts::new(
                "flexo_sample_errors_total",
                "Failed fetches or publishes by telemetry source",
            ),
            &["source"],
        )?;
        registry.register(Box::new(sample_errors.clone()))?;

        let commands = IntCounterVec::new(
            Opts::new("flexo_commands_total", "Operator commands by outcome"),
            &["command", "outcome"],
        )?;
        registry.register(Box::new(commands.clone()))?;

        let stop_episodes = IntCounter::with_opts(Opts::new(
            "flexo_stop_episodes_total",
            "Stoppages flagged for a reason",
        ))?;
        registry.register(Box::new(stop_episodes.clone()))?;

        let orders_finished = IntCounter::with_opts(Opts::new(
            "flexo_orders_finished_total",
            "Orders archived as finished",
        ))?;
        registry.register(Box::new(orders_finished.clone()))?;

        let publish_failures = IntCounter::with_opts(Opts::new(
            "flexo_completion_publish_failures_total",
            "Completion messages that could not be delivered on first attempt",
        ))?;
        registry.register(Box::new(publish_failures.clone()))?;

        let line_speed = Gauge::with_opts(Opts::new(
            "flexo_line_speed",
            "Latest line speed in units per minute",
        ))?;
        registry.register(Box::new(line_speed.clone()))?;

        let relative_quantity = Gauge::with_opts(Opts::new(
            "flexo_relative_quantity",
            "Quantity produced for the running order",
        ))?;
        registry.register(Box::new(relative_quantity.clone()))?;

        Ok(Self {
            registry,
            samples,
            sample_errors,
            commands,
            stop_episodes,
            orders_finished,
            publish_failures,
            line_speed,
            relative_quantity,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_sample(&self, source: &str, line_speed: f64, relative_quantity: i64) {
        self.samples.with_label_values(&[source]).inc();
        self.line_speed.set(line_speed);
        self.relative_quantity.set(relative_quantity.max(0) as f64);
    }

    pub fn record_sample_error(&self, source: &str) {
        self.sample_errors.with_label_values(&[source]).inc();
    }

    pub fn record_command(&self, command: &str, outcome: &str) {
        self.commands.with_label_values(&[command, outcome]).inc();
    }

    pub fn record_stop_episode(&self) {
        self.stop_episodes.inc();
    }

    pub fn record_order_finished(&self) {
        self.orders_finished.inc();
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = ConsoleMetrics::new(registry.clone()).expect("register");
        metrics.record_command("start", "accepted");
        metrics.record_sample("relay", 120.0, -3);
        assert!(ConsoleMetrics::new(registry.clone()).is_err());

        let names: Vec<_> = registry.gather().iter().map(|f| f.get_name().to_owned()).collect();
        assert!(names.contains(&"flexo_commands_total".to_owned()));
        assert!(names.contains(&"flexo_relative_quantity".to_owned()));
    }

    #[tokio::test]
    async fn scrape_endpoint_serves_registered_metrics() -> Result<()> {
        let registry = new_registry();
        let metrics = ConsoleMetrics::new(registry.clone())?;
        metrics.record_order_finished();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse()?)?;
        let response = reqwest::get(format!("http://{}/metrics", server.addr())).await?;
        assert_eq!(
            response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some(prometheus::TEXT_FORMAT)
        );
        let body = response.text().await?;
        assert!(body.contains("flexo_orders_finished_total 1"));
        server.shutdown().await
    }
}
