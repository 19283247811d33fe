use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use anyhow::Result;
use axum::{Router, routing::get};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider};
use opentelemetry_sdk::metrics::{MetricError, SdkMeterProvider};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;

pub struct Metrics {
    registry: Arc<prometheus::Registry>,
    _provider: SdkMeterProvider,
    pub chain_name: String,

    // Scan metrics
    pub chunks_scanned: Counter<u64>,
    pub events_processed: Counter<u64>,
    pub last_scanned_block: Gauge<u64>,
    pub chunk_size: Gauge<u64>,
    pub chain_head_block: Gauge<u64>,

    // Eligibility metrics
    pub eligible_timestamps: Gauge<u64>,

    // RPC metrics
    pub rpc_requests: Counter<u64>,
    pub rpc_errors: Counter<u64>,
    pub rpc_latency: Histogram<f64>,
}

impl Metrics {
    pub fn new(chain_name: String) -> Result<Self, MetricError> {
        let registry = prometheus::Registry::new();

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        let meter = provider.meter("tip_scanner_metrics");

        let chunks_scanned = meter
            .u64_counter("tip_scanner_chunks_scanned")
            .with_description("Total number of block ranges scanned for reports")
            .build();

        let events_processed = meter
            .u64_counter("tip_scanner_events_processed")
            .with_description("Report events attributed to the tracked account")
            .build();

        let last_scanned_block = meter
            .u64_gauge("tip_scanner_last_scanned_block")
            .with_description("Checkpointed last scanned block")
            .build();

        let chunk_size = meter
            .u64_gauge("tip_scanner_chunk_size")
            .with_description("Current adaptive log query chunk size in blocks")
            .build();

        let chain_head_block = meter
            .u64_gauge("tip_scanner_chain_head_block")
            .with_description("Latest block number on chain")
            .build();

        let eligible_timestamps = meter
            .u64_gauge("tip_scanner_eligible_timestamps")
            .with_description("Timestamps currently eligible for a tip claim")
            .build();

        let rpc_requests = meter
            .u64_counter("tip_scanner_rpc_requests")
            .with_description("Number of RPC requests made")
            .build();

        let rpc_errors = meter
            .u64_counter("tip_scanner_rpc_errors")
            .with_description("Number of RPC errors encountered")
            .build();

        let rpc_latency = meter
            .f64_histogram("tip_scanner_rpc_latency")
            .with_description("RPC request latency")
            .with_boundaries(vec![
                0.025, 0.05, 0.075, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 5.0, 10.0, 30.0,
            ])
            .with_unit("s")
            .build();

        Ok(Self {
            registry: Arc::new(registry),
            _provider: provider,
            chain_name,
            chunks_scanned,
            events_processed,
            last_scanned_block,
            chunk_size,
            chain_head_block,
            eligible_timestamps,
            rpc_requests,
            rpc_errors,
            rpc_latency,
        })
    }

    pub fn chain_label(&self) -> [KeyValue; 1] {
        [KeyValue::new("chain", self.chain_name.clone())]
    }

    /// Records one RPC round trip started at `start`.
    pub fn record_rpc(&self, method: &'static str, start: Instant, is_error: bool) {
        let labels = [
            KeyValue::new("chain", self.chain_name.clone()),
            KeyValue::new("method", method),
        ];
        self.rpc_requests.add(1, &labels);
        self.rpc_latency
            .record(start.elapsed().as_secs_f64(), &labels);
        if is_error {
            self.rpc_errors.add(1, &labels);
        }
    }

    pub async fn start_metrics_server(&self, addr: &str, port: u16) -> Result<()> {
        let addr = format!("{addr}:{port}").parse::<SocketAddr>()?;
        let registry = self.registry.clone();

        let app = Router::new().route("/metrics", get(move || metrics_handler(registry.clone())));

        // Only used for logging
        let access_url = if addr.ip().is_unspecified() {
            format!("http://localhost:{port}/metrics")
        } else {
            format!("http://{}:{port}/metrics", addr.ip())
        };

        info!(
            "Starting metrics server - binding to {} (accessible at {})",
            addr, access_url
        );

        let listener = tokio::net::TcpListener::bind(addr).await?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Metrics server stopped: {}", e);
            }
        });

        Ok(())
    }
}

async fn metrics_handler(registry: Arc<prometheus::Registry>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
