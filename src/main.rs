use alloy_provider::ProviderBuilder;
use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{self, EnvFilter};
use url::Url;

use tip_scanner::metrics::Metrics;
use tip_scanner::multicall::Multicall3Client;
use tip_scanner::scanner::logs::RpcLogSource;
use tip_scanner::scanner::{EventScanner, ScanStart, ScannerConfig, run_scan};
use tip_scanner::state::ScanState;
use tip_scanner::state::explorer::ExplorerLookup;
use tip_scanner::tips::TipEligibilityEngine;
use tip_scanner::tips::claims::{CalldataLogger, ClaimSubmitter, feed_tip_claims, one_time_tip_claims};
use tip_scanner::tips::output::{write_feed_tips, write_single_tips};
use tip_scanner::utils::{load_config, now_unix};

const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match load_config(&config_path) {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    // Unknown chains stop here
    let network = config.network()?.clone();
    info!(
        "Chain: {} ({}), oracle: {}, autopay: {}, account: {}",
        network.name, network.chain_id, network.oracle, network.autopay, config.account
    );

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new(network.name.clone())?);
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    // Create RPC provider
    let rpc_url: Url = config.rpc_url.parse().context("invalid rpc_url")?;
    let provider = ProviderBuilder::new().connect_http(rpc_url);

    println!();
    info!("=========================== SCANNING ===========================");

    let source = RpcLogSource::new(provider.clone(), network.oracle).with_metrics(metrics.clone());
    let scanner = EventScanner::new(source, config.account, ScannerConfig::from(&config.scanner))
        .with_metrics(metrics.clone());
    let mut state = ScanState::new(&config.state_file, &network.name, config.account)
        .with_flush_interval(config.scanner.flush_interval_seconds);

    let lookup;
    let start = match config.start_block {
        Some(block) => ScanStart::Block(block),
        None => {
            lookup = ExplorerLookup::from_network(&network)?;
            ScanStart::Resume(&lookup)
        }
    };
    let summary = run_scan(&scanner, &mut state, start).await?;
    info!(
        "Scanned blocks {} - {}: {} report events, {} new, in {} chunks",
        summary.start_block,
        summary.end_block,
        summary.processed.len(),
        summary.new_reports,
        summary.chunks
    );

    println!();
    info!("=========================== ELIGIBILITY ===========================");

    let client = Multicall3Client::new(provider, network.multicall).with_metrics(metrics.clone());
    let engine = TipEligibilityEngine::new(client, network.autopay, config.eligibility.clone())
        .with_query_data_storage(network.query_data_storage)
        .with_metrics(metrics);

    let ledger = state.serve();
    let now = now_unix();
    let output_dir = Path::new(&config.output_dir);
    let submitter = CalldataLogger;

    match engine.one_time_tips(ledger.as_ref(), now).await? {
        Some(one_time) => {
            write_single_tips(output_dir, &one_time)?;
            if one_time.is_empty() {
                info!("No eligible one-time tip timestamps for {}", config.account);
            } else {
                let handed_off = submitter
                    .submit(one_time_tip_claims(network.autopay, &one_time))
                    .await?;
                info!("Prepared {} one-time tip claims", handed_off);
            }
        }
        None => info!("No ledger for {} on {}", config.account, network.name),
    }

    if let Some(feed_tips) = engine.feed_tips(ledger.as_ref(), now).await? {
        write_feed_tips(output_dir, &feed_tips)?;
        if feed_tips.claim_params.is_empty() {
            info!("No eligible feed tip timestamps for {}", config.account);
        } else {
            let handed_off = submitter
                .submit(feed_tip_claims(network.autopay, &feed_tips.claim_params))
                .await?;
            info!("Prepared {} feed tip claims", handed_off);
        }
    }

    Ok(())
}
