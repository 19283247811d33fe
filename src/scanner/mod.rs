pub mod logs;

use alloy_primitives::{Address, B256};
use alloy_sol_types::SolEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use crate::metrics::Metrics;
use crate::models::common::ScannerSettings;
use crate::models::errors::{LogFetchError, ScanError};
use crate::models::events::{NewReport, ReportEvent};
use crate::scanner::logs::LogSource;
use crate::state::{ScanState, StartBlockLookup};
use crate::utils::now_unix;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub start_chunk_size: u64,
    pub chunk_size_increase: u64,
    pub max_request_retries: u32,
    pub request_retry_delay: Duration,
    pub reorg_safety_margin: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self::from(&ScannerSettings::default())
    }
}

impl From<&ScannerSettings> for ScannerConfig {
    fn from(settings: &ScannerSettings) -> Self {
        Self {
            min_chunk_size: settings.min_chunk_size,
            max_chunk_size: settings.max_chunk_size.max(settings.min_chunk_size),
            start_chunk_size: settings.start_chunk_size,
            chunk_size_increase: 2,
            max_request_retries: settings.max_request_retries,
            request_retry_delay: Duration::from_secs_f64(settings.request_retry_seconds.max(0.0)),
            reorg_safety_margin: settings.reorg_safety_margin,
        }
    }
}

/// Outcome of one scanned chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkScan {
    /// Last block actually covered, which may be short of the requested end after retries.
    pub end_block: u64,
    pub processed: Vec<String>,
    pub new_reports: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    /// Correlation keys (`txHash-logIndex`) of every report ingested.
    pub processed: Vec<String>,
    /// Reports that were not already in the ledger.
    pub new_reports: usize,
    pub chunks: u64,
    pub start_block: u64,
    pub end_block: u64,
    pub duration: Duration,
}

/// Walks the oracle's logs for one reporter in increasing block order, growing the query
/// range over empty stretches and shrinking it back as soon as reports show up.
pub struct EventScanner<L> {
    source: L,
    account: Address,
    event_signatures: Vec<B256>,
    config: ScannerConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<L: LogSource> EventScanner<L> {
    pub fn new(source: L, account: Address, config: ScannerConfig) -> Self {
        Self {
            source,
            account,
            event_signatures: vec![NewReport::SIGNATURE_HASH],
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Resume point: the checkpoint minus the reorg margin, never below block 1.
    pub fn suggested_start_block(&self, state: &ScanState) -> Option<u64> {
        state
            .last_scanned_block()
            .map(|block| block.saturating_sub(self.config.reorg_safety_margin).max(1))
    }

    /// The head block may still be replaced, so scanning stops one short of it.
    pub async fn suggested_end_block(&self) -> Result<u64, ScanError> {
        let head = self.source.block_number().await?;
        if let Some(metrics) = &self.metrics {
            metrics.chain_head_block.record(head, &metrics.chain_label());
        }
        Ok(head.saturating_sub(1))
    }

    pub fn next_chunk_size(&self, current_chunk_size: u64, events_found: usize) -> u64 {
        let next = if events_found > 0 {
            self.config.min_chunk_size
        } else {
            current_chunk_size.saturating_mul(self.config.chunk_size_increase)
        };
        next.clamp(self.config.min_chunk_size, self.config.max_chunk_size)
    }

    /// Fetches one range, halving it after every transient failure. Returns the end block
    /// that was actually covered along with the events.
    async fn fetch_with_retry(
        &self,
        event_signature: B256,
        start_block: u64,
        mut end_block: u64,
    ) -> Result<(u64, Vec<ReportEvent>), ScanError> {
        let attempts = self.config.max_request_retries.max(1);

        for attempt in 1..=attempts {
            match self.source.get_logs(event_signature, start_block, end_block).await {
                Ok(events) => return Ok((end_block, events)),
                Err(e) if !e.is_transient() => return Err(e.into()),
                Err(e) if attempt < attempts => {
                    warn!(
                        "Retrying events for block range {} - {} ({}) failed with {}, retrying in {:?}",
                        start_block,
                        end_block,
                        end_block - start_block,
                        e,
                        self.config.request_retry_delay
                    );
                    end_block = start_block + (end_block - start_block) / 2;
                    sleep(self.config.request_retry_delay).await;
                }
                Err(e) => {
                    warn!("Out of retries for block range {} - {}", start_block, end_block);
                    return Err(ScanError::RetriesExhausted {
                        from: start_block,
                        to: end_block,
                        attempts,
                        source: e,
                    });
                }
            }
        }

        Err(ScanError::RetriesExhausted {
            from: start_block,
            to: end_block,
            attempts,
            source: LogFetchError::Provider("no attempts made".to_string()),
        })
    }

    /// Scans every tracked event type over one chunk. All types must complete before the
    /// chunk counts as scanned; a shrunken range carries over to the remaining types.
    /// Nothing is recorded unless every fetched log is final.
    pub async fn scan_chunk(
        &self,
        state: &mut ScanState,
        start_block: u64,
        end_block: u64,
    ) -> Result<ChunkScan, ScanError> {
        let mut end_block = end_block;
        let mut fetched = Vec::new();

        for event_signature in &self.event_signatures {
            let (covered_end, events) = self
                .fetch_with_retry(*event_signature, start_block, end_block)
                .await?;
            end_block = covered_end;
            fetched.extend(events);
        }

        if let Some(pending) = fetched.iter().find(|event| event.log_index.is_none()) {
            return Err(ScanError::PendingLog {
                tx_hash: pending
                    .tx_hash
                    .map(|hash| hash.to_string())
                    .unwrap_or_else(|| "<unknown>".to_string()),
            });
        }

        let mut chunk = ChunkScan {
            end_block,
            ..Default::default()
        };
        for event in fetched {
            if event.removed {
                debug!("Skipping removed log {:?}", event.correlation_key());
                continue;
            }
            if event.reporter != self.account {
                continue;
            }

            debug!(
                "Processing report for {} at {}, block: {:?}",
                event.query_id, event.timestamp, event.block_number
            );
            if state.process_event(&event) {
                chunk.new_reports += 1;
            }
            if let Some(key) = event.correlation_key() {
                chunk.processed.push(key);
            }
        }

        Ok(chunk)
    }

    /// Scans `[start_block, end_block]`, checkpointing after every chunk and saving the
    /// state unconditionally at the end.
    pub async fn scan(
        &self,
        state: &mut ScanState,
        start_block: u64,
        end_block: u64,
    ) -> Result<ScanSummary, ScanError> {
        if start_block > end_block {
            return Err(ScanError::InvalidRange {
                start: start_block,
                end: end_block,
            });
        }

        let started = Instant::now();
        let mut current_block = start_block;
        let mut chunk_size = self
            .config
            .start_chunk_size
            .clamp(self.config.min_chunk_size, self.config.max_chunk_size);
        let mut total_chunks = 0;
        let mut all_processed = Vec::new();
        let mut new_reports = 0;
        let mut last_scan_duration = Duration::ZERO;
        let mut last_logs_found = 0;

        while current_block <= end_block {
            let estimated_end_block = current_block.saturating_add(chunk_size).min(end_block);
            debug!(
                "Scanning reports for blocks: {} - {}, chunk size {}, last chunk scan took {:?}, last logs found {}",
                current_block, estimated_end_block, chunk_size, last_scan_duration, last_logs_found
            );

            let chunk_started = Instant::now();
            let chunk = self
                .scan_chunk(state, current_block, estimated_end_block)
                .await?;
            let current_end = chunk.end_block.min(end_block);

            last_scan_duration = chunk_started.elapsed();
            last_logs_found = chunk.processed.len();
            chunk_size = self.next_chunk_size(chunk_size, last_logs_found);
            all_processed.extend(chunk.processed);
            new_reports += chunk.new_reports;
            total_chunks += 1;

            state.end_chunk(current_end, now_unix())?;

            if let Some(metrics) = &self.metrics {
                let labels = metrics.chain_label();
                metrics.chunks_scanned.add(1, &labels);
                metrics.events_processed.add(last_logs_found as u64, &labels);
                metrics.last_scanned_block.record(current_end, &labels);
                metrics.chunk_size.record(chunk_size, &labels);
            }

            current_block = current_end + 1;
        }

        state.save(now_unix())?;

        Ok(ScanSummary {
            processed: all_processed,
            new_reports,
            chunks: total_chunks,
            start_block,
            end_block,
            duration: started.elapsed(),
        })
    }
}

/// Where a run begins: an explicit block, or wherever the saved state left off.
pub enum ScanStart<'a> {
    Block(u64),
    /// Resume from the state file; the lookup seeds accounts that have no state yet.
    Resume(&'a dyn StartBlockLookup),
}

/// Restores (or resets) the state, scans from the checkpoint to just below the chain head,
/// and saves. Completed chunks are flushed even when the scan fails part way.
pub async fn run_scan<L: LogSource>(
    scanner: &EventScanner<L>,
    state: &mut ScanState,
    start: ScanStart<'_>,
) -> Result<ScanSummary, ScanError> {
    let start_block = match start {
        ScanStart::Block(block) => {
            state.start_at(block);
            block
        }
        ScanStart::Resume(lookup) => {
            state.restore(lookup).await?;
            scanner.suggested_start_block(state).unwrap_or(1)
        }
    };
    let end_block = scanner.suggested_end_block().await?;

    if start_block > end_block {
        info!(
            "Nothing to scan: start block {} is past the last mined block {}",
            start_block, end_block
        );
        state.save(now_unix())?;
        return Ok(ScanSummary {
            start_block,
            end_block,
            ..Default::default()
        });
    }

    info!("Scanning events from blocks {} - {}", start_block, end_block);

    match scanner.scan(state, start_block, end_block).await {
        Ok(summary) => {
            info!(
                "Scanned total {} report events ({} new), in {:.2} seconds, total {} chunk scans performed",
                summary.processed.len(),
                summary.new_reports,
                summary.duration.as_secs_f64(),
                summary.chunks
            );
            Ok(summary)
        }
        Err(e) => {
            error!("Scan failed: {}", e);
            if let Err(save_error) = state.save(now_unix()) {
                error!("Failed to save scan state after failure: {}", save_error);
            }
            Err(e)
        }
    }
}
