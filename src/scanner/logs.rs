use alloy_primitives::{Address, B256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::Filter;
use alloy_transport::{RpcError, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::metrics::Metrics;
use crate::models::errors::LogFetchError;
use crate::models::events::ReportEvent;
use crate::utils::retry::{RetryConfig, retry};

/// Remote source of decoded report logs.
#[async_trait]
pub trait LogSource: Send + Sync {
    /// Logs matching `event_signature` emitted by the watched contract in
    /// `[from_block, to_block]`, decoded at this boundary.
    async fn get_logs(
        &self,
        event_signature: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ReportEvent>, LogFetchError>;

    /// Current chain head.
    async fn block_number(&self) -> Result<u64, LogFetchError>;
}

// Substrings nodes and hosted providers use when refusing an `eth_getLogs` range
const RANGE_HINTS: [&str; 7] = [
    "block range",
    "range too large",
    "too many",
    "query returned more than",
    "response size",
    "limit exceeded",
    "exceed",
];

const LIMIT_EXCEEDED_CODE: i64 = -32005;

/// Classifies a JSON-RPC error response so the scanner can tell oversized ranges apart.
pub fn classify_error_response(code: i64, message: &str) -> LogFetchError {
    let lowered = message.to_lowercase();
    if code == LIMIT_EXCEEDED_CODE || RANGE_HINTS.iter().any(|hint| lowered.contains(hint)) {
        LogFetchError::RangeTooLarge(format!("{message} (code {code})"))
    } else if lowered.contains("timeout") || lowered.contains("timed out") {
        LogFetchError::Timeout(format!("{message} (code {code})"))
    } else {
        LogFetchError::Provider(format!("{message} (code {code})"))
    }
}

fn classify_transport_error(error: &TransportError) -> LogFetchError {
    match error {
        RpcError::ErrorResp(payload) => classify_error_response(payload.code, &payload.message),
        RpcError::Transport(kind) => {
            let message = kind.to_string();
            let lowered = message.to_lowercase();
            if lowered.contains("timed out") || lowered.contains("timeout") {
                LogFetchError::Timeout(message)
            } else {
                LogFetchError::Provider(message)
            }
        }
        other => LogFetchError::Provider(other.to_string()),
    }
}

/// `eth_getLogs` against a single oracle contract over an alloy provider.
pub struct RpcLogSource<P> {
    provider: P,
    contract: Address,
    metrics: Option<Arc<Metrics>>,
    head_retry: RetryConfig,
}

impl<P> RpcLogSource<P>
where
    P: Provider + Send + Sync,
{
    pub fn new(provider: P, contract: Address) -> Self {
        Self {
            provider,
            contract,
            metrics: None,
            head_retry: RetryConfig::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }
}

#[async_trait]
impl<P> LogSource for RpcLogSource<P>
where
    P: Provider + Send + Sync,
{
    async fn get_logs(
        &self,
        event_signature: B256,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ReportEvent>, LogFetchError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(event_signature)
            .from_block(from_block)
            .to_block(to_block);

        debug!(
            "Querying eth_getLogs for {} in blocks {} - {}",
            self.contract, from_block, to_block
        );

        let start = Instant::now();
        let result = self.provider.get_logs(&filter).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_rpc("get_logs", start, result.is_err());
        }

        let logs = result.map_err(|e| {
            warn!("Failed to get logs for blocks {} - {}: {}", from_block, to_block, e);
            classify_transport_error(&e)
        })?;

        logs.iter().map(ReportEvent::from_log).collect()
    }

    async fn block_number(&self) -> Result<u64, LogFetchError> {
        retry(
            || async {
                let start = Instant::now();
                let result = self.provider.get_block_number().await;

                if let Some(metrics) = &self.metrics {
                    metrics.record_rpc("get_block_number", start, result.is_err());
                }

                result.map_err(|e| classify_transport_error(&e))
            },
            &self.head_retry,
            "get_block_number",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_range_errors() {
        assert!(matches!(
            classify_error_response(-32005, "query returned more than 10000 results"),
            LogFetchError::RangeTooLarge(_)
        ));
        assert!(matches!(
            classify_error_response(-32000, "eth_getLogs block range is too large, max 3500"),
            LogFetchError::RangeTooLarge(_)
        ));
        assert!(matches!(
            classify_error_response(-32000, "request timed out"),
            LogFetchError::Timeout(_)
        ));
        assert!(matches!(
            classify_error_response(-32000, "header not found"),
            LogFetchError::Provider(_)
        ));
    }

    #[test]
    fn test_only_decode_errors_are_permanent() {
        assert!(LogFetchError::RangeTooLarge(String::new()).is_transient());
        assert!(LogFetchError::Timeout(String::new()).is_transient());
        assert!(LogFetchError::Provider(String::new()).is_transient());
        assert!(!LogFetchError::Decode(String::new()).is_transient());
    }
}
