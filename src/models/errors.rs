use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Unsupported chain ID: {chain_id}")]
    UnsupportedChainId { chain_id: u64 },
    #[error("No block explorer endpoint configured for {chain}")]
    MissingExplorer { chain: String },
    #[error("Block explorer request failed: {reason}")]
    ExplorerRequest { reason: String },
    #[error("Invalid block explorer response: {reason}")]
    InvalidExplorerResponse { reason: String },
}

/// Errors surfaced by a remote log source. Only the transient kinds are retried.
#[derive(Error, Debug, Clone)]
pub enum LogFetchError {
    #[error("Log query range too large: {0}")]
    RangeTooLarge(String),
    #[error("Log query timed out: {0}")]
    Timeout(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Failed to decode log: {0}")]
    Decode(String),
}

impl LogFetchError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, LogFetchError::Decode(_))
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Invalid scan range: start block {start} is after end block {end}")]
    InvalidRange { start: u64, end: u64 },
    #[error("Out of retries fetching logs for blocks {from}-{to} after {attempts} attempts: {source}")]
    RetriesExhausted {
        from: u64,
        to: u64,
        attempts: u32,
        #[source]
        source: LogFetchError,
    },
    #[error("Encountered a pending log (no log index) in tx {tx_hash}")]
    PendingLog { tx_hash: String },
    #[error(transparent)]
    Fetch(#[from] LogFetchError),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("State file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Start block lookup failed: {0}")]
    StartBlock(#[from] ChainError),
}

#[derive(Error, Debug)]
pub enum BatchCallError {
    #[error("Batched call transport failed: {0}")]
    Transport(String),
    #[error("Batched sub-call {key} reverted")]
    CallFailed { key: String },
    #[error("No result for batched sub-call {key}")]
    MissingResult { key: String },
    #[error("Failed to decode result of {key}: {reason}")]
    Decode { key: String, reason: String },
}
