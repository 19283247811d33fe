use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::errors::ChainError;

pub type QueryId = B256;
pub type FeedId = B256;

/// Report timestamps per query id for one (chain, account) pair.
pub type Ledger = BTreeMap<QueryId, Vec<u64>>;

/// Eligible claim timestamps keyed by `(feed_id, query_id)`, ascending.
pub type ClaimParams = BTreeMap<(FeedId, QueryId), Vec<u64>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub address: String,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "0.0.0.0".to_string(),
            port: 9100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    pub min_chunk_size: u64,
    pub max_chunk_size: u64,
    pub start_chunk_size: u64,
    pub max_request_retries: u32,
    pub request_retry_seconds: f64,
    pub reorg_safety_margin: u64,
    pub flush_interval_seconds: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            min_chunk_size: 3_499, // ~12s blocks, about two minutes of chain
            max_chunk_size: 100_000,
            start_chunk_size: 100_000,
            max_request_retries: 30,
            request_retry_seconds: 3.0,
            reorg_safety_margin: 10,
            flush_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilitySettings {
    pub maturity_delay_seconds: u64,
    pub staleness_bound_seconds: u64,
    pub numeric_query_types: Vec<String>,
}

impl Default for EligibilitySettings {
    fn default() -> Self {
        Self {
            maturity_delay_seconds: TWELVE_HOURS,
            staleness_bound_seconds: FOUR_WEEKS,
            numeric_query_types: [
                "SpotPrice",
                "NumericApiResponse",
                "TWAP",
                "DailyVolatility",
                "MimicryCollectionStat",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

pub const TWELVE_HOURS: u64 = 12 * 60 * 60;
pub const FOUR_WEEKS: u64 = 4 * 7 * 24 * 60 * 60;

/// One row of the network registry. Contract addresses live here rather than in
/// process-wide constants so each client gets exactly the table it was configured with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub explorer_api: Option<String>,
    pub explorer_api_key: Option<String>,
    pub oracle: Address,
    pub autopay: Address,
    pub multicall: Address,
    pub query_data_storage: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chain_id: u64,
    pub rpc_url: String,
    pub account: Address,
    pub start_block: Option<u64>,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default)]
    pub scanner: ScannerSettings,
    #[serde(default)]
    pub eligibility: EligibilitySettings,
    #[serde(default)]
    pub metrics: MetricsConfig,
    pub networks: Vec<NetworkConfig>,
}

fn default_state_file() -> String {
    "new_report_timestamps.json".to_string()
}

fn default_output_dir() -> String {
    ".".to_string()
}

impl Config {
    pub fn network(&self) -> Result<&NetworkConfig, ChainError> {
        find_network(&self.networks, self.chain_id)
    }
}

pub fn find_network(networks: &[NetworkConfig], chain_id: u64) -> Result<&NetworkConfig, ChainError> {
    networks
        .iter()
        .find(|network| network.chain_id == chain_id)
        .ok_or(ChainError::UnsupportedChainId { chain_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(chain_id: u64, name: &str) -> NetworkConfig {
        NetworkConfig {
            chain_id,
            name: name.to_string(),
            explorer_api: None,
            explorer_api_key: None,
            oracle: Address::ZERO,
            autopay: Address::ZERO,
            multicall: Address::ZERO,
            query_data_storage: None,
        }
    }

    #[test]
    fn test_find_network() {
        let networks = vec![network(1, "mainnet"), network(137, "polygon")];
        assert_eq!(find_network(&networks, 137).unwrap().name, "polygon");
        assert!(matches!(
            find_network(&networks, 5),
            Err(ChainError::UnsupportedChainId { chain_id: 5 })
        ));
    }
}
