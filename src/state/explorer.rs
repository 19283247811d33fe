use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::models::common::NetworkConfig;
use crate::models::errors::ChainError;
use crate::state::StartBlockLookup;
use crate::utils::retry::{RetryConfig, retry};
use crate::utils::{now_unix, start_of_utc_day};

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    #[serde(default)]
    message: Option<String>,
    result: serde_json::Value,
}

/// Etherscan-compatible `getblocknobytime` lookup of the first block of the current UTC day.
pub struct ExplorerLookup {
    client: reqwest::Client,
    chain: String,
    api_url: String,
    api_key: Option<String>,
    retry_config: RetryConfig,
}

impl ExplorerLookup {
    pub fn from_network(network: &NetworkConfig) -> Result<Self, ChainError> {
        let api_url = network
            .explorer_api
            .clone()
            .ok_or_else(|| ChainError::MissingExplorer {
                chain: network.name.clone(),
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            chain: network.name.clone(),
            api_url,
            api_key: network.explorer_api_key.clone(),
            retry_config: RetryConfig::default(),
        })
    }

    async fn fetch_block_by_time(&self, timestamp: u64) -> Result<ExplorerResponse, ChainError> {
        let mut query = vec![
            ("module", "block".to_string()),
            ("action", "getblocknobytime".to_string()),
            ("timestamp", timestamp.to_string()),
            ("closest", "before".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        self.client
            .get(&self.api_url)
            .query(&query)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| ChainError::ExplorerRequest {
                reason: e.to_string(),
            })?
            .json::<ExplorerResponse>()
            .await
            .map_err(|e| ChainError::InvalidExplorerResponse {
                reason: e.to_string(),
            })
    }
}

fn parse_block_number(response: ExplorerResponse) -> Result<u64, ChainError> {
    let parsed = match &response.result {
        serde_json::Value::String(raw) => raw.parse::<u64>().ok(),
        serde_json::Value::Number(number) => number.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| ChainError::InvalidExplorerResponse {
        reason: format!(
            "expected a block number, got {} ({})",
            response.result,
            response.message.unwrap_or_default()
        ),
    })
}

#[async_trait]
impl StartBlockLookup for ExplorerLookup {
    async fn day_start_block(&self) -> Result<u64, ChainError> {
        let day_start = start_of_utc_day(now_unix());
        // Only the request is retried
        let response = retry(
            || self.fetch_block_by_time(day_start),
            &self.retry_config,
            "explorer_getblocknobytime",
        )
        .await?;
        let block = parse_block_number(response)?;
        info!("First block of the UTC day on {}: {}", self.chain, block);
        Ok(block)
    }
}
