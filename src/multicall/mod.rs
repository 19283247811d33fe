use alloy_network::TransactionBuilder;
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::TransactionRequest;
use alloy_sol_types::{SolCall, SolType, SolValue};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::metrics::Metrics;
use crate::models::autopay::{FeedDetails, IMulticall3, Multicall3Call, Multicall3Result, Tip, TipRecord};
use crate::models::common::{FeedId, QueryId};
use crate::models::errors::BatchCallError;
use crate::utils::retry::{RetryConfig, retry};

/// Identifies one sub-call of a batch and, through it, the shape of its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallKey {
    FeedIds(QueryId),
    FeedDetails(QueryId, FeedId),
    DataBefore(QueryId, u64),
    CurrentValue(QueryId, u64),
    PastTips(QueryId),
    ClaimStatus(FeedId, QueryId),
    QueryData(QueryId),
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKey::FeedIds(query_id) => write!(f, "getCurrentFeeds({query_id})"),
            CallKey::FeedDetails(query_id, feed_id) => {
                write!(f, "getDataFeed({feed_id}) for {query_id}")
            }
            CallKey::DataBefore(query_id, timestamp) => {
                write!(f, "getDataBefore({query_id}, {timestamp})")
            }
            CallKey::CurrentValue(query_id, timestamp) => {
                write!(f, "retrieveData({query_id}, {timestamp})")
            }
            CallKey::PastTips(query_id) => write!(f, "getPastTips({query_id})"),
            CallKey::ClaimStatus(feed_id, query_id) => {
                write!(f, "getRewardClaimStatusList({feed_id}, {query_id})")
            }
            CallKey::QueryData(query_id) => write!(f, "getQueryData({query_id})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchCall {
    pub target: Address,
    pub call_data: Bytes,
    pub key: CallKey,
}

impl BatchCall {
    pub fn new<C: SolCall>(target: Address, call: &C, key: CallKey) -> Self {
        Self {
            target,
            call_data: call.abi_encode().into(),
            key,
        }
    }
}

/// Raw return data of the sub-calls that succeeded, keyed by their `CallKey`.
#[derive(Debug, Clone, Default)]
pub struct BatchResults {
    results: HashMap<CallKey, Bytes>,
}

impl BatchResults {
    pub fn insert(&mut self, key: CallKey, data: Bytes) {
        self.results.insert(key, data);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn raw(&self, key: &CallKey) -> Result<&Bytes, BatchCallError> {
        self.results
            .get(key)
            .ok_or_else(|| BatchCallError::MissingResult {
                key: key.to_string(),
            })
    }

    /// Decodes a single return value.
    pub fn decode<T>(&self, key: &CallKey) -> Result<T, BatchCallError>
    where
        T: SolValue + From<<T::SolType as SolType>::RustType>,
    {
        let data = self.raw(key)?;
        T::abi_decode(data).map_err(|e| BatchCallError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn feed_ids(&self, key: &CallKey) -> Result<Vec<FeedId>, BatchCallError> {
        self.decode::<Vec<FeedId>>(key)
    }

    pub fn feed_details(&self, key: &CallKey) -> Result<FeedDetails, BatchCallError> {
        self.decode::<FeedDetails>(key)
    }

    pub fn past_tips(&self, key: &CallKey) -> Result<Vec<Tip>, BatchCallError> {
        let records = self.decode::<Vec<TipRecord>>(key)?;
        Ok(records.iter().map(Tip::from).collect())
    }

    pub fn bytes(&self, key: &CallKey) -> Result<Bytes, BatchCallError> {
        self.decode::<Bytes>(key)
    }

    pub fn claim_status(&self, key: &CallKey) -> Result<Vec<bool>, BatchCallError> {
        self.decode::<Vec<bool>>(key)
    }

    /// `getDataBefore` returns `(bytes value, uint256 timestampRetrieved)`.
    pub fn data_before(&self, key: &CallKey) -> Result<(Bytes, U256), BatchCallError> {
        let data = self.raw(key)?;
        <(Bytes, U256)>::abi_decode_params(data).map_err(|e| BatchCallError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Dispatches many read-only calls in one round trip.
#[async_trait]
pub trait BatchCallClient: Send + Sync {
    /// With `require_all_succeed`, any failing sub-call fails the whole batch.
    /// Otherwise failed sub-calls are left out of the results.
    async fn execute(
        &self,
        calls: Vec<BatchCall>,
        require_all_succeed: bool,
    ) -> Result<BatchResults, BatchCallError>;
}

/// `aggregate3` on the network's Multicall3 deployment.
pub struct Multicall3Client<P> {
    provider: P,
    multicall: Address,
    retry_config: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<P> Multicall3Client<P>
where
    P: Provider + Send + Sync,
{
    pub fn new(provider: P, multicall: Address) -> Self {
        Self {
            provider,
            multicall,
            retry_config: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Builds the `aggregate3` request. Every sub-call may fail on chain so that a revert comes
/// back as a per-call result; `collect_results` decides whether that fails the batch.
pub fn aggregate3_call(calls: &[BatchCall]) -> IMulticall3::aggregate3Call {
    IMulticall3::aggregate3Call {
        calls: calls
            .iter()
            .map(|call| Multicall3Call {
                target: call.target,
                allowFailure: true,
                callData: call.call_data.clone(),
            })
            .collect(),
    }
}

/// Matches `aggregate3` results back to their calls.
pub fn collect_results(
    calls: Vec<BatchCall>,
    results: Vec<Multicall3Result>,
    require_all_succeed: bool,
) -> Result<BatchResults, BatchCallError> {
    if results.len() != calls.len() {
        return Err(BatchCallError::Transport(format!(
            "aggregate3 returned {} results for {} calls",
            results.len(),
            calls.len()
        )));
    }

    let mut collected = BatchResults::default();
    for (call, result) in calls.into_iter().zip(results) {
        if result.success {
            collected.insert(call.key, result.returnData);
        } else if require_all_succeed {
            return Err(BatchCallError::CallFailed {
                key: call.key.to_string(),
            });
        } else {
            debug!("Sub-call {} failed, leaving it out", call.key);
        }
    }
    Ok(collected)
}

#[async_trait]
impl<P> BatchCallClient for Multicall3Client<P>
where
    P: Provider + Send + Sync,
{
    async fn execute(
        &self,
        calls: Vec<BatchCall>,
        require_all_succeed: bool,
    ) -> Result<BatchResults, BatchCallError> {
        if calls.is_empty() {
            return Ok(BatchResults::default());
        }

        let input: Bytes = aggregate3_call(&calls).abi_encode().into();

        debug!(
            "Dispatching {} calls through multicall {} (require all: {})",
            calls.len(),
            self.multicall,
            require_all_succeed
        );

        let return_data = retry(
            || async {
                let request = TransactionRequest::default()
                    .with_to(self.multicall)
                    .with_input(input.clone());
                let start = Instant::now();
                let result = self.provider.call(request).await;

                if let Some(metrics) = &self.metrics {
                    metrics.record_rpc("aggregate3", start, result.is_err());
                }
                result
            },
            &self.retry_config,
            "multicall_aggregate3",
        )
        .await
        .map_err(|e| BatchCallError::Transport(e.to_string()))?;

        let results = Vec::<Multicall3Result>::abi_decode(&return_data).map_err(|e| {
            BatchCallError::Decode {
                key: "aggregate3".to_string(),
                reason: e.to_string(),
            }
        })?;

        collect_results(calls, results, require_all_succeed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::autopay::IAutopay;
    use alloy_primitives::B256;

    fn query() -> QueryId {
        B256::repeat_byte(0x0a)
    }

    fn feed_ids_call() -> BatchCall {
        BatchCall::new(
            Address::ZERO,
            &IAutopay::getCurrentFeedsCall { _queryId: query() },
            CallKey::FeedIds(query()),
        )
    }

    #[test]
    fn test_batch_call_encodes_selector() {
        let call = feed_ids_call();
        assert_eq!(&call.call_data[..4], IAutopay::getCurrentFeedsCall::SELECTOR.as_slice());
    }

    #[test]
    fn test_aggregate3_lets_every_call_fail() {
        let calls = vec![feed_ids_call(), feed_ids_call()];
        let aggregate = aggregate3_call(&calls);

        assert_eq!(aggregate.calls.len(), 2);
        assert!(aggregate.calls.iter().all(|call| call.allowFailure));
        assert_eq!(aggregate.calls[0].callData, calls[0].call_data);
    }

    #[test]
    fn test_collect_results_best_effort_drops_failures() {
        let calls = vec![feed_ids_call(), BatchCall {
            key: CallKey::PastTips(query()),
            ..feed_ids_call()
        }];
        let results = vec![
            Multicall3Result {
                success: true,
                returnData: vec![B256::repeat_byte(0x01)].abi_encode().into(),
            },
            Multicall3Result {
                success: false,
                returnData: Bytes::new(),
            },
        ];

        let collected = collect_results(calls, results, false).unwrap();
        assert_eq!(collected.len(), 1);
        assert_eq!(
            collected.feed_ids(&CallKey::FeedIds(query())).unwrap(),
            vec![B256::repeat_byte(0x01)]
        );
        assert!(matches!(
            collected.past_tips(&CallKey::PastTips(query())),
            Err(BatchCallError::MissingResult { .. })
        ));
    }

    #[test]
    fn test_collect_results_require_all_fails() {
        let results = vec![Multicall3Result {
            success: false,
            returnData: Bytes::new(),
        }];
        assert!(matches!(
            collect_results(vec![feed_ids_call()], results, true),
            Err(BatchCallError::CallFailed { .. })
        ));
    }

    #[test]
    fn test_decode_data_before() {
        let mut results = BatchResults::default();
        let key = CallKey::DataBefore(query(), 1_000);
        let encoded = (Bytes::from(vec![1u8, 2, 3]), U256::from(900)).abi_encode_params();
        results.insert(key.clone(), encoded.into());

        let (value, timestamp) = results.data_before(&key).unwrap();
        assert_eq!(value, Bytes::from(vec![1u8, 2, 3]));
        assert_eq!(timestamp, U256::from(900));
    }

    #[test]
    fn test_decode_past_tips() {
        let mut results = BatchResults::default();
        let key = CallKey::PastTips(query());
        let records = vec![TipRecord {
            amount: U256::from(5),
            timestamp: U256::from(900),
            cumulativeTips: U256::from(5),
        }];
        results.insert(key.clone(), records.abi_encode().into());

        assert_eq!(
            results.past_tips(&key).unwrap(),
            vec![Tip {
                amount: U256::from(5),
                timestamp: 900
            }]
        );
    }
}
