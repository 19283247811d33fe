pub mod claims;
pub mod feed;
pub mod one_time;
pub mod output;
pub mod values;

use alloy_primitives::{Address, Bytes, U256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::metrics::Metrics;
use crate::models::autopay::{FeedDetails, IAutopay, IQueryDataStorage, to_u64_saturating};
use crate::models::common::{ClaimParams, EligibilitySettings, FeedId, Ledger, QueryId};
use crate::models::errors::BatchCallError;
use crate::multicall::{BatchCall, BatchCallClient, BatchResults, CallKey};
use crate::tips::feed::{FeedReport, evaluate_feed};
use crate::tips::one_time::is_one_time_tip_eligible;
use crate::tips::values::{query_type_from_query_data, reported_price_change};

/// Eligible one-time tip timestamps per query id, ascending.
pub type OneTimeTips = BTreeMap<QueryId, Vec<u64>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedTips {
    /// Unclaimed eligible timestamps, ready to be passed to `claimTip`.
    pub claim_params: ClaimParams,
    /// Timestamps that would have been eligible if their feed still had a balance.
    pub no_balance: ClaimParams,
}

impl FeedTips {
    pub fn timestamp_count(&self) -> usize {
        self.claim_params.values().map(Vec::len).sum()
    }
}

/// Reports old enough to claim one-time tips for.
pub fn filter_for_one_time_tips(ledger: &Ledger, now: u64, maturity_delay: u64) -> Ledger {
    filter_ledger(ledger, |timestamp| {
        now.checked_sub(timestamp)
            .is_some_and(|age| age > maturity_delay)
    })
}

/// Reports old enough to claim feed tips for, but not yet too old.
pub fn filter_for_feed_tips(ledger: &Ledger, now: u64, maturity_delay: u64, staleness_bound: u64) -> Ledger {
    filter_ledger(ledger, |timestamp| {
        now.checked_sub(timestamp)
            .is_some_and(|age| age > maturity_delay && age < staleness_bound)
    })
}

fn filter_ledger(ledger: &Ledger, keep: impl Fn(u64) -> bool) -> Ledger {
    ledger
        .iter()
        .filter_map(|(query_id, timestamps)| {
            let mut kept: Vec<u64> = timestamps.iter().copied().filter(|ts| keep(*ts)).collect();
            kept.sort_unstable();
            kept.dedup();
            (!kept.is_empty()).then_some((*query_id, kept))
        })
        .collect()
}

/// Works out which ledger timestamps can still claim Autopay tips. Reads only.
pub struct TipEligibilityEngine<C> {
    client: C,
    autopay: Address,
    query_data_storage: Option<Address>,
    settings: EligibilitySettings,
    metrics: Option<Arc<Metrics>>,
}

impl<C: BatchCallClient> TipEligibilityEngine<C> {
    pub fn new(client: C, autopay: Address, settings: EligibilitySettings) -> Self {
        Self {
            client,
            autopay,
            query_data_storage: None,
            settings,
            metrics: None,
        }
    }

    pub fn with_query_data_storage(mut self, query_data_storage: Option<Address>) -> Self {
        self.query_data_storage = query_data_storage;
        self
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// One-time tips claimable by the ledger's reports. `Ok(None)` when there is no ledger.
    pub async fn one_time_tips(
        &self,
        ledger: Option<&Ledger>,
        now: u64,
    ) -> Result<Option<OneTimeTips>, BatchCallError> {
        let Some(ledger) = ledger else {
            info!("No reports found to check one-time tips for");
            return Ok(None);
        };

        let reports = filter_for_one_time_tips(ledger, now, self.settings.maturity_delay_seconds);
        if reports.is_empty() {
            info!("No reports old enough to claim one-time tips for");
            return Ok(Some(OneTimeTips::new()));
        }

        let mut calls = Vec::new();
        for (query_id, timestamps) in &reports {
            calls.push(BatchCall::new(
                self.autopay,
                &IAutopay::getPastTipsCall { _queryId: *query_id },
                CallKey::PastTips(*query_id),
            ));
            calls.extend(timestamps.iter().map(|timestamp| self.data_before_call(*query_id, *timestamp)));
        }
        let results = self.client.execute(calls, true).await?;

        let mut eligible = OneTimeTips::new();
        for (query_id, timestamps) in &reports {
            let mut tips = results.past_tips(&CallKey::PastTips(*query_id))?;
            if tips.is_empty() {
                debug!("No one-time tips ever funded for {}", query_id);
                continue;
            }
            tips.sort_by_key(|tip| tip.timestamp);

            let mut claimable = Vec::new();
            for timestamp in timestamps {
                let (_, timestamp_before) =
                    results.data_before(&CallKey::DataBefore(*query_id, *timestamp))?;
                let timestamp_before = to_u64_saturating(timestamp_before);
                if is_one_time_tip_eligible(&tips, *timestamp, Some(timestamp_before)) {
                    claimable.push(*timestamp);
                }
            }
            if !claimable.is_empty() {
                eligible.insert(*query_id, claimable);
            }
        }

        let total: usize = eligible.values().map(Vec::len).sum();
        info!("{} timestamps eligible for one-time tips", total);
        self.record_eligible("one_time", total);
        Ok(Some(eligible))
    }

    /// Unclaimed feed tips for the ledger's reports. `Ok(None)` when there is no ledger.
    pub async fn feed_tips(&self, ledger: Option<&Ledger>, now: u64) -> Result<Option<FeedTips>, BatchCallError> {
        let Some(ledger) = ledger else {
            info!("No reports found to check feed tips for");
            return Ok(None);
        };

        let reports = filter_for_feed_tips(
            ledger,
            now,
            self.settings.maturity_delay_seconds,
            self.settings.staleness_bound_seconds,
        );
        if reports.is_empty() {
            info!("No reports inside the feed tip claim period");
            return Ok(Some(FeedTips::default()));
        }

        let feed_ids = self.feed_ids(&reports).await?;
        if feed_ids.is_empty() {
            info!("No feeds found in autopay for reported queries");
            return Ok(Some(FeedTips::default()));
        }

        let mut calls = Vec::new();
        for (query_id, feeds) in &feed_ids {
            calls.extend(feeds.iter().map(|feed_id| {
                BatchCall::new(
                    self.autopay,
                    &IAutopay::getDataFeedCall { _feedId: *feed_id },
                    CallKey::FeedDetails(*query_id, *feed_id),
                )
            }));
            for timestamp in &reports[query_id] {
                calls.push(self.data_before_call(*query_id, *timestamp));
                calls.push(BatchCall::new(
                    self.autopay,
                    &IAutopay::retrieveDataCall {
                        _queryId: *query_id,
                        _timestamp: U256::from(*timestamp),
                    },
                    CallKey::CurrentValue(*query_id, *timestamp),
                ));
            }
        }
        let results = self.client.execute(calls, true).await?;

        let mut details = BTreeMap::new();
        for (query_id, feeds) in &feed_ids {
            for feed_id in feeds {
                let feed = results.feed_details(&CallKey::FeedDetails(*query_id, *feed_id))?;
                details.insert((*query_id, *feed_id), feed);
            }
        }

        let query_types = self.query_types(&details).await?;

        let mut feed_tips = FeedTips::default();
        for ((query_id, feed_id), feed) in &details {
            let query_reports = self.feed_reports(&results, *query_id, &reports[query_id])?;
            let query_type = query_types.get(query_id).map(String::as_str);

            let evaluation = evaluate_feed(feed, &query_reports, |timestamp| {
                let (previous, _) = results.data_before(&CallKey::DataBefore(*query_id, timestamp)).ok()?;
                let current = results.bytes(&CallKey::CurrentValue(*query_id, timestamp)).ok()?;
                reported_price_change(query_type, &self.settings.numeric_query_types, &previous, &current)
            });

            if !evaluation.eligible.is_empty() {
                feed_tips.claim_params.insert((*feed_id, *query_id), evaluation.eligible);
            }
            if !evaluation.no_balance.is_empty() {
                debug!("Feed {} for {} has no balance left", feed_id, query_id);
                feed_tips.no_balance.insert((*feed_id, *query_id), evaluation.no_balance);
            }
        }

        feed_tips.claim_params = self.remove_claimed(feed_tips.claim_params).await?;

        info!(
            "{} timestamps eligible for feed tips across {} feeds",
            feed_tips.timestamp_count(),
            feed_tips.claim_params.len()
        );
        self.record_eligible("feed", feed_tips.timestamp_count());
        Ok(Some(feed_tips))
    }

    fn data_before_call(&self, query_id: QueryId, timestamp: u64) -> BatchCall {
        BatchCall::new(
            self.autopay,
            &IAutopay::getDataBeforeCall {
                _queryId: query_id,
                _timestamp: U256::from(timestamp),
            },
            CallKey::DataBefore(query_id, timestamp),
        )
    }

    async fn feed_ids(&self, reports: &Ledger) -> Result<BTreeMap<QueryId, Vec<FeedId>>, BatchCallError> {
        let calls = reports
            .keys()
            .map(|query_id| {
                BatchCall::new(
                    self.autopay,
                    &IAutopay::getCurrentFeedsCall { _queryId: *query_id },
                    CallKey::FeedIds(*query_id),
                )
            })
            .collect();
        let results = self.client.execute(calls, true).await?;

        let mut feed_ids = BTreeMap::new();
        for query_id in reports.keys() {
            let feeds = results.feed_ids(&CallKey::FeedIds(*query_id))?;
            if !feeds.is_empty() {
                feed_ids.insert(*query_id, feeds);
            }
        }
        Ok(feed_ids)
    }

    /// Query types of the queries whose feeds have a price threshold. Lookups that fail
    /// leave the query out, which makes its price path ineligible.
    async fn query_types(
        &self,
        details: &BTreeMap<(QueryId, FeedId), FeedDetails>,
    ) -> Result<HashMap<QueryId, String>, BatchCallError> {
        let Some(storage) = self.query_data_storage else {
            return Ok(HashMap::new());
        };

        let mut query_ids: Vec<QueryId> = details
            .iter()
            .filter(|(_, feed)| !feed.priceThreshold.is_zero())
            .map(|((query_id, _), _)| *query_id)
            .collect();
        query_ids.dedup();
        if query_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let calls = query_ids
            .iter()
            .map(|query_id| {
                BatchCall::new(
                    storage,
                    &IQueryDataStorage::getQueryDataCall { _queryId: *query_id },
                    CallKey::QueryData(*query_id),
                )
            })
            .collect();
        let results = self.client.execute(calls, false).await?;

        Ok(query_ids
            .into_iter()
            .filter_map(|query_id| {
                let query_data: Bytes = results.bytes(&CallKey::QueryData(query_id)).ok()?;
                let query_type = query_type_from_query_data(&query_data);
                if query_type.is_none() {
                    debug!("Could not decode query type for {}", query_id);
                }
                query_type.map(|query_type| (query_id, query_type))
            })
            .collect())
    }

    fn feed_reports(
        &self,
        results: &BatchResults,
        query_id: QueryId,
        timestamps: &[u64],
    ) -> Result<Vec<FeedReport>, BatchCallError> {
        timestamps
            .iter()
            .map(|timestamp| {
                let (_, timestamp_before) = results.data_before(&CallKey::DataBefore(query_id, *timestamp))?;
                Ok(FeedReport {
                    timestamp: *timestamp,
                    timestamp_before: to_u64_saturating(timestamp_before),
                })
            })
            .collect()
    }

    /// Drops timestamps whose reward was already claimed.
    async fn remove_claimed(&self, claim_params: ClaimParams) -> Result<ClaimParams, BatchCallError> {
        if claim_params.is_empty() {
            return Ok(claim_params);
        }

        let calls = claim_params
            .iter()
            .map(|((feed_id, query_id), timestamps)| {
                BatchCall::new(
                    self.autopay,
                    &IAutopay::getRewardClaimStatusListCall {
                        _feedId: *feed_id,
                        _queryId: *query_id,
                        _timestamps: timestamps.iter().map(|ts| U256::from(*ts)).collect(),
                    },
                    CallKey::ClaimStatus(*feed_id, *query_id),
                )
            })
            .collect();
        let results = self.client.execute(calls, true).await?;

        let mut unclaimed = ClaimParams::new();
        for ((feed_id, query_id), timestamps) in claim_params {
            let statuses = results.claim_status(&CallKey::ClaimStatus(feed_id, query_id))?;
            let remaining: Vec<u64> = timestamps
                .into_iter()
                .zip(statuses)
                .filter(|(_, claimed)| !claimed)
                .map(|(timestamp, _)| timestamp)
                .collect();
            if !remaining.is_empty() {
                unclaimed.insert((feed_id, query_id), remaining);
            }
        }
        Ok(unclaimed)
    }

    fn record_eligible(&self, kind: &'static str, count: usize) {
        if let Some(metrics) = &self.metrics {
            let labels = [
                opentelemetry::KeyValue::new("chain", metrics.chain_name.clone()),
                opentelemetry::KeyValue::new("kind", kind),
            ];
            metrics.eligible_timestamps.record(count as u64, &labels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_one_time_filter_keeps_matured_reports() {
        let query_id = B256::repeat_byte(0x01);
        let ledger = Ledger::from([(query_id, vec![1_000, 50_000, 90_000])]);

        let filtered = filter_for_one_time_tips(&ledger, 93_201, 43_200);
        assert_eq!(filtered[&query_id], vec![1_000, 50_000]);
    }

    #[test]
    fn test_feed_filter_drops_stale_and_fresh_reports() {
        let query_id = B256::repeat_byte(0x01);
        let other = B256::repeat_byte(0x02);
        let now = 3_000_000;
        let ledger = Ledger::from([
            (query_id, vec![now - 2_500_000, now - 50_000, now - 100]),
            (other, vec![now - 100]),
        ]);

        let filtered = filter_for_feed_tips(&ledger, now, 43_200, 2_419_200);
        assert_eq!(filtered[&query_id], vec![now - 50_000]);
        assert!(!filtered.contains_key(&other));
    }

    #[test]
    fn test_future_timestamps_are_never_mature() {
        let query_id = B256::repeat_byte(0x01);
        let ledger = Ledger::from([(query_id, vec![200])]);
        assert!(filter_for_one_time_tips(&ledger, 100, 0).is_empty());
    }

    #[test]
    fn test_feed_tips_timestamp_count() {
        let mut feed_tips = FeedTips::default();
        feed_tips
            .claim_params
            .insert((B256::ZERO, B256::repeat_byte(1)), vec![1, 2]);
        feed_tips
            .claim_params
            .insert((B256::repeat_byte(2), B256::repeat_byte(1)), vec![3]);
        assert_eq!(feed_tips.timestamp_count(), 3);
    }
}
