use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use crate::models::autopay::IAutopay;
use crate::models::common::ClaimParams;
use crate::tips::OneTimeTips;

/// An unsigned Autopay claim transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCall {
    pub to: Address,
    pub input: Bytes,
    pub description: String,
}

fn to_uint_list(timestamps: &[u64]) -> Vec<U256> {
    timestamps.iter().map(|timestamp| U256::from(*timestamp)).collect()
}

/// One `claimTip` per (feed id, query id).
pub fn feed_tip_claims(autopay: Address, claim_params: &ClaimParams) -> Vec<ClaimCall> {
    claim_params
        .iter()
        .map(|((feed_id, query_id), timestamps)| ClaimCall {
            to: autopay,
            input: IAutopay::claimTipCall {
                _feedId: *feed_id,
                _queryId: *query_id,
                _timestamps: to_uint_list(timestamps),
            }
            .abi_encode()
            .into(),
            description: format!("claimTip {feed_id}-{query_id} {timestamps:?}"),
        })
        .collect()
}

/// One `claimOneTimeTip` per query id.
pub fn one_time_tip_claims(autopay: Address, tips: &OneTimeTips) -> Vec<ClaimCall> {
    tips.iter()
        .map(|(query_id, timestamps)| ClaimCall {
            to: autopay,
            input: IAutopay::claimOneTimeTipCall {
                _queryId: *query_id,
                _timestamps: to_uint_list(timestamps),
            }
            .abi_encode()
            .into(),
            description: format!("claimOneTimeTip {query_id} {timestamps:?}"),
        })
        .collect()
}

/// Receives claims that are ready to be signed and sent.
#[async_trait]
pub trait ClaimSubmitter: Send + Sync {
    /// Returns how many claims were handed off.
    async fn submit(&self, claims: Vec<ClaimCall>) -> anyhow::Result<usize>;
}

/// Logs each claim's calldata for an external signer.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalldataLogger;

#[async_trait]
impl ClaimSubmitter for CalldataLogger {
    async fn submit(&self, claims: Vec<ClaimCall>) -> anyhow::Result<usize> {
        for claim in &claims {
            info!("{} -> to: {}, calldata: {}", claim.description, claim.to, claim.input);
        }
        Ok(claims.len())
    }
}
