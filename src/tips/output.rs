use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::common::ClaimParams;
use crate::tips::{FeedTips, OneTimeTips};

pub const SINGLE_TIPS_FILE: &str = "single_tips.json";
pub const FEED_TIPS_FILE: &str = "feed_tips.json";

/// query id -> feed id -> timestamps
pub type FeedTipsByQuery = BTreeMap<String, BTreeMap<String, Vec<u64>>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleTipsDocument {
    pub single_tips: BTreeMap<String, Vec<u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTipsDocument {
    pub feed_tips: FeedTipsByQuery,
    pub feed_tips_no_balance: FeedTipsByQuery,
}

impl From<&OneTimeTips> for SingleTipsDocument {
    fn from(tips: &OneTimeTips) -> Self {
        Self {
            single_tips: tips
                .iter()
                .map(|(query_id, timestamps)| (query_id.to_string(), timestamps.clone()))
                .collect(),
        }
    }
}

impl From<&FeedTips> for FeedTipsDocument {
    fn from(tips: &FeedTips) -> Self {
        Self {
            feed_tips: by_query(&tips.claim_params),
            feed_tips_no_balance: by_query(&tips.no_balance),
        }
    }
}

fn by_query(params: &ClaimParams) -> FeedTipsByQuery {
    let mut grouped = FeedTipsByQuery::new();
    for ((feed_id, query_id), timestamps) in params {
        grouped
            .entry(query_id.to_string())
            .or_default()
            .insert(feed_id.to_string(), timestamps.clone());
    }
    grouped
}

fn write_document<T: Serialize>(path: &Path, document: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(document)?;
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Rewrites `single_tips.json` in `output_dir`.
pub fn write_single_tips(output_dir: &Path, tips: &OneTimeTips) -> Result<PathBuf> {
    let path = output_dir.join(SINGLE_TIPS_FILE);
    write_document(&path, &SingleTipsDocument::from(tips))?;
    info!("Wrote one-time tips to {}", path.display());
    Ok(path)
}

/// Rewrites `feed_tips.json` in `output_dir`.
pub fn write_feed_tips(output_dir: &Path, tips: &FeedTips) -> Result<PathBuf> {
    let path = output_dir.join(FEED_TIPS_FILE);
    write_document(&path, &FeedTipsDocument::from(tips))?;
    info!("Wrote feed tips to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    #[test]
    fn test_feed_tips_grouped_by_query() {
        let query_id = B256::repeat_byte(0x01);
        let feed_a = B256::repeat_byte(0x0a);
        let feed_b = B256::repeat_byte(0x0b);
        let tips = FeedTips {
            claim_params: ClaimParams::from([((feed_a, query_id), vec![10]), ((feed_b, query_id), vec![20])]),
            no_balance: ClaimParams::from([((feed_b, query_id), vec![30])]),
        };

        let document = FeedTipsDocument::from(&tips);
        let by_feed = &document.feed_tips[&query_id.to_string()];
        assert_eq!(by_feed[&feed_a.to_string()], vec![10]);
        assert_eq!(by_feed[&feed_b.to_string()], vec![20]);
        assert_eq!(
            document.feed_tips_no_balance[&query_id.to_string()][&feed_b.to_string()],
            vec![30]
        );
    }

    #[test]
    fn test_outputs_are_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let query_id = B256::repeat_byte(0x01);

        let first = OneTimeTips::from([(query_id, vec![1_000])]);
        write_single_tips(dir.path(), &first).unwrap();
        let path = write_single_tips(dir.path(), &OneTimeTips::new()).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"single_tips": {}}));

        let path = write_feed_tips(dir.path(), &FeedTips::default()).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"feed_tips": {}, "feed_tips_no_balance": {}}));
    }
}
