use alloy_primitives::U256;

use crate::models::autopay::{FeedDetails, to_u64_saturating};

/// A ledger timestamp together with the report that preceded it for the same query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedReport {
    pub timestamp: u64,
    pub timestamp_before: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEvaluation {
    /// Claimable timestamps, ascending.
    pub eligible: Vec<u64>,
    /// First-in-window timestamps of a feed that has no balance left.
    pub no_balance: Vec<u64>,
}

/// Start of the submission window containing `timestamp`, or `None` when the feed had not
/// started yet or has no interval.
pub fn submission_window_start(timestamp: u64, start_time: u64, interval: u64) -> Option<u64> {
    if interval == 0 || timestamp < start_time {
        return None;
    }
    let num_intervals = (timestamp - start_time) / interval;
    Some(start_time + interval * num_intervals)
}

/// Whether `timestamp` is the first report of its window, and how far into the window it
/// landed. No earlier report may fall inside the same window; a `timestamp_before` of 0
/// means the query had no earlier report at all.
pub fn is_timestamp_first_in_window(
    timestamp_before: u64,
    timestamp: u64,
    start_time: u64,
    window: u64,
    interval: u64,
) -> (bool, u64) {
    match submission_window_start(timestamp, start_time, interval) {
        Some(window_start) => {
            let time_diff = timestamp - window_start;
            let no_earlier_report = timestamp_before == 0 || timestamp_before < window_start;
            (time_diff < window && no_earlier_report, time_diff)
        }
        None => (false, 0),
    }
}

/// Reward owed for a report `time_diff` seconds into its window.
pub fn reward_amount(details: &FeedDetails, time_diff: u64) -> U256 {
    details.reward.saturating_add(
        details
            .rewardIncreasePerSecond
            .saturating_mul(U256::from(time_diff)),
    )
}

/// Walks `reports` in timestamp order against one feed, spending its balance as timestamps
/// qualify. Evaluation stops at the first qualifying timestamp the balance cannot cover.
///
/// A timestamp that is not first in its window can still qualify through `price_change`
/// (basis points) when the feed has a price threshold. `None` from `price_change` means the
/// values could not be compared and the timestamp is skipped.
pub fn evaluate_feed<F>(details: &FeedDetails, reports: &[FeedReport], mut price_change: F) -> FeedEvaluation
where
    F: FnMut(u64) -> Option<U256>,
{
    let start_time = to_u64_saturating(details.startTime);
    let interval = to_u64_saturating(details.interval);
    let window = to_u64_saturating(details.window);

    let mut reports = reports.to_vec();
    reports.sort_by_key(|report| report.timestamp);

    let mut evaluation = FeedEvaluation::default();

    if details.balance.is_zero() {
        evaluation.no_balance = reports
            .iter()
            .filter(|report| {
                is_timestamp_first_in_window(
                    report.timestamp_before,
                    report.timestamp,
                    start_time,
                    window,
                    interval,
                )
                .0
            })
            .map(|report| report.timestamp)
            .collect();
        return evaluation;
    }

    let mut balance = details.balance;
    for report in &reports {
        if submission_window_start(report.timestamp, start_time, interval).is_none() {
            continue;
        }

        let (first_in_window, time_diff) = is_timestamp_first_in_window(
            report.timestamp_before,
            report.timestamp,
            start_time,
            window,
            interval,
        );

        let qualifies = first_in_window
            || (!details.priceThreshold.is_zero()
                && price_change(report.timestamp)
                    .is_some_and(|change| change > details.priceThreshold));
        if !qualifies {
            continue;
        }

        let reward = reward_amount(details, time_diff);
        if balance < reward {
            break;
        }
        balance -= reward;
        evaluation.eligible.push(report.timestamp);
    }

    evaluation
}

/// Legacy estimate of how many feed timestamps the balance covers, ignoring reward increase
/// and the price threshold. `None` for a feed with no reward. Not used for claims.
pub fn legacy_claimable_count(details: &FeedDetails) -> Option<U256> {
    if details.reward.is_zero() {
        return None;
    }
    Some(details.balance / details.reward)
}
