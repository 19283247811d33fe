use alloy_primitives::U256;

use crate::models::autopay::Tip;

/// Rightmost item whose key is `<= target` in a slice sorted ascending by `key`.
///
/// Keeps `[mini, maxi)` with `key(items[mini]) <= target < key(items[maxi])` and narrows
/// until one candidate remains.
pub fn rightmost_at_or_before<T>(items: &[T], target: u64, key: impl Fn(&T) -> u64) -> Option<&T> {
    if items.is_empty() {
        return None;
    }

    let mut mini = 0;
    let mut maxi = items.len();
    while maxi - mini > 1 {
        let mid = mini + (maxi - mini) / 2;
        if key(&items[mid]) > target {
            maxi = mid;
        } else {
            mini = mid;
        }
    }

    let candidate = &items[mini];
    (key(candidate) <= target).then_some(candidate)
}

/// Whether a report at `report_timestamp` is the first to observe a funded one-time tip.
///
/// `tips` must be ascending by timestamp. `timestamp_before` is the previous report for the
/// same query; without one the report is eligible as long as the query has ever been tipped.
pub fn is_one_time_tip_eligible(tips: &[Tip], report_timestamp: u64, timestamp_before: Option<u64>) -> bool {
    if tips.is_empty() {
        return false;
    }

    let Some(timestamp_before) = timestamp_before else {
        return true;
    };

    match rightmost_at_or_before(tips, report_timestamp, |tip| tip.timestamp) {
        Some(tip) => {
            timestamp_before < tip.timestamp
                && report_timestamp > tip.timestamp
                && tip.amount > U256::ZERO
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eth(amount: u64) -> U256 {
        U256::from(amount) * U256::from(10u64).pow(U256::from(18))
    }

    fn tips() -> Vec<Tip> {
        vec![
            Tip { amount: eth(1), timestamp: 1_000 },
            Tip { amount: eth(2), timestamp: 2_000 },
            Tip { amount: eth(3), timestamp: 3_000 },
        ]
    }

    #[test]
    fn test_rightmost_at_or_before() {
        let values = [10u64, 20, 20, 30, 40];
        assert_eq!(rightmost_at_or_before(&values, 5, |v| *v), None);
        assert_eq!(rightmost_at_or_before(&values, 10, |v| *v), Some(&10));
        assert_eq!(rightmost_at_or_before(&values, 25, |v| *v), Some(&20));
        assert_eq!(rightmost_at_or_before(&values, 40, |v| *v), Some(&40));
        assert_eq!(rightmost_at_or_before(&values, 1_000, |v| *v), Some(&40));
        assert_eq!(rightmost_at_or_before::<u64>(&[], 1, |v| *v), None);
    }

    #[test]
    fn test_rightmost_picks_last_of_equal_keys() {
        let values = [(1u64, 'a'), (2, 'b'), (2, 'c'), (3, 'd')];
        let found = rightmost_at_or_before(&values, 2, |(ts, _)| *ts).unwrap();
        assert_eq!(found.1, 'c');
    }

    #[test]
    fn test_report_after_new_tip_is_eligible() {
        assert!(is_one_time_tip_eligible(&tips(), 2_001, Some(1_999)));
    }

    #[test]
    fn test_report_colliding_with_tip_is_not_eligible() {
        assert!(!is_one_time_tip_eligible(&tips(), 2_000, Some(1_999)));
    }

    #[test]
    fn test_empty_tips_never_eligible() {
        assert!(!is_one_time_tip_eligible(&[], 5_000, Some(1)));
        assert!(!is_one_time_tip_eligible(&[], 5_000, None));
    }

    #[test]
    fn test_tip_already_claimed_by_previous_report() {
        // Previous report at 3_100 already came after the 3_000 tip
        assert!(!is_one_time_tip_eligible(&tips(), 3_200, Some(3_100)));
    }

    #[test]
    fn test_zero_amount_not_eligible() {
        let tips = vec![Tip { amount: U256::ZERO, timestamp: 1_683_037_271 }];
        assert!(!is_one_time_tip_eligible(&tips, 1_683_037_272, Some(1_683_037_270)));
    }

    #[test]
    fn test_no_previous_report_is_eligible() {
        assert!(is_one_time_tip_eligible(&tips(), 1_500, None));
    }

    #[test]
    fn test_report_before_any_tip() {
        assert!(!is_one_time_tip_eligible(&tips(), 500, Some(100)));
    }
}
