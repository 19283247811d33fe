use alloy_primitives::{Bytes, U256};
use alloy_sol_types::SolValue;
use tracing::debug;

/// Basis points in 100%.
pub const MAX_PRICE_CHANGE_BPS: u64 = 10_000;

/// Query type name from raw query data.
///
/// Query data is normally the ABI encoding of `(string type, bytes params)`. Legacy string
/// queries are stored as a JSON-ish object such as `{"type": "LegacyRequest", ...}` instead.
pub fn query_type_from_query_data(query_data: &[u8]) -> Option<String> {
    if let Ok((query_type, _)) = <(String, Bytes)>::abi_decode_params(query_data) {
        return Some(query_type);
    }

    let text = std::str::from_utf8(query_data).ok()?;
    let parsed = serde_json::from_str::<serde_json::Value>(text)
        .or_else(|_| serde_json::from_str::<serde_json::Value>(&text.replace('\'', "\"")))
        .ok()?;
    parsed.get("type")?.as_str().map(String::from)
}

/// Decodes a reported value as a single `uint256`.
pub fn decode_numeric_value(value: &[u8]) -> Option<U256> {
    if value.len() != 32 {
        debug!("Value of {} bytes is not a single uint256", value.len());
        return None;
    }
    Some(U256::from_be_slice(value))
}

/// Relative change between two values in basis points. A zero previous value counts as 100%.
pub fn price_change_bps(previous: U256, current: U256) -> U256 {
    if previous.is_zero() {
        return U256::from(MAX_PRICE_CHANGE_BPS);
    }
    let difference = if current > previous {
        current - previous
    } else {
        previous - current
    };
    difference.saturating_mul(U256::from(MAX_PRICE_CHANGE_BPS)) / previous
}

/// Price change between two raw reported values, if both decode as numbers of a numeric type.
pub fn reported_price_change(
    query_type: Option<&str>,
    numeric_query_types: &[String],
    previous: &[u8],
    current: &[u8],
) -> Option<U256> {
    let query_type = query_type?;
    if !numeric_query_types.iter().any(|numeric| numeric == query_type) {
        debug!("Query type {} has no numeric value", query_type);
        return None;
    }
    let previous = decode_numeric_value(previous)?;
    let current = decode_numeric_value(current)?;
    Some(price_change_bps(previous, current))
}
