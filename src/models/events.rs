use alloy_primitives::{Address, B256};
use alloy_rpc_types_eth::Log;
use alloy_sol_types::{SolEvent, sol};

use crate::models::common::QueryId;
use crate::models::errors::LogFetchError;

sol! {
    /// Emitted by the oracle for every accepted value submission.
    event NewReport(
        bytes32 indexed _queryId,
        uint256 indexed _time,
        bytes _value,
        uint256 _nonce,
        bytes _queryData,
        address indexed _reporter
    );
}

/// A decoded `NewReport` log. Block placement fields stay optional because the node
/// leaves them empty for pending logs; the scanner refuses to ingest those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEvent {
    pub reporter: Address,
    pub query_id: QueryId,
    pub timestamp: u64,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub tx_hash: Option<B256>,
    pub removed: bool,
}

impl ReportEvent {
    pub fn from_log(log: &Log) -> Result<Self, LogFetchError> {
        let report = NewReport::decode_log_data(log.data())
            .map_err(|e| LogFetchError::Decode(e.to_string()))?;

        let timestamp = u64::try_from(report._time).map_err(|_| {
            LogFetchError::Decode(format!("report time {} does not fit in u64", report._time))
        })?;

        Ok(Self {
            reporter: report._reporter,
            query_id: report._queryId,
            timestamp,
            block_number: log.block_number,
            log_index: log.log_index,
            tx_hash: log.transaction_hash,
            removed: log.removed,
        })
    }

    /// `txHash-logIndex`, or `None` while the log is still pending.
    pub fn correlation_key(&self) -> Option<String> {
        match (self.tx_hash, self.log_index) {
            (Some(tx_hash), Some(log_index)) => Some(format!("{tx_hash}-{log_index}")),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Bytes, LogData, U256, address, b256};

    fn report_log(log_index: Option<u64>) -> Log {
        let event = NewReport {
            _queryId: b256!("83a7f3d48786ac2667503a61e8c415438ed2922eb86a2906e4ee66d9a2ce4992"),
            _time: U256::from(1_683_037_271u64),
            _value: Bytes::from(vec![0u8; 32]),
            _nonce: U256::from(3),
            _queryData: Bytes::new(),
            _reporter: address!("d5f1Cc896542C111c7Aa7D7fae2C3D654f34b927"),
        };
        let data: LogData = event.encode_log_data();
        Log {
            inner: alloy_primitives::Log {
                address: Address::ZERO,
                data,
            },
            block_number: Some(42),
            transaction_hash: Some(B256::repeat_byte(0xab)),
            log_index,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_new_report() {
        let event = ReportEvent::from_log(&report_log(Some(7))).unwrap();
        assert_eq!(event.timestamp, 1_683_037_271);
        assert_eq!(
            event.reporter,
            address!("d5f1Cc896542C111c7Aa7D7fae2C3D654f34b927")
        );
        assert_eq!(event.block_number, Some(42));
        assert_eq!(
            event.correlation_key().unwrap(),
            format!("{}-7", B256::repeat_byte(0xab))
        );
    }

    #[test]
    fn test_pending_log_has_no_correlation_key() {
        let event = ReportEvent::from_log(&report_log(None)).unwrap();
        assert!(event.correlation_key().is_none());
    }
}
