use alloy_primitives::U256;
use alloy_sol_types::sol;

sol! {
    /// Feed configuration as returned by `getDataFeed`.
    struct FeedDetails {
        uint256 reward;
        uint256 balance;
        uint256 startTime;
        uint256 interval;
        uint256 window;
        uint256 priceThreshold;
        uint256 rewardIncreasePerSecond;
        uint256 feedsWithFundingIndex;
    }

    /// One-time tip entry as returned by `getPastTips`.
    struct TipRecord {
        uint256 amount;
        uint256 timestamp;
        uint256 cumulativeTips;
    }

    interface IAutopay {
        function getCurrentFeeds(bytes32 _queryId) external view returns (bytes32[] memory);
        function getDataFeed(bytes32 _feedId) external view returns (FeedDetails memory);
        function getPastTips(bytes32 _queryId) external view returns (TipRecord[] memory);
        function getDataBefore(bytes32 _queryId, uint256 _timestamp) external view returns (bytes memory _value, uint256 _timestampRetrieved);
        function retrieveData(bytes32 _queryId, uint256 _timestamp) external view returns (bytes memory);
        function getRewardClaimStatusList(bytes32 _feedId, bytes32 _queryId, uint256[] calldata _timestamps) external view returns (bool[] memory);
        function claimTip(bytes32 _feedId, bytes32 _queryId, uint256[] calldata _timestamps) external;
        function claimOneTimeTip(bytes32 _queryId, uint256[] calldata _timestamps) external;
    }

    interface IQueryDataStorage {
        function getQueryData(bytes32 _queryId) external view returns (bytes memory);
    }

    struct Multicall3Call {
        address target;
        bool allowFailure;
        bytes callData;
    }

    struct Multicall3Result {
        bool success;
        bytes returnData;
    }

    interface IMulticall3 {
        function aggregate3(Multicall3Call[] calldata calls) external payable returns (Multicall3Result[] memory returnData);
    }
}

/// An entry of a query's one-time tip log, ascending by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tip {
    pub amount: U256,
    pub timestamp: u64,
}

impl From<&TipRecord> for Tip {
    fn from(record: &TipRecord) -> Self {
        Self {
            amount: record.amount,
            timestamp: to_u64_saturating(record.timestamp),
        }
    }
}

/// Helpers for on-chain `uint256` time fields that the eligibility math handles as `u64`.
pub fn to_u64_saturating(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
