//! Solidity ABI surface consumed by the relay, declared with `sol!`.
//!
//! Kept to the exact views, writes, and events the pipeline touches. Struct
//! layouts mirror the deployed contracts; the mirror reads full structs via
//! the views because events omit most fields.

use alloy::sol;

sol! {
    // === PoolCore ===

    /// Full pool struct as returned by `pools(uint256)`.
    #[derive(Debug)]
    struct PoolState {
        address creator;
        uint16 odds;
        bool settled;
        bool creatorSideWon;
        bool isPrivate;
        bool usesBitr;
        uint8 oracleType;
        uint8 marketType;
        bytes32 predictedOutcome;
        bytes32 result;
        uint256 creatorStake;
        uint256 totalCreatorSideStake;
        uint256 maxBettorStake;
        uint256 totalBettorStake;
        string marketId;
        uint256 eventStartTime;
        uint256 eventEndTime;
        uint256 bettingEndTime;
        uint256 arbitrationDeadline;
        bytes32 league;
        bytes32 category;
        bytes32 region;
        bytes32 homeTeam;
        bytes32 awayTeam;
        bytes32 title;
    }

    event PoolCreated(uint256 indexed poolId, address indexed creator, uint8 oracleType, uint256 eventStartTime, uint256 eventEndTime);
    event BetPlaced(uint256 indexed poolId, address indexed bettor, uint256 amount, bool isForOutcome);
    event LiquidityAdded(uint256 indexed poolId, address indexed provider, uint256 amount);
    event LiquidityRemoved(uint256 indexed poolId, address indexed provider, uint256 amount);
    event PoolSettled(uint256 indexed poolId, bytes32 result, bool creatorSideWon, uint256 timestamp);
    event PoolRefunded(uint256 indexed poolId, string reason);

    function poolCount() external view returns (uint256);
    function pools(uint256 poolId) external view returns (PoolState memory);
    function settlePool(uint256 poolId, bytes32 outcomeHash) external;
    function settlePoolAutomatically(uint256 poolId) external;
    function refundPool(uint256 poolId) external;

    // === GuidedOracle ===

    event OutcomeSubmitted(string indexed marketId, bytes outcome, uint256 timestamp);

    function outcomes(string marketId) external view returns (bool isSet, bytes memory result, uint256 timestamp);
    function oracleBot() external view returns (address);
    function submitOutcome(string marketId, bytes outcome) external;

    // === Oddyssey ===

    /// One fixture slot passed to `startDailyCycle`. Odds are decimal odds
    /// scaled by 1000.
    #[derive(Debug)]
    struct CycleFixture {
        uint64 id;
        uint64 startTime;
        uint32 oddsHome;
        uint32 oddsDraw;
        uint32 oddsAway;
        uint32 oddsOver;
        uint32 oddsUnder;
    }

    /// One slot of a cycle resolution. Enum values are in
    /// [`moneyline_code`]/[`over_under_code`] on the Rust side.
    #[derive(Debug)]
    struct FixtureResult {
        uint8 moneyline;
        uint8 overUnder;
    }

    #[derive(Debug)]
    struct SlipPrediction {
        uint64 matchId;
        uint8 betType;
        bytes32 selection;
        uint32 selectedOdd;
    }

    #[derive(Debug)]
    struct SlipState {
        address player;
        uint256 cycleId;
        uint256 placedAt;
        SlipPrediction[10] predictions;
        uint256 finalScore;
        uint8 correctCount;
        bool isEvaluated;
    }

    event SlipPlaced(uint256 indexed cycleId, address indexed player, uint256 slipId);
    event CycleStarted(uint256 indexed cycleId, uint256 endTime);
    event CycleResolved(uint256 indexed cycleId, uint256 prizePool);
    event SlipEvaluated(uint256 indexed slipId, address indexed player, uint8 correctCount, uint256 finalScore);
    event PrizeClaimed(uint256 indexed cycleId, address indexed player, uint256 amount);

    function getCurrentCycle() external view returns (uint256);
    function cycleInfo(uint256 cycleId) external view returns (uint256 startTime, uint256 endTime, uint256 cycleSlipCount, bool resolved);
    function isCycleInitialized(uint256 cycleId) external view returns (bool);
    function slipCount() external view returns (uint256);
    function getSlip(uint256 slipId) external view returns (SlipState memory);
    function getDailySlipCount(uint256 cycleId) external view returns (uint256);
    function startDailyCycle(CycleFixture[10] memory fixtures) external;
    function resolveDailyCycle(uint256 cycleId, FixtureResult[10] memory results) external;
}

/// Oddyssey bet types as stored in `SlipPrediction.betType`.
pub const BET_TYPE_MONEYLINE: u8 = 0;
pub const BET_TYPE_OVER_UNDER: u8 = 1;

/// `FixtureResult.moneyline` enum values.
pub mod moneyline_code {
    pub const NOT_SET: u8 = 0;
    pub const HOME_WIN: u8 = 1;
    pub const DRAW: u8 = 2;
    pub const AWAY_WIN: u8 = 3;
    pub const NOT_APPLICABLE: u8 = 4;
}

/// `FixtureResult.overUnder` enum values.
pub mod over_under_code {
    pub const NOT_SET: u8 = 0;
    pub const OVER: u8 = 1;
    pub const UNDER: u8 = 2;
    pub const NOT_APPLICABLE: u8 = 3;
}

/// `PoolState.oracleType` values.
pub const ORACLE_TYPE_GUIDED: u8 = 0;
pub const ORACLE_TYPE_OPEN: u8 = 1;
