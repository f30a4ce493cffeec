//! Event-driven chain mirroring.
//!
//! One scanning loop per watched contract ("stream"). Each stream walks
//! confirmed block ranges forward, journals every matching log exactly once,
//! projects it through its handler, and advances its cursor, all inside a
//! single database transaction per window.

pub mod core;
pub mod oddyssey;
pub mod oracle;
pub mod pools;

pub use self::core::{AdaptiveBatch, EventHandler, Indexer};
pub use oddyssey::OddysseyMirror;
pub use oracle::OracleEvents;
pub use pools::PoolMirror;

use alloy::primitives::U256;

/// Narrow an on-chain uint256 id into the BIGINT key space.
pub fn u256_to_i64(v: U256, what: &str) -> anyhow::Result<i64> {
    let as_u64: u64 = v
        .try_into()
        .map_err(|_| anyhow::anyhow!("{what} exceeds u64 range"))?;
    i64::try_from(as_u64).map_err(|_| anyhow::anyhow!("{what} exceeds i64 range"))
}

/// Unix seconds from an on-chain uint256 timestamp; saturates instead of
/// failing because a nonsense timestamp should not wedge a whole window.
pub fn u256_to_ts(v: U256) -> i64 {
    u64::try_from(v).map(|t| t.min(i64::MAX as u64) as i64).unwrap_or(i64::MAX)
}
