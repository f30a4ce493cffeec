//! Service configuration, read once at startup from environment variables.
//!
//! Every recognised option has a default; addresses and the signing key do
//! not. A malformed value refuses startup rather than limping along with a
//! half-configured service.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use anyhow::{bail, Context, Result};

/// RPC endpoint list and scanning parameters.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Endpoints in priority order; the first entry is the primary.
    pub endpoints: Vec<String>,
    /// Blocks behind head at which logs are considered immutable.
    pub confirmation_depth: u64,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub batch_initial: u64,
    pub batch_min: u64,
    pub batch_max: u64,
    /// Head-poll interval when fully caught up.
    pub poll_base: Duration,
    /// Head-poll interval while lagging.
    pub poll_active: Duration,
    /// Lag (in blocks) past which the back-pressure warning fires.
    pub lag_warning_blocks: u64,
}

/// Deployed contract addresses, by logical name.
#[derive(Debug, Clone)]
pub struct ContractsConfig {
    pub pool_core: Address,
    pub guided_oracle: Address,
    pub oddyssey: Address,
    pub bitr_token: Address,
    pub reputation_system: Address,
    pub bitr_faucet: Address,
}

#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Hex-encoded private key for the oracle-bot role.
    pub bot_private_key: String,
    pub chain_id: u64,
}

#[derive(Debug, Clone)]
pub struct ResultsConfig {
    pub api_base: String,
    pub api_token: String,
    /// Poll interval while fixtures are in their match window.
    pub poll_match_window: Duration,
    pub poll_idle: Duration,
}

#[derive(Debug, Clone)]
pub struct OddysseyConfig {
    /// (hour, minute) UTC at which the daily cycle opens on-chain.
    pub cycle_open_time: (u32, u32),
    pub match_count: usize,
    /// Integer factor by which decimal odds are scaled on-chain.
    pub odds_scaling: u64,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub pool_max: u32,
    pub pool_min: u32,
    pub idle_timeout: Duration,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub indexer: IndexerConfig,
    pub contracts: ContractsConfig,
    pub oracle: OracleConfig,
    pub results: ResultsConfig,
    pub oddyssey: OddysseyConfig,
    pub db: DbConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let primary = require("RPC_PRIMARY_URL")?;
        let mut endpoints = vec![primary];
        if let Ok(fallbacks) = std::env::var("RPC_FALLBACK_URLS") {
            for url in fallbacks.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if endpoints.iter().all(|e| e != url) {
                    endpoints.push(url.to_string());
                }
            }
        }

        let rpc = RpcConfig {
            endpoints,
            confirmation_depth: env_parse("RPC_CONFIRMATION_DEPTH", 3u64)?,
            request_timeout: Duration::from_secs(env_parse("RPC_REQUEST_TIMEOUT_SECS", 15u64)?),
        };

        let indexer = IndexerConfig {
            batch_initial: env_parse("INDEXER_BATCH_INITIAL", 500u64)?,
            batch_min: env_parse("INDEXER_BATCH_MIN", 25u64)?,
            batch_max: env_parse("INDEXER_BATCH_MAX", 500u64)?,
            poll_base: Duration::from_secs(env_parse("INDEXER_POLL_BASE_SECS", 45u64)?),
            poll_active: Duration::from_secs(env_parse("INDEXER_POLL_ACTIVE_SECS", 10u64)?),
            lag_warning_blocks: env_parse("INDEXER_LAG_WARNING_BLOCKS", 1000u64)?,
        };
        if indexer.batch_min == 0 || indexer.batch_min > indexer.batch_max {
            bail!(
                "invalid indexer batch bounds: min={} max={}",
                indexer.batch_min,
                indexer.batch_max
            );
        }

        let contracts = ContractsConfig {
            pool_core: address("CONTRACT_POOL_CORE")?,
            guided_oracle: address("CONTRACT_GUIDED_ORACLE")?,
            oddyssey: address("CONTRACT_ODDYSSEY")?,
            bitr_token: address("CONTRACT_BITR_TOKEN")?,
            reputation_system: address("CONTRACT_REPUTATION_SYSTEM")?,
            bitr_faucet: address("CONTRACT_BITR_FAUCET")?,
        };

        let oracle = OracleConfig {
            bot_private_key: require("ORACLE_BOT_PRIVATE_KEY")?,
            chain_id: env_parse("CHAIN_ID", 50312u64)?,
        };

        let results = ResultsConfig {
            api_base: env_or("RESULTS_API_BASE", "https://api.sportmonks.com/v3/football"),
            api_token: require("RESULTS_API_TOKEN")?,
            poll_match_window: Duration::from_secs(env_parse("RESULTS_POLL_MATCH_SECS", 300u64)?),
            poll_idle: Duration::from_secs(env_parse("RESULTS_POLL_IDLE_SECS", 1800u64)?),
        };

        let oddyssey = OddysseyConfig {
            cycle_open_time: parse_hhmm(&env_or("ODDYSSEY_CYCLE_OPEN_TIME", "00:10"))?,
            match_count: env_parse("ODDYSSEY_MATCH_COUNT", 10usize)?,
            odds_scaling: env_parse("ODDYSSEY_ODDS_SCALING", 1000u64)?,
        };

        let db = DbConfig {
            url: require("DATABASE_URL")?,
            pool_max: env_parse("DB_POOL_MAX", 20u32)?,
            pool_min: env_parse("DB_POOL_MIN", 5u32)?,
            idle_timeout: Duration::from_secs(env_parse("DB_IDLE_TIMEOUT_SECS", 300u64)?),
            query_timeout: Duration::from_secs(env_parse("DB_QUERY_TIMEOUT_SECS", 30u64)?),
        };
        if db.pool_min > db.pool_max {
            bail!("DB_POOL_MIN ({}) exceeds DB_POOL_MAX ({})", db.pool_min, db.pool_max);
        }

        Ok(Self { rpc, indexer, contracts, oracle, results, oddyssey, db })
    }
}

fn require(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} not set"))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow::anyhow!("{key} has unparseable value {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn address(key: &str) -> Result<Address> {
    let raw = require(key)?;
    Address::from_str(raw.trim()).with_context(|| format!("{key} is not a valid address: {raw:?}"))
}

/// Parse "HH:MM" (24h, optional " UTC" suffix) into (hour, minute).
fn parse_hhmm(raw: &str) -> Result<(u32, u32)> {
    let cleaned = raw.trim().trim_end_matches(" UTC");
    let (h, m) = cleaned
        .split_once(':')
        .with_context(|| format!("expected HH:MM, got {raw:?}"))?;
    let hour: u32 = h.parse().with_context(|| format!("bad hour in {raw:?}"))?;
    let minute: u32 = m.parse().with_context(|| format!("bad minute in {raw:?}"))?;
    if hour > 23 || minute > 59 {
        bail!("time out of range: {raw:?}");
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hhmm() {
        assert_eq!(parse_hhmm("00:10").unwrap(), (0, 10));
        assert_eq!(parse_hhmm("23:59").unwrap(), (23, 59));
        assert_eq!(parse_hhmm("06:00 UTC").unwrap(), (6, 0));
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("sometime").is_err());
    }
}
