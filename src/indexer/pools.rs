//! Pool Mirror: projects pool-contract events into the pools/bets tables.
//!
//! Events carry only identifiers; the mirror reads the full pool struct back
//! through the `pools(uint256)` view and upserts it. Guided football pools
//! additionally get a prediction-market row linking them to the external
//! fixture so the oracle submitter can find them.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{info, warn};

use crate::contracts::abi::{self, ORACLE_TYPE_GUIDED};
use crate::contracts::registry::indexed_string_topic;
use crate::contracts::{bytes32_to_string, ContractName, ContractRegistry};
use crate::db::models::{parse_u256, FlagConflict, OracleType, OutcomeType, PoolFlags};
use crate::db::{store, Store};
use crate::rpc::{RpcGateway, RpcLog};

use super::{u256_to_i64, u256_to_ts, EventHandler};

pub struct PoolMirror {
    gateway: Arc<RpcGateway>,
    store: Store,
    registry: Arc<ContractRegistry>,
}

impl PoolMirror {
    pub fn new(gateway: Arc<RpcGateway>, store: Store, registry: Arc<ContractRegistry>) -> Self {
        Self { gateway, store, registry }
    }

    /// Read the full pool struct from the chain.
    async fn fetch_pool_state(&self, pool_id: i64) -> Result<abi::PoolState> {
        let call = abi::poolsCall { poolId: U256::from(pool_id as u64) };
        let data = Bytes::from(call.abi_encode());
        let raw = self
            .gateway
            .call(self.registry.address(ContractName::PoolCore), &data)
            .await
            .with_context(|| format!("pools({pool_id}) view call failed"))?;
        abi::poolsCall::abi_decode_returns(&raw)
            .with_context(|| format!("pools({pool_id}) returned undecodable data"))
    }

    async fn fetch_pool_count(&self) -> Result<i64> {
        let call = abi::poolCountCall {};
        let data = Bytes::from(call.abi_encode());
        let raw = self
            .gateway
            .call(self.registry.address(ContractName::PoolCore), &data)
            .await
            .context("poolCount() view call failed")?;
        let count = abi::poolCountCall::abi_decode_returns(&raw)
            .context("poolCount() returned undecodable data")?;
        u256_to_i64(count, "poolCount")
    }

    fn to_upsert(&self, pool_id: i64, state: &abi::PoolState) -> Result<store::PoolUpsert> {
        let flags = PoolFlags::build(
            state.settled,
            state.creatorSideWon,
            state.isPrivate,
            state.usesBitr,
            false,
        )?;
        Ok(store::PoolUpsert {
            pool_id,
            creator: format!("{:#x}", state.creator),
            odds: state.odds as i32,
            predicted_outcome: bytes32_to_string(&state.predictedOutcome),
            result_hash: if state.result == B256::ZERO {
                String::new()
            } else {
                format!("{:#x}", state.result)
            },
            creator_stake: state.creatorStake.to_string(),
            total_creator_side_stake: state.totalCreatorSideStake.to_string(),
            total_bettor_stake: state.totalBettorStake.to_string(),
            max_bettor_stake: state.maxBettorStake.to_string(),
            event_start_time: u256_to_ts(state.eventStartTime),
            event_end_time: u256_to_ts(state.eventEndTime),
            betting_end_time: u256_to_ts(state.bettingEndTime),
            arbitration_deadline: u256_to_ts(state.arbitrationDeadline),
            oracle_type: OracleType::from_code(state.oracleType).as_str().to_string(),
            market_type: state.marketType as i32,
            market_id: state.marketId.clone(),
            flags,
            league: bytes32_to_string(&state.league),
            category: bytes32_to_string(&state.category),
            region: bytes32_to_string(&state.region),
            home_team: bytes32_to_string(&state.homeTeam),
            away_team: bytes32_to_string(&state.awayTeam),
            title: bytes32_to_string(&state.title),
        })
    }

    /// Hydrate one pool into the given connection, creating the prediction
    /// market row for guided football pools.
    async fn hydrate_pool(&self, conn: &mut PgConnection, pool_id: i64) -> Result<()> {
        let state = self.fetch_pool_state(pool_id).await?;
        let upsert = self.to_upsert(pool_id, &state)?;
        store::upsert_pool(conn, &upsert).await?;

        let is_guided = state.oracleType == ORACLE_TYPE_GUIDED;
        let is_football = upsert.category.eq_ignore_ascii_case("football");
        if is_guided && is_football && !state.marketId.is_empty() {
            self.link_prediction_market(conn, pool_id, &state, &upsert.predicted_outcome)
                .await?;
        }
        Ok(())
    }

    async fn link_prediction_market(
        &self,
        conn: &mut PgConnection,
        pool_id: i64,
        state: &abi::PoolState,
        predicted: &str,
    ) -> Result<()> {
        let Some(outcome_type) = OutcomeType::infer(predicted) else {
            store::record_anomaly_tx(
                conn,
                "pool-mirror",
                &format!("pool {pool_id}: cannot infer outcome family from {predicted:?}"),
            )
            .await?;
            return Ok(());
        };
        let Ok(fixture_id) = state.marketId.parse::<i64>() else {
            store::record_anomaly_tx(
                conn,
                "pool-mirror",
                &format!("pool {pool_id}: market id {:?} is not a fixture id", state.marketId),
            )
            .await?;
            return Ok(());
        };

        let hash = indexed_string_topic(&state.marketId);
        store::upsert_prediction_market(
            conn,
            pool_id,
            &state.marketId,
            &format!("{hash:#x}"),
            fixture_id,
            outcome_type.as_str(),
            predicted,
        )
        .await
    }

    /// Ensure a pool row exists before applying a mutation to it. Covers
    /// pools whose creation predates the stream cursor.
    async fn ensure_pool(&self, conn: &mut PgConnection, pool_id: i64) -> Result<()> {
        if store::pool_by_id_tx(conn, pool_id).await?.is_none() {
            self.hydrate_pool(conn, pool_id).await?;
        }
        Ok(())
    }

    /// Mirrored bettor-side totals must equal the sum of indexed for-outcome
    /// bets. A divergence with zero indexed bets is the historical-gap
    /// signature (unreconstructable, journalled); with some bets indexed it
    /// means the mirror drifted, and the on-chain value wins.
    async fn verify_stake_conservation(&self) -> Result<()> {
        for row in store::open_pools(self.store.pool()).await? {
            let indexed =
                parse_u256(&store::bettor_stake_sum(self.store.pool(), row.pool_id).await?);
            let mirrored = row.total_bettor_stake_u256();
            if indexed == mirrored {
                continue;
            }

            if indexed == U256::ZERO {
                store::record_anomaly(
                    self.store.pool(),
                    "pool-mirror",
                    &format!(
                        "pool {}: bettor stake {} on record with no indexed bets \
                         (history beyond log retention)",
                        row.pool_id, row.total_bettor_stake
                    ),
                )
                .await?;
                continue;
            }

            let state = self.fetch_pool_state(row.pool_id).await?;
            let mut tx = self.store.begin().await?;
            store::lock_pool(&mut tx, row.pool_id).await?;
            store::reconcile_bettor_stake(&mut tx, row.pool_id, &state.totalBettorStake.to_string())
                .await?;
            store::record_anomaly_tx(
                &mut tx,
                "pool-mirror",
                &format!(
                    "pool {}: mirrored bettor stake {} != indexed sum {}, reset from chain",
                    row.pool_id, mirrored, indexed
                ),
            )
            .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventHandler for PoolMirror {
    fn stream(&self) -> &'static str {
        "pool_core"
    }

    fn address(&self) -> Address {
        self.registry.address(ContractName::PoolCore)
    }

    fn topics(&self) -> Vec<B256> {
        self.registry.pool_core_topics()
    }

    async fn handle(&self, conn: &mut PgConnection, logs: &[RpcLog]) -> Result<()> {
        for log in logs {
            let Some(topic0) = log.topics.first().copied() else { continue };
            let tx_hash = format!("{:#x}", log.transaction_hash);

            if topic0 == abi::PoolCreated::SIGNATURE_HASH {
                let ev = abi::PoolCreated::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.hydrate_pool(conn, pool_id).await?;
                info!("[MIRROR] pool {} created by {:#x}", pool_id, ev.creator);
            } else if topic0 == abi::BetPlaced::SIGNATURE_HASH {
                let ev = abi::BetPlaced::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.ensure_pool(conn, pool_id).await?;
                store::apply_bet(
                    conn,
                    &tx_hash,
                    log.log_index as i64,
                    pool_id,
                    &format!("{:#x}", ev.bettor),
                    &ev.amount.to_string(),
                    ev.isForOutcome,
                    log.block_number as i64,
                )
                .await?;
            } else if topic0 == abi::LiquidityAdded::SIGNATURE_HASH {
                let ev = abi::LiquidityAdded::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.ensure_pool(conn, pool_id).await?;
                store::adjust_creator_side_stake(conn, pool_id, &ev.amount.to_string(), 1).await?;
            } else if topic0 == abi::LiquidityRemoved::SIGNATURE_HASH {
                let ev =
                    abi::LiquidityRemoved::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.ensure_pool(conn, pool_id).await?;
                store::adjust_creator_side_stake(conn, pool_id, &ev.amount.to_string(), -1).await?;
            } else if topic0 == abi::PoolSettled::SIGNATURE_HASH {
                let ev = abi::PoolSettled::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.ensure_pool(conn, pool_id).await?;
                let result_hex = format!("{:#x}", ev.result);
                match store::mark_pool_settled(conn, pool_id, &result_hex, ev.creatorSideWon, &tx_hash)
                    .await
                {
                    Ok(()) => {
                        info!(
                            "[MIRROR] pool {} settled (creator side won: {})",
                            pool_id, ev.creatorSideWon
                        );
                    }
                    Err(e) if e.is::<FlagConflict>() => {
                        // The chain settled a pool we have as refunded: the
                        // chain wins, but the divergence goes on record.
                        store::record_anomaly_tx(
                            conn,
                            "pool-mirror",
                            &format!("pool {pool_id}: PoolSettled arrived for a refunded pool"),
                        )
                        .await?;
                    }
                    Err(e) => return Err(e),
                }
            } else if topic0 == abi::PoolRefunded::SIGNATURE_HASH {
                let ev = abi::PoolRefunded::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let pool_id = u256_to_i64(ev.poolId, "poolId")?;
                store::lock_pool(conn, pool_id).await?;
                self.ensure_pool(conn, pool_id).await?;
                match store::mark_pool_refunded(conn, pool_id, Some(&tx_hash)).await {
                    Ok(()) => info!("[MIRROR] pool {} refunded ({})", pool_id, ev.reason),
                    Err(e) if e.is::<FlagConflict>() => {
                        store::record_anomaly_tx(
                            conn,
                            "pool-mirror",
                            &format!("pool {pool_id}: PoolRefunded arrived for a settled pool"),
                        )
                        .await?;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// Startup reconciliation: any pool id the chain knows and the mirror
    /// does not is rebuilt from the view, then mirrored bettor-side totals
    /// are checked against the sum of indexed bets.
    async fn backfill(&self) -> Result<()> {
        let on_chain = self.fetch_pool_count().await?;
        let mirrored = store::max_pool_id(self.store.pool()).await?.map_or(0, |m| m + 1);

        if on_chain > mirrored {
            info!(
                "[MIRROR] backfilling pools {}..{} from chain state",
                mirrored,
                on_chain - 1
            );
            for pool_id in mirrored..on_chain {
                let mut tx = self.store.begin().await?;
                if let Err(e) = self.hydrate_pool(&mut tx, pool_id).await {
                    warn!("[MIRROR] backfill of pool {} failed: {e:#}", pool_id);
                    continue;
                }
                tx.commit().await?;
            }
        }

        self.verify_stake_conservation().await
    }
}
