//! Mirrors Oddyssey contract events: slips placed, cycles resolved, slip
//! evaluations, and prize claims.
//!
//! Slip rows are hydrated through `getSlip(slipId)` because the placement
//! event does not carry the predictions array.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, info, warn};

use crate::contracts::abi;
use crate::contracts::{bytes32_to_string, ContractName, ContractRegistry};
use crate::db::models::{BetType, Prediction};
use crate::db::{store, Store};
use crate::rpc::{RpcGateway, RpcLog};

use super::{u256_to_i64, u256_to_ts, EventHandler};

pub struct OddysseyMirror {
    gateway: Arc<RpcGateway>,
    store: Store,
    registry: Arc<ContractRegistry>,
}

impl OddysseyMirror {
    pub fn new(gateway: Arc<RpcGateway>, store: Store, registry: Arc<ContractRegistry>) -> Self {
        Self { gateway, store, registry }
    }

    async fn fetch_slip(&self, slip_id: i64) -> Result<abi::SlipState> {
        let call = abi::getSlipCall { slipId: U256::from(slip_id as u64) };
        let data = Bytes::from(call.abi_encode());
        let raw = self
            .gateway
            .call(self.registry.address(ContractName::Oddyssey), &data)
            .await
            .with_context(|| format!("getSlip({slip_id}) view call failed"))?;
        abi::getSlipCall::abi_decode_returns(&raw)
            .with_context(|| format!("getSlip({slip_id}) returned undecodable data"))
    }

    async fn fetch_slip_count(&self) -> Result<i64> {
        let call = abi::slipCountCall {};
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::Oddyssey),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .context("slipCount() view call failed")?;
        let count = abi::slipCountCall::abi_decode_returns(&raw)
            .context("slipCount() returned undecodable data")?;
        u256_to_i64(count, "slipCount")
    }

    fn to_predictions(slip: &abi::SlipState) -> Vec<Prediction> {
        slip.predictions
            .iter()
            .map(|p| Prediction {
                fixture_id: p.matchId as i64,
                bet_type: BetType::from_code(p.betType),
                selection: bytes32_to_string(&p.selection),
                selected_odd: p.selectedOdd as u64,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for OddysseyMirror {
    fn stream(&self) -> &'static str {
        "oddyssey"
    }

    fn address(&self) -> Address {
        self.registry.address(ContractName::Oddyssey)
    }

    fn topics(&self) -> Vec<B256> {
        self.registry.oddyssey_topics()
    }

    async fn handle(&self, conn: &mut PgConnection, logs: &[RpcLog]) -> Result<()> {
        for log in logs {
            let Some(topic0) = log.topics.first().copied() else { continue };
            let tx_hash = format!("{:#x}", log.transaction_hash);

            if topic0 == abi::SlipPlaced::SIGNATURE_HASH {
                let ev = abi::SlipPlaced::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let cycle_id = u256_to_i64(ev.cycleId, "cycleId")?;
                let slip_id = u256_to_i64(ev.slipId, "slipId")?;

                if store::cycle_by_id(self.store.pool(), cycle_id).await?.is_none() {
                    // A slip for a cycle this operator never opened; the
                    // foreign key would reject it, so journal and move on.
                    store::record_anomaly_tx(
                        conn,
                        "oddyssey-mirror",
                        &format!("slip {slip_id} references unknown cycle {cycle_id}"),
                    )
                    .await?;
                    continue;
                }

                let slip = self.fetch_slip(slip_id).await?;
                let predictions = Self::to_predictions(&slip);
                store::upsert_slip(
                    conn,
                    slip_id,
                    cycle_id,
                    &format!("{:#x}", ev.player),
                    u256_to_ts(slip.placedAt),
                    &predictions,
                )
                .await?;
                debug!("[ODDYSSEY] slip {} placed in cycle {}", slip_id, cycle_id);
            } else if topic0 == abi::CycleStarted::SIGNATURE_HASH {
                let ev = abi::CycleStarted::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                debug!(
                    "[ODDYSSEY] cycle {} start observed on-chain",
                    u256_to_i64(ev.cycleId, "cycleId")?
                );
            } else if topic0 == abi::CycleResolved::SIGNATURE_HASH {
                let ev = abi::CycleResolved::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let cycle_id = u256_to_i64(ev.cycleId, "cycleId")?;
                store::mirror_cycle_resolved(conn, cycle_id, &tx_hash, &ev.prizePool.to_string())
                    .await?;
                info!(
                    "[ODDYSSEY] cycle {} resolved on-chain (prize pool {})",
                    cycle_id, ev.prizePool
                );
            } else if topic0 == abi::SlipEvaluated::SIGNATURE_HASH {
                let ev = abi::SlipEvaluated::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let slip_id = u256_to_i64(ev.slipId, "slipId")?;
                store::mirror_slip_evaluation(
                    conn,
                    slip_id,
                    ev.correctCount as i32,
                    &ev.finalScore.to_string(),
                )
                .await?;
            } else if topic0 == abi::PrizeClaimed::SIGNATURE_HASH {
                let ev = abi::PrizeClaimed::decode_raw_log(log.topics.iter().copied(), &log.data)?;
                let cycle_id = u256_to_i64(ev.cycleId, "cycleId")?;
                store::mark_prize_claimed(conn, cycle_id, &format!("{:#x}", ev.player), &tx_hash)
                    .await?;
                info!("[ODDYSSEY] prize claimed in cycle {} by {:#x}", cycle_id, ev.player);
            }
        }
        Ok(())
    }

    /// Startup reconciliation: slips placed while the relay was down are
    /// rebuilt from `getSlip`, the same way the pool mirror rebuilds pools.
    async fn backfill(&self) -> Result<()> {
        let on_chain = self.fetch_slip_count().await?;
        let mirrored = store::max_slip_id(self.store.pool()).await?.map_or(0, |m| m + 1);
        if on_chain <= mirrored {
            return Ok(());
        }

        info!("[ODDYSSEY] backfilling slips {}..{} from chain state", mirrored, on_chain - 1);
        for slip_id in mirrored..on_chain {
            let slip = match self.fetch_slip(slip_id).await {
                Ok(s) => s,
                Err(e) => {
                    warn!("[ODDYSSEY] backfill of slip {} failed: {e:#}", slip_id);
                    continue;
                }
            };
            let cycle_id = u256_to_i64(slip.cycleId, "cycleId")?;
            if store::cycle_by_id(self.store.pool(), cycle_id).await?.is_none() {
                store::record_anomaly(
                    self.store.pool(),
                    "oddyssey-mirror",
                    &format!("backfilled slip {slip_id} references unknown cycle {cycle_id}"),
                )
                .await?;
                continue;
            }

            let predictions = Self::to_predictions(&slip);
            let mut tx = self.store.begin().await?;
            store::upsert_slip(
                &mut tx,
                slip_id,
                cycle_id,
                &format!("{:#x}", slip.player),
                u256_to_ts(slip.placedAt),
                &predictions,
            )
            .await?;
            tx.commit().await?;
        }
        Ok(())
    }
}
