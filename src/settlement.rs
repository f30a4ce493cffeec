//! Settlement Coordinator: turns submitted oracle outcomes into settled (or
//! refunded) pools.
//!
//! Runs as a sweep, either on the five-minute schedule or nudged by the
//! indexer when an `OutcomeSubmitted` window commits. Because no global
//! ordering exists across event streams, every decision re-reads on-chain
//! state first. Pool settlements are independent, so the sweep fans out up
//! to eight at a time; the database write per pool takes the pool's
//! advisory lock.

use std::sync::Arc;

use alloy::primitives::{keccak256, Bytes, U256};
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::contracts::abi;
use crate::contracts::{ContractName, ContractRegistry};
use crate::db::models::PoolRow;
use crate::db::{store, Store};
use crate::error::RevertKind;
use crate::rpc::RpcGateway;
use crate::tx::{SendError, TxSender};

/// Upper bound on concurrent settlement transactions.
const SETTLE_CONCURRENCY: usize = 8;

/// Marker used when settlement is observed rather than performed.
const RECONCILED: &str = "reconciled";

pub struct SettlementCoordinator {
    gateway: Arc<RpcGateway>,
    store: Store,
    registry: Arc<ContractRegistry>,
    sender: Arc<TxSender>,
    /// Overlap guard: a sweep already in progress makes new ones no-ops.
    sweeping: Mutex<()>,
}

impl SettlementCoordinator {
    pub fn new(
        gateway: Arc<RpcGateway>,
        store: Store,
        registry: Arc<ContractRegistry>,
        sender: Arc<TxSender>,
    ) -> Self {
        Self { gateway, store, registry, sender, sweeping: Mutex::new(()) }
    }

    /// Settle every due pool. Safe to call from multiple triggers; overlap
    /// is skipped, not queued.
    pub async fn sweep(&self) -> Result<()> {
        let Ok(_guard) = self.sweeping.try_lock() else {
            debug!("[SETTLE] sweep already running, skipping");
            return Ok(());
        };

        let now = Utc::now().timestamp();
        let due = store::unsettled_pools_due(self.store.pool(), now).await?;
        if due.is_empty() {
            return Ok(());
        }
        debug!("[SETTLE] sweeping {} due pools", due.len());

        stream::iter(due)
            .for_each_concurrent(SETTLE_CONCURRENCY, |pool| async move {
                let pool_id = pool.pool_id;
                if let Err(e) = self.settle_pool(pool).await {
                    warn!("[SETTLE] pool {}: {e:#}", pool_id);
                }
            })
            .await;
        Ok(())
    }

    async fn settle_pool(&self, row: PoolRow) -> Result<()> {
        let pool_id = row.pool_id;
        let state = self.fetch_pool_state(pool_id).await?;

        // The chain may have moved since the row was read.
        if state.settled {
            return self.reconcile_settled(pool_id, &state, RECONCILED).await;
        }

        let now = Utc::now().timestamp();
        let event_ended = crate::indexer::u256_to_ts(state.eventEndTime) <= now;
        if !event_ended {
            return Ok(());
        }

        if state.totalBettorStake == U256::ZERO {
            return self.refund_pool(pool_id).await;
        }

        // Need the submitted outcome to settle against.
        let Some(outcome_bytes) = self.read_outcome_bytes(&state.marketId).await? else {
            debug!("[SETTLE] pool {}: oracle outcome not yet set, parked", pool_id);
            return Ok(());
        };

        let result = self.send_settlement(pool_id, &outcome_bytes).await;
        match result {
            Ok(tx_hash) => {
                let fresh = self.fetch_pool_state(pool_id).await?;
                self.reconcile_settled(pool_id, &fresh, &tx_hash).await?;
                info!("[SETTLE] pool {} settled ({})", pool_id, tx_hash);
                Ok(())
            }
            Err(SendError::Reverted(RevertKind::AlreadySettled)) => {
                let fresh = self.fetch_pool_state(pool_id).await?;
                self.reconcile_settled(pool_id, &fresh, RECONCILED).await
            }
            Err(SendError::Reverted(RevertKind::EventNotEnded))
            | Err(SendError::Reverted(RevertKind::OutcomeNotSet)) => {
                // State signals: the next sweep re-evaluates.
                debug!("[SETTLE] pool {} parked until next sweep", pool_id);
                Ok(())
            }
            Err(SendError::InsufficientFunds) => {
                error!("[SETTLE] CRITICAL: bot wallet out of gas funds, settlement halted");
                Err(anyhow::anyhow!("insufficient funds on bot wallet"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// `settlePoolAutomatically` first; contracts predating that entrypoint
    /// reject the selector and get the explicit hash variant.
    async fn send_settlement(
        &self,
        pool_id: i64,
        outcome_bytes: &[u8],
    ) -> Result<String, SendError> {
        let pool_core = self.registry.address(ContractName::PoolCore);

        let auto = abi::settlePoolAutomaticallyCall { poolId: U256::from(pool_id as u64) };
        match self
            .sender
            .send(pool_core, Bytes::from(auto.abi_encode()), "settlePoolAutomatically")
            .await
        {
            Ok(tx) => return Ok(format!("{:#x}", tx.hash)),
            Err(SendError::Reverted(RevertKind::UnknownSelector)) => {
                debug!("[SETTLE] pool {}: automatic entrypoint unavailable", pool_id);
            }
            Err(other) => return Err(other),
        }

        let call = abi::settlePoolCall {
            poolId: U256::from(pool_id as u64),
            outcomeHash: keccak256(outcome_bytes),
        };
        let tx = self
            .sender
            .send(pool_core, Bytes::from(call.abi_encode()), "settlePool")
            .await?;
        Ok(format!("{:#x}", tx.hash))
    }

    /// The no-bets path: nothing to settle, stakes go back to the creator.
    async fn refund_pool(&self, pool_id: i64) -> Result<()> {
        let call = abi::refundPoolCall { poolId: U256::from(pool_id as u64) };
        let sent = self
            .sender
            .send(
                self.registry.address(ContractName::PoolCore),
                Bytes::from(call.abi_encode()),
                "refundPool",
            )
            .await;

        match sent {
            Ok(tx) => {
                let tx_hash = format!("{:#x}", tx.hash);
                let mut db_tx = self.store.begin().await?;
                store::lock_pool(&mut db_tx, pool_id).await?;
                store::mark_pool_refunded(&mut db_tx, pool_id, Some(&tx_hash)).await?;
                db_tx.commit().await?;
                info!("[SETTLE] pool {} refunded ({})", pool_id, tx_hash);
                Ok(())
            }
            Err(SendError::Reverted(RevertKind::RefundNotEligible))
            | Err(SendError::Reverted(RevertKind::EventNotEnded)) => {
                debug!("[SETTLE] pool {}: refund not eligible yet", pool_id);
                Ok(())
            }
            Err(SendError::Reverted(RevertKind::AlreadySettled)) => {
                let fresh = self.fetch_pool_state(pool_id).await?;
                self.reconcile_settled(pool_id, &fresh, RECONCILED).await
            }
            Err(SendError::InsufficientFunds) => {
                error!("[SETTLE] CRITICAL: bot wallet out of gas funds, refunds halted");
                Err(anyhow::anyhow!("insufficient funds on bot wallet"))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bring the mirror in line with a pool the chain considers settled.
    async fn reconcile_settled(
        &self,
        pool_id: i64,
        state: &abi::PoolState,
        tx_hash: &str,
    ) -> Result<()> {
        let result_hex = format!("{:#x}", state.result);
        let mut db_tx = self.store.begin().await?;
        store::lock_pool(&mut db_tx, pool_id).await?;
        store::mark_pool_settled(&mut db_tx, pool_id, &result_hex, state.creatorSideWon, tx_hash)
            .await?;
        db_tx.commit().await?;
        Ok(())
    }

    async fn fetch_pool_state(&self, pool_id: i64) -> Result<abi::PoolState> {
        let call = abi::poolsCall { poolId: U256::from(pool_id as u64) };
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::PoolCore),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .with_context(|| format!("pools({pool_id}) view call failed"))?;
        abi::poolsCall::abi_decode_returns(&raw)
            .with_context(|| format!("pools({pool_id}) returned undecodable data"))
    }

    async fn read_outcome_bytes(&self, market_id: &str) -> Result<Option<Vec<u8>>> {
        let call = abi::outcomesCall { marketId: market_id.to_string() };
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::GuidedOracle),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .with_context(|| format!("outcomes({market_id}) view call failed"))?;
        let ret = abi::outcomesCall::abi_decode_returns(&raw)
            .with_context(|| format!("outcomes({market_id}) returned undecodable data"))?;
        Ok(ret.isSet.then(|| ret.result.to_vec()))
    }

    /// Long-running listener for indexer nudges; the periodic sweep is
    /// scheduled separately.
    pub async fn run_nudge_listener(self: Arc<Self>, flags: Arc<crate::flags::SyncFlags>) {
        loop {
            flags.settlement_nudged().await;
            if let Err(e) = self.sweep().await {
                warn!("[SETTLE] nudged sweep failed: {e:#}");
            }
        }
    }
}
