//! Mirrors `OutcomeSubmitted` events from the guided oracle.
//!
//! The event indexes its `string marketId`, so the topic only carries
//! `keccak256(marketId)`; prediction-market rows store that hash at creation
//! time and the handler joins on it. After a window with submissions
//! commits, the settlement coordinator is nudged to sweep.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, info};

use crate::contracts::abi;
use crate::contracts::{ContractName, ContractRegistry};
use crate::db::store;
use crate::flags::SyncFlags;
use crate::rpc::RpcLog;

use super::EventHandler;

pub struct OracleEvents {
    registry: Arc<ContractRegistry>,
    flags: Arc<SyncFlags>,
    /// Set inside `handle` when a window contained submissions; consumed by
    /// `after_commit` to fire the nudge only for committed work.
    saw_submission: AtomicBool,
}

impl OracleEvents {
    pub fn new(registry: Arc<ContractRegistry>, flags: Arc<SyncFlags>) -> Self {
        Self { registry, flags, saw_submission: AtomicBool::new(false) }
    }
}

#[async_trait]
impl EventHandler for OracleEvents {
    fn stream(&self) -> &'static str {
        "guided_oracle"
    }

    fn address(&self) -> Address {
        self.registry.address(ContractName::GuidedOracle)
    }

    fn topics(&self) -> Vec<B256> {
        self.registry.guided_oracle_topics()
    }

    async fn handle(&self, conn: &mut PgConnection, logs: &[RpcLog]) -> Result<()> {
        self.saw_submission.store(false, Ordering::Relaxed);

        for log in logs {
            if log.topics.first().copied() != Some(abi::OutcomeSubmitted::SIGNATURE_HASH) {
                continue;
            }
            let ev = abi::OutcomeSubmitted::decode_raw_log(log.topics.iter().copied(), &log.data)?;
            // topic1 = keccak256(marketId); the string itself is not
            // recoverable from the log.
            let Some(market_hash) = log.topics.get(1) else { continue };
            let hash_hex = format!("{market_hash:#x}");
            let outcome = String::from_utf8_lossy(&ev.outcome).to_string();
            let tx_hash = format!("{:#x}", log.transaction_hash);

            let markets = store::markets_by_hash_tx(conn, &hash_hex).await?;
            if markets.is_empty() {
                debug!(
                    "[ORACLE] OutcomeSubmitted for unknown market hash {} (outcome {:?})",
                    hash_hex, outcome
                );
                continue;
            }

            for market in &markets {
                store::mark_market_resolved(conn, market.pool_id, &market.market_id, &outcome)
                    .await?;
                // Mirror the submission even when someone else sent it, so
                // the at-most-once guard covers external submitters too.
                store::record_submission_tx(
                    conn,
                    &market.market_id,
                    &outcome,
                    &tx_hash,
                    log.block_number as i64,
                )
                .await?;
                info!(
                    "[ORACLE] outcome {:?} recorded for market {} (pool {})",
                    outcome, market.market_id, market.pool_id
                );
            }
            self.saw_submission.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn after_commit(&self, _logs: &[RpcLog]) {
        if self.saw_submission.swap(false, Ordering::Relaxed) {
            self.flags.nudge_settlement();
        }
    }
}
