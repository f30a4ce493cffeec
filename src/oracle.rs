//! Oracle Submitter: pushes finished external outcomes into the guided
//! oracle contract, at most once per market id.
//!
//! The pipeline is pull-based: every tick queries for guided, unsettled
//! pools whose fixture has finished and which have no submission row yet.
//! Before sending, the contract's own `outcomes()` view is consulted: a
//! crash between a mined transaction and the local commit must not produce
//! a second submission after restart.

use std::sync::Arc;

use alloy::primitives::Bytes;
use alloy::sol_types::SolCall;
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::contracts::abi;
use crate::contracts::{ContractName, ContractRegistry};
use crate::db::models::OutcomeType;
use crate::db::store::{self, PendingSubmission};
use crate::db::Store;
use crate::results::outcomes::{both_teams_to_score, one_x_two, over_under_25};
use crate::rpc::RpcGateway;
use crate::tx::{SendError, TxSender};

/// Marker stored instead of a transaction hash when a submission was found
/// already set on-chain rather than sent by this process.
const RECONCILED: &str = "reconciled";

pub struct OracleSubmitter {
    gateway: Arc<RpcGateway>,
    store: Store,
    registry: Arc<ContractRegistry>,
    sender: Arc<TxSender>,
}

impl OracleSubmitter {
    pub fn new(
        gateway: Arc<RpcGateway>,
        store: Store,
        registry: Arc<ContractRegistry>,
        sender: Arc<TxSender>,
    ) -> Self {
        Self { gateway, store, registry, sender }
    }

    /// One scheduler tick: submit every outstanding outcome.
    pub async fn submit_pending(&self) -> Result<()> {
        let pending = store::pending_submissions(self.store.pool()).await?;
        if pending.is_empty() {
            return Ok(());
        }

        // Several pools can share one market id; one submission covers all.
        let mut seen = std::collections::HashSet::new();
        let mut submitted = 0usize;
        for item in &pending {
            if !seen.insert(item.market_id.clone()) {
                continue;
            }
            match self.submit_one(item).await {
                Ok(true) => submitted += 1,
                Ok(false) => {}
                Err(e) => warn!("[ORACLE] market {}: {e:#}", item.market_id),
            }
        }
        if submitted > 0 {
            info!("[ORACLE] submitted {} outcomes this tick", submitted);
        }
        Ok(())
    }

    /// Returns Ok(true) when a transaction was sent and confirmed.
    async fn submit_one(&self, item: &PendingSubmission) -> Result<bool> {
        let Some(result) = derive_result(item) else {
            warn!(
                "[ORACLE] market {}: outcome type {} not derivable from stored scores",
                item.market_id, item.outcome_type
            );
            return Ok(false);
        };

        // Double-check against the DB guard; the query already filters, but
        // a concurrent tick may have won the race since.
        if store::submission_exists(self.store.pool(), &item.market_id).await? {
            return Ok(false);
        }

        // Consult the contract before sending: a restart mid-flight leaves
        // `isSet = true` with no local row.
        if let Some(existing) = self.read_existing_outcome(&item.market_id).await? {
            store::record_submission(
                self.store.pool(),
                &item.market_id,
                &existing,
                RECONCILED,
                0,
            )
            .await?;
            info!(
                "[ORACLE] market {} already set on-chain ({:?}), recorded without sending",
                item.market_id, existing
            );
            return Ok(false);
        }

        let call = abi::submitOutcomeCall {
            marketId: item.market_id.clone(),
            outcome: Bytes::from(result.clone().into_bytes()),
        };
        let outcome = self
            .sender
            .send(
                self.registry.address(ContractName::GuidedOracle),
                Bytes::from(call.abi_encode()),
                "submitOutcome",
            )
            .await;

        match outcome {
            Ok(tx) => {
                let inserted = store::record_submission(
                    self.store.pool(),
                    &item.market_id,
                    &result,
                    &format!("{:#x}", tx.hash),
                    tx.block_number as i64,
                )
                .await?;
                if !inserted {
                    // Unique key lost to a concurrent submitter; the chain
                    // rejects the duplicate anyway.
                    warn!("[ORACLE] market {}: submission row already present", item.market_id);
                }
                info!(
                    "[ORACLE] market {} -> {:?} ({:#x})",
                    item.market_id, result, tx.hash
                );
                Ok(true)
            }
            Err(SendError::Reverted(kind)) if kind == crate::error::RevertKind::OutcomeAlreadyExists => {
                // Someone beat us to it between the view read and the send.
                store::record_submission(self.store.pool(), &item.market_id, &result, RECONCILED, 0)
                    .await?;
                Ok(false)
            }
            Err(SendError::Reverted(kind)) if kind.is_fatal() => {
                Err(anyhow::anyhow!("fatal revert submitting {}: {kind}", item.market_id))
            }
            // Failed or timed-out sends leave no row; the next tick retries.
            Err(e) => {
                warn!("[ORACLE] market {} submission failed: {e}", item.market_id);
                Ok(false)
            }
        }
    }

    async fn read_existing_outcome(&self, market_id: &str) -> Result<Option<String>> {
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
        if ret.isSet {
            Ok(Some(String::from_utf8_lossy(&ret.result).to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Recompute the result string from stored scores; never trusts the cached
/// outcome columns.
pub fn derive_result(item: &PendingSubmission) -> Option<String> {
    match OutcomeType::parse(&item.outcome_type)? {
        OutcomeType::OneXTwo => Some(one_x_two(item.home_score, item.away_score)),
        OutcomeType::OverUnder25 => Some(over_under_25(item.home_score, item.away_score)),
        OutcomeType::BothTeamsToScore => {
            Some(both_teams_to_score(item.home_score, item.away_score))
        }
        OutcomeType::HalfTimeOneXTwo => match (item.ht_home_score, item.ht_away_score) {
            (Some(h), Some(a)) => Some(one_x_two(h, a)),
            _ => None,
        },
        OutcomeType::HalfTimeOverUnder => match (item.ht_home_score, item.ht_away_score) {
            (Some(h), Some(a)) => Some(over_under_25(h, a)),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(outcome_type: &str, home: i32, away: i32) -> PendingSubmission {
        PendingSubmission {
            pool_id: 42,
            market_id: "19391153".to_string(),
            outcome_type: outcome_type.to_string(),
            fixture_id: 19391153,
            home_score: home,
            away_score: away,
            ht_home_score: None,
            ht_away_score: None,
        }
    }

    #[test]
    fn test_derive_result_families() {
        assert_eq!(derive_result(&pending("1X2", 2, 1)).as_deref(), Some("1"));
        assert_eq!(derive_result(&pending("1X2", 0, 0)).as_deref(), Some("X"));
        assert_eq!(derive_result(&pending("OU25", 2, 1)).as_deref(), Some("Over"));
        assert_eq!(derive_result(&pending("OU25", 1, 1)).as_deref(), Some("Under"));
        assert_eq!(derive_result(&pending("BTTS", 1, 1)).as_deref(), Some("Yes"));
    }

    #[test]
    fn test_derive_result_half_time_needs_scores() {
        let mut item = pending("HT_1X2", 2, 1);
        assert_eq!(derive_result(&item), None);
        item.ht_home_score = Some(1);
        item.ht_away_score = Some(0);
        assert_eq!(derive_result(&item).as_deref(), Some("1"));
    }

    #[test]
    fn test_derive_result_unknown_type() {
        assert_eq!(derive_result(&pending("CORNERS", 2, 1)), None);
    }
}
