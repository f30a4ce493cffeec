//! Cycle lifecycle driver.
//!
//! Walks one cycle per day through its states: today's selection is opened
//! on-chain at the configured time, mirrored slips accumulate while Active,
//! the cycle Ends when the chain clock passes its end time, and once all ten
//! fixtures are terminal the resolution tuple is submitted. A fixture the
//! provider cancels blocks resolution until two hours past its scheduled
//! kick-off, then resolves as not-applicable.

use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::OddysseyConfig;
use crate::contracts::abi::{self, moneyline_code, over_under_code};
use crate::contracts::{ContractName, ContractRegistry};
use crate::db::models::{CycleMatch, CycleState, FixtureRow, FixtureStatus, ResolvedSlot};
use crate::db::{store, Store};
use crate::indexer::{u256_to_i64, u256_to_ts};
use crate::results::outcomes::{one_x_two, over_under_25};
use crate::rpc::RpcGateway;
use crate::tx::TxSender;

/// Grace period after kick-off before a cancelled slot becomes
/// not-applicable.
const CANCELLED_GRACE_SECS: i64 = 2 * 3600;

pub struct CycleDriver {
    gateway: Arc<RpcGateway>,
    store: Store,
    registry: Arc<ContractRegistry>,
    sender: Arc<TxSender>,
    cfg: OddysseyConfig,
}

impl CycleDriver {
    pub fn new(
        gateway: Arc<RpcGateway>,
        store: Store,
        registry: Arc<ContractRegistry>,
        sender: Arc<TxSender>,
        cfg: OddysseyConfig,
    ) -> Self {
        Self { gateway, store, registry, sender, cfg }
    }

    /// Open today's cycle on-chain from the staged selection. No-op when a
    /// cycle is already active (exactly one may exist at a time) or when no
    /// selection was staged.
    pub async fn open_cycle(&self) -> Result<()> {
        if let Some(active) = store::active_cycle(self.store.pool()).await? {
            debug!("[ODDYSSEY] cycle {} still active, not opening another", active.cycle_id);
            return Ok(());
        }

        let today = Utc::now().date_naive().to_string();
        let matches = store::daily_matches(self.store.pool(), &today).await?;
        if matches.is_empty() {
            debug!("[ODDYSSEY] no staged selection for {}, nothing to open", today);
            return Ok(());
        }
        if matches.len() != self.cfg.match_count {
            bail!(
                "staged selection for {} has {} matches, contract requires {}",
                today,
                matches.len(),
                self.cfg.match_count
            );
        }

        let fixtures = to_cycle_fixtures(&matches)?;
        let call = abi::startDailyCycleCall { fixtures };
        let tx = self
            .sender
            .send(
                self.registry.address(ContractName::Oddyssey),
                Bytes::from(call.abi_encode()),
                "startDailyCycle",
            )
            .await
            .context("startDailyCycle failed")?;

        // The contract assigns the cycle id and end time; read them back.
        let cycle_id = self.current_cycle_id().await?;
        if !self.cycle_initialized(cycle_id).await? {
            bail!("cycle {cycle_id} not initialised after startDailyCycle receipt");
        }
        let (start_time, end_time) = self.cycle_times(cycle_id).await?;

        store::insert_cycle(
            self.store.pool(),
            cycle_id,
            CycleState::Active,
            start_time,
            end_time,
            &matches,
            &format!("{:#x}", tx.hash),
        )
        .await?;
        info!(
            "[ODDYSSEY] cycle {} opened with {} matches, betting until {}",
            cycle_id,
            matches.len(),
            end_time
        );
        Ok(())
    }

    /// Advance Active cycles past their end time, then resolve any Ended
    /// cycle whose fixtures have all reached a terminal state.
    pub async fn resolve_due_cycles(&self) -> Result<()> {
        let now = Utc::now().timestamp();

        for cycle in store::cycles_in_state(self.store.pool(), CycleState::Active).await? {
            if cycle.end_time.is_some_and(|end| end <= now) {
                store::set_cycle_state(self.store.pool(), cycle.cycle_id, CycleState::Ended).await?;
                info!("[ODDYSSEY] cycle {} ended, awaiting results", cycle.cycle_id);
            }
        }

        for cycle in store::cycles_in_state(self.store.pool(), CycleState::Ended).await? {
            if let Err(e) = self.try_resolve(cycle.cycle_id, &cycle.matches_data.0, now).await {
                warn!("[ODDYSSEY] cycle {} resolution attempt failed: {e:#}", cycle.cycle_id);
            }
        }
        Ok(())
    }

    async fn try_resolve(&self, cycle_id: i64, matches: &[CycleMatch], now: i64) -> Result<()> {
        let mut slots = Vec::with_capacity(matches.len());
        for m in matches {
            let fixture = store::fixture_by_id(self.store.pool(), m.fixture_id)
                .await?
                .with_context(|| format!("cycle fixture {} missing from catalogue", m.fixture_id))?;
            match slot_resolution(&fixture, now) {
                Some(slot) => slots.push(slot),
                None => {
                    debug!(
                        "[ODDYSSEY] cycle {}: fixture {} not terminal yet",
                        cycle_id, m.fixture_id
                    );
                    return Ok(());
                }
            }
        }

        store::set_cycle_ready(self.store.pool(), cycle_id, &slots).await?;

        let results: Vec<abi::FixtureResult> = slots
            .iter()
            .map(|s| abi::FixtureResult { moneyline: s.moneyline, overUnder: s.over_under })
            .collect();
        let results: [abi::FixtureResult; 10] = results
            .try_into()
            .map_err(|_| anyhow::anyhow!("cycle {cycle_id} does not have exactly ten slots"))?;

        let call = abi::resolveDailyCycleCall { cycleId: U256::from(cycle_id as u64), results };
        let tx = self
            .sender
            .send(
                self.registry.address(ContractName::Oddyssey),
                Bytes::from(call.abi_encode()),
                "resolveDailyCycle",
            )
            .await
            .with_context(|| format!("resolveDailyCycle({cycle_id}) failed"))?;

        store::set_cycle_resolved(self.store.pool(), cycle_id, &format!("{:#x}", tx.hash)).await?;
        let slips = self.daily_slip_count(cycle_id).await.unwrap_or(0);
        info!(
            "[ODDYSSEY] cycle {} resolved with {} slips ({:#x})",
            cycle_id, slips, tx.hash
        );
        Ok(())
    }

    async fn current_cycle_id(&self) -> Result<i64> {
        let call = abi::getCurrentCycleCall {};
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::Oddyssey),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .context("getCurrentCycle() view call failed")?;
        let id = abi::getCurrentCycleCall::abi_decode_returns(&raw)
            .context("getCurrentCycle() returned undecodable data")?;
        u256_to_i64(id, "cycleId")
    }

    async fn cycle_initialized(&self, cycle_id: i64) -> Result<bool> {
        let call = abi::isCycleInitializedCall { cycleId: U256::from(cycle_id as u64) };
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::Oddyssey),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .with_context(|| format!("isCycleInitialized({cycle_id}) view call failed"))?;
        abi::isCycleInitializedCall::abi_decode_returns(&raw)
            .with_context(|| format!("isCycleInitialized({cycle_id}) returned undecodable data"))
    }

    async fn daily_slip_count(&self, cycle_id: i64) -> Result<i64> {
        let call = abi::getDailySlipCountCall { cycleId: U256::from(cycle_id as u64) };
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::Oddyssey),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .with_context(|| format!("getDailySlipCount({cycle_id}) view call failed"))?;
        let count = abi::getDailySlipCountCall::abi_decode_returns(&raw)
            .with_context(|| format!("getDailySlipCount({cycle_id}) returned undecodable data"))?;
        u256_to_i64(count, "dailySlipCount")
    }

    async fn cycle_times(&self, cycle_id: i64) -> Result<(i64, i64)> {
        let call = abi::cycleInfoCall { cycleId: U256::from(cycle_id as u64) };
        let raw = self
            .gateway
            .call(
                self.registry.address(ContractName::Oddyssey),
                &Bytes::from(call.abi_encode()),
            )
            .await
            .with_context(|| format!("cycleInfo({cycle_id}) view call failed"))?;
        let info = abi::cycleInfoCall::abi_decode_returns(&raw)
            .with_context(|| format!("cycleInfo({cycle_id}) returned undecodable data"))?;
        Ok((u256_to_ts(info.startTime), u256_to_ts(info.endTime)))
    }
}

fn to_cycle_fixtures(matches: &[CycleMatch]) -> Result<[abi::CycleFixture; 10]> {
    let fixtures: Vec<abi::CycleFixture> = matches
        .iter()
        .map(|m| abi::CycleFixture {
            id: m.fixture_id as u64,
            startTime: m.kickoff as u64,
            oddsHome: m.odds_home as u32,
            oddsDraw: m.odds_draw as u32,
            oddsAway: m.odds_away as u32,
            oddsOver: m.odds_over as u32,
            oddsUnder: m.odds_under as u32,
        })
        .collect();
    fixtures
        .try_into()
        .map_err(|_| anyhow::anyhow!("selection does not have exactly ten matches"))
}

/// Terminal resolution for one slot, or `None` while the slot still blocks
/// the cycle. Results are re-derived from scores, never from cached outcome
/// strings.
pub fn slot_resolution(fixture: &FixtureRow, now: i64) -> Option<ResolvedSlot> {
    match fixture.status() {
        FixtureStatus::Finished => {
            let home = fixture.home_score?;
            let away = fixture.away_score?;
            let moneyline = match one_x_two(home, away).as_str() {
                "1" => moneyline_code::HOME_WIN,
                "2" => moneyline_code::AWAY_WIN,
                _ => moneyline_code::DRAW,
            };
            let over_under = match over_under_25(home, away).as_str() {
                "Over" => over_under_code::OVER,
                _ => over_under_code::UNDER,
            };
            Some(ResolvedSlot { fixture_id: fixture.fixture_id, moneyline, over_under })
        }
        // Cancelled or postponed: give the provider a grace window after the
        // scheduled kick-off, then write the slot off.
        FixtureStatus::Cancelled | FixtureStatus::Postponed => {
            if now >= fixture.kickoff + CANCELLED_GRACE_SECS {
                Some(ResolvedSlot {
                    fixture_id: fixture.fixture_id,
                    moneyline: moneyline_code::NOT_APPLICABLE,
                    over_under: over_under_code::NOT_APPLICABLE,
                })
            } else {
                None
            }
        }
        FixtureStatus::Scheduled | FixtureStatus::InPlay => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(status: &str, home: Option<i32>, away: Option<i32>, kickoff: i64) -> FixtureRow {
        FixtureRow {
            fixture_id: 7,
            league: "EPL".to_string(),
            home_team: String::new(),
            away_team: String::new(),
            kickoff,
            status: status.to_string(),
            home_score: home,
            away_score: away,
            ht_home_score: None,
            ht_away_score: None,
            odds_home: None,
            odds_draw: None,
            odds_away: None,
            odds_over: None,
            odds_under: None,
            outcome_1x2: None,
            outcome_ou25: None,
            outcome_btts: None,
            outcome_ht_1x2: None,
            outcome_ht_ou25: None,
            finished_at: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_finished_slot_codes() {
        let slot = slot_resolution(&fixture("finished", Some(2), Some(1), 0), 10_000).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::HOME_WIN);
        assert_eq!(slot.over_under, over_under_code::OVER);

        let slot = slot_resolution(&fixture("finished", Some(0), Some(0), 0), 10_000).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::DRAW);
        assert_eq!(slot.over_under, over_under_code::UNDER);

        let slot = slot_resolution(&fixture("finished", Some(0), Some(3), 0), 10_000).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::AWAY_WIN);
    }

    #[test]
    fn test_cancelled_slot_waits_for_grace() {
        let kickoff = 100_000;
        let f = fixture("cancelled", None, None, kickoff);
        // Inside the two-hour grace window: still blocking.
        assert!(slot_resolution(&f, kickoff + CANCELLED_GRACE_SECS - 1).is_none());
        // Past it: resolves as not-applicable.
        let slot = slot_resolution(&f, kickoff + CANCELLED_GRACE_SECS).unwrap();
        assert_eq!(slot.moneyline, moneyline_code::NOT_APPLICABLE);
        assert_eq!(slot.over_under, over_under_code::NOT_APPLICABLE);
    }

    #[test]
    fn test_non_terminal_slots_block() {
        assert!(slot_resolution(&fixture("scheduled", None, None, 0), 10_000).is_none());
        assert!(slot_resolution(&fixture("in_play", Some(1), Some(0), 0), 10_000).is_none());
        // Finished without scores violates the provider contract; block
        // rather than fabricate a result.
        assert!(slot_resolution(&fixture("finished", None, None, 0), 10_000).is_none());
    }
}
