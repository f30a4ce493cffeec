//! The resumable log scanner.
//!
//! Per tick: read the chain head, subtract the confirmation depth, fetch the
//! next window of logs, and hand them to the stream's handler inside one
//! transaction that also advances the cursor. A handler failure rolls the
//! whole window back; the next tick retries it.
//!
//! `eth_getLogs` range rejections halve the window (floor 25); each
//! successful window grows it back by 25 toward the configured maximum.

use std::sync::Arc;

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, info, warn};

use crate::config::IndexerConfig;
use crate::db::{store, Store};
use crate::error::RpcError;
use crate::flags::{Heartbeats, SyncFlags};
use crate::rpc::transport::LogFilter;
use crate::rpc::{RpcGateway, RpcLog};

/// Per-stream projection logic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable stream name; keys the cursor row.
    fn stream(&self) -> &'static str;

    /// Contract address this stream watches.
    fn address(&self) -> Address;

    /// Topic0 set this stream subscribes to.
    fn topics(&self) -> Vec<B256>;

    /// Project a window of logs. Runs inside the window transaction; logs
    /// arrive in ascending `(block_number, log_index)` order and have
    /// already passed the exactly-once journal.
    async fn handle(&self, conn: &mut PgConnection, logs: &[RpcLog]) -> Result<()>;

    /// One-shot reconciliation before the first tick (catalogue backfill,
    /// divergence checks). Default: nothing.
    async fn backfill(&self) -> Result<()> {
        Ok(())
    }

    /// Called after a window with at least one projected log commits.
    fn after_commit(&self, _logs: &[RpcLog]) {}
}

/// Block-window sizing with halve-on-reject, creep-back-on-success.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBatch {
    size: u64,
    min: u64,
    max: u64,
    /// Growth step per successful window.
    step: u64,
}

impl AdaptiveBatch {
    pub fn new(cfg: &IndexerConfig) -> Self {
        Self {
            size: cfg.batch_initial.clamp(cfg.batch_min, cfg.batch_max),
            min: cfg.batch_min,
            max: cfg.batch_max,
            step: 25,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Halve the window. Returns `false` once already at the floor, meaning
    /// the provider rejects even the minimum and retrying cannot help.
    pub fn shrink(&mut self) -> bool {
        if self.size == self.min {
            return false;
        }
        self.size = (self.size / 2).max(self.min);
        true
    }

    pub fn grow(&mut self) {
        self.size = (self.size + self.step).min(self.max);
    }
}

pub struct Indexer {
    gateway: Arc<RpcGateway>,
    store: Store,
    cfg: IndexerConfig,
    confirmation_depth: u64,
    flags: Arc<SyncFlags>,
    heartbeats: Arc<Heartbeats>,
}

impl Indexer {
    pub fn new(
        gateway: Arc<RpcGateway>,
        store: Store,
        cfg: IndexerConfig,
        confirmation_depth: u64,
        flags: Arc<SyncFlags>,
        heartbeats: Arc<Heartbeats>,
    ) -> Self {
        Self { gateway, store, cfg, confirmation_depth, flags, heartbeats }
    }

    /// Drive one stream forever. Intended to be spawned per handler.
    pub async fn run_stream(self: Arc<Self>, handler: Arc<dyn EventHandler>) {
        let stream = handler.stream();
        if let Err(e) = handler.backfill().await {
            warn!("[INDEXER] {} backfill failed: {e:#}", stream);
        }

        let mut batch = AdaptiveBatch::new(&self.cfg);
        info!("[INDEXER] {} stream started (batch {})", stream, batch.size());

        loop {
            self.heartbeats.beat(stream);
            let lagging = match self.tick(handler.as_ref(), &mut batch).await {
                Ok(lag) => {
                    if lag > self.cfg.lag_warning_blocks {
                        warn!("[INDEXER] {} is {} blocks behind head", stream, lag);
                        self.flags.set_indexer_lagging(true);
                    } else if lag == 0 {
                        self.flags.set_indexer_lagging(false);
                    }
                    lag > 0
                }
                Err(e) => {
                    warn!("[INDEXER] {} tick failed: {e:#}", stream);
                    true
                }
            };

            let sleep = if lagging { self.cfg.poll_active } else { self.cfg.poll_base };
            tokio::time::sleep(sleep).await;
        }
    }

    /// Process at most one window. Returns remaining lag in blocks.
    async fn tick(&self, handler: &dyn EventHandler, batch: &mut AdaptiveBatch) -> Result<u64> {
        let stream = handler.stream();
        let head = self.gateway.block_number().await?;
        let confirmed = head.saturating_sub(self.confirmation_depth);

        let cursor = match store::load_cursor(self.store.pool(), stream).await? {
            Some(c) => c as u64,
            None => {
                // First run: anchor at the confirmed head. History older than
                // this is the backfill path's problem, not the scanner's.
                let mut tx = self.store.begin().await?;
                store::save_cursor(&mut tx, stream, confirmed as i64).await?;
                tx.commit().await?;
                info!("[INDEXER] {} cursor initialised at block {}", stream, confirmed);
                return Ok(0);
            }
        };

        if cursor >= confirmed {
            return Ok(0);
        }

        let from = cursor + 1;
        let to = (cursor + batch.size()).min(confirmed);
        // A range rejection shrinks the window mid-fetch; the cursor must
        // only advance to the end that was actually scanned.
        let (logs, to) = self.fetch_window(handler, from, to, batch).await?;

        let mut sorted = logs;
        sorted.sort_by_key(|l| (l.block_number, l.log_index));
        // A removed log behind the confirmation depth means a reorg deeper
        // than the depth tolerates: journal it, do not unwind.
        let removed = sorted.iter().filter(|l| l.removed).count();
        if removed > 0 {
            store::record_anomaly(
                self.store.pool(),
                stream,
                &format!("{removed} removed logs in [{from}, {to}] behind confirmation depth"),
            )
            .await?;
            sorted.retain(|l| !l.removed);
        }

        let mut tx = self.store.begin().await?;
        let mut fresh = Vec::with_capacity(sorted.len());
        for log in sorted {
            let inserted = store::record_event(
                &mut tx,
                log.block_number as i64,
                &format!("{:#x}", log.transaction_hash),
                log.log_index as i64,
                &format!("{:#x}", log.address),
                &log.topics.first().map(|t| format!("{t:#x}")).unwrap_or_default(),
            )
            .await?;
            if inserted {
                fresh.push(log);
            }
        }

        if !fresh.is_empty() {
            handler
                .handle(&mut tx, &fresh)
                .await
                .with_context(|| format!("{stream} handler failed for [{from}, {to}]"))?;
        }
        store::save_cursor(&mut tx, stream, to as i64).await?;
        tx.commit().await?;

        if !fresh.is_empty() {
            debug!("[INDEXER] {} [{}, {}]: {} new logs", stream, from, to, fresh.len());
            handler.after_commit(&fresh);
        }
        batch.grow();

        Ok(confirmed.saturating_sub(to))
    }

    /// Fetch one window, halving on range rejections. Returns the logs and
    /// the window end actually fetched, which shrinks with the batch size.
    async fn fetch_window(
        &self,
        handler: &dyn EventHandler,
        from: u64,
        mut to: u64,
        batch: &mut AdaptiveBatch,
    ) -> Result<(Vec<RpcLog>, u64)> {
        loop {
            let filter = LogFilter {
                from_block: from,
                to_block: to,
                address: handler.address(),
                topics: handler.topics(),
            };
            match self.gateway.get_logs(&filter).await {
                Ok(logs) => return Ok((logs, to)),
                Err(RpcError::BlockRangeTooLarge) => {
                    if !batch.shrink() {
                        anyhow::bail!(
                            "provider rejects even the minimum batch of {} blocks",
                            batch.size()
                        );
                    }
                    to = (from + batch.size() - 1).min(to);
                    debug!(
                        "[INDEXER] {} range rejected, retrying [{}, {}] (batch {})",
                        handler.stream(),
                        from,
                        to,
                        batch.size()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cfg() -> IndexerConfig {
        IndexerConfig {
            batch_initial: 500,
            batch_min: 25,
            batch_max: 500,
            poll_base: std::time::Duration::from_secs(45),
            poll_active: std::time::Duration::from_secs(10),
            lag_warning_blocks: 1000,
        }
    }

    #[test]
    fn test_batch_halves_to_floor() {
        let mut b = AdaptiveBatch::new(&test_cfg());
        assert_eq!(b.size(), 500);
        assert!(b.shrink());
        assert_eq!(b.size(), 250);
        assert!(b.shrink());
        assert_eq!(b.size(), 125);
        assert!(b.shrink());
        assert_eq!(b.size(), 62);
        assert!(b.shrink());
        assert_eq!(b.size(), 31);
        assert!(b.shrink());
        assert_eq!(b.size(), 25, "clamped to the floor");
        assert!(!b.shrink(), "at the floor there is nothing left to halve");
    }

    #[test]
    fn test_batch_grows_back_in_steps() {
        let mut b = AdaptiveBatch::new(&test_cfg());
        b.shrink(); // 250
        for _ in 0..10 {
            b.grow();
        }
        assert_eq!(b.size(), 500, "ten successful windows recover a halving");
        b.grow();
        assert_eq!(b.size(), 500, "never exceeds the maximum");
    }

    #[test]
    fn test_batch_initial_is_clamped() {
        let mut cfg = test_cfg();
        cfg.batch_initial = 10_000;
        let b = AdaptiveBatch::new(&cfg);
        assert_eq!(b.size(), 500);
    }
}
