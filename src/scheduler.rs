//! Cron-style task driver.
//!
//! Tasks are data: a name, a UTC-anchored cadence, an overlap policy, a
//! timeout, and a retry budget. The scheduler owns all run state; a task
//! body is just an async closure that returns `Result`. Overlapping fires
//! of a `Skip` task are dropped, not queued; a task that exceeds its budget
//! is cancelled at its next suspension point and marked failed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::flags::Heartbeats;
use crate::retry::RetryPolicy;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type TaskFn = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// When a fire lands while the previous run is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Drop this fire; the next one re-evaluates from scratch.
    Skip,
    /// Wait for the running instance, then run immediately.
    Queue,
}

/// When a task runs.
#[derive(Debug, Clone, Copy)]
pub enum Cadence {
    /// Fixed interval between run starts.
    Every(Duration),
    /// Once a day at the given UTC wall-clock time.
    DailyAt { hour: u32, minute: u32 },
    /// Interval that tightens inside a UTC hour window (inclusive start,
    /// exclusive end).
    Windowed {
        active: Duration,
        idle: Duration,
        start_hour: u32,
        end_hour: u32,
    },
}

impl Cadence {
    /// Delay from `now` until the next fire.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        match *self {
            Cadence::Every(interval) => interval,
            Cadence::DailyAt { hour, minute } => {
                let today = now
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .expect("cadence validated at construction")
                    .and_utc();
                let target = if today > now {
                    today
                } else {
                    today + chrono::Duration::days(1)
                };
                (target - now).to_std().unwrap_or(Duration::from_secs(1))
            }
            Cadence::Windowed { active, idle, start_hour, end_hour } => {
                let h = now.hour();
                if h >= start_hour && h < end_hour {
                    active
                } else {
                    idle
                }
            }
        }
    }

    /// How long the task may go without a beat before the health probe flags
    /// it: two firings plus its run budget.
    pub fn stale_after(&self, timeout: Duration) -> Duration {
        let period = match *self {
            Cadence::Every(interval) => interval * 2,
            Cadence::DailyAt { .. } => Duration::from_secs(25 * 3600),
            Cadence::Windowed { idle, .. } => idle * 2,
        };
        period + timeout
    }
}

pub struct Task {
    pub name: &'static str,
    pub cadence: Cadence,
    pub overlap: OverlapPolicy,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub run: TaskFn,
}

impl Task {
    pub fn new(
        name: &'static str,
        cadence: Cadence,
        timeout: Duration,
        run: TaskFn,
    ) -> Self {
        Self {
            name,
            cadence,
            overlap: OverlapPolicy::Skip,
            timeout,
            retry: RetryPolicy::new(1, Duration::from_secs(1), Duration::from_secs(1)),
            run,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Wrap an async closure over a context value into a `TaskFn`.
pub fn task_fn<C, F, Fut>(ctx: Arc<C>, body: F) -> TaskFn
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(body(ctx.clone())) as TaskFuture)
}

pub struct Scheduler {
    heartbeats: Arc<Heartbeats>,
}

impl Scheduler {
    pub fn new(heartbeats: Arc<Heartbeats>) -> Self {
        Self { heartbeats }
    }

    /// Spawn one driver loop per task. Returns the join handles so the
    /// caller can await or abort them on shutdown.
    pub fn spawn_all(&self, tasks: Vec<Task>) -> Vec<tokio::task::JoinHandle<()>> {
        tasks
            .into_iter()
            .map(|task| {
                let heartbeats = self.heartbeats.clone();
                tokio::spawn(drive_task(task, heartbeats))
            })
            .collect()
    }
}

async fn drive_task(task: Task, heartbeats: Arc<Heartbeats>) {
    info!("[SCHED] task {} registered ({:?})", task.name, task.cadence);
    let running = Arc::new(Mutex::new(()));

    loop {
        let delay = task.cadence.next_delay(Utc::now());
        tokio::time::sleep(delay).await;

        let guard = match task.overlap {
            OverlapPolicy::Skip => match running.clone().try_lock_owned() {
                Ok(g) => g,
                Err(_) => {
                    debug!("[SCHED] {} still running, skipping this fire", task.name);
                    continue;
                }
            },
            OverlapPolicy::Queue => running.clone().lock_owned().await,
        };

        heartbeats.beat_within(task.name, task.cadence.stale_after(task.timeout));
        run_with_budget(&task).await;
        drop(guard);
    }
}

/// Run one fire, with per-fire retries inside the total timeout budget.
async fn run_with_budget(task: &Task) {
    let started = tokio::time::Instant::now();
    let mut attempt = 0u32;
    loop {
        let remaining = task.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            warn!("[SCHED] {} exhausted its {}s budget", task.name, task.timeout.as_secs());
            return;
        }

        match tokio::time::timeout(remaining, (task.run)()).await {
            Ok(Ok(())) => {
                debug!("[SCHED] {} completed in {:?}", task.name, started.elapsed());
                return;
            }
            Ok(Err(e)) => {
                if task.retry.should_retry(attempt) {
                    let backoff = task.retry.delay(attempt);
                    warn!("[SCHED] {} failed ({e:#}), retrying in {:?}", task.name, backoff);
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                } else {
                    warn!("[SCHED] {} failed: {e:#}", task.name);
                    return;
                }
            }
            Err(_) => {
                // The future was dropped at its last suspension point; any
                // open DB transaction rolled back with it.
                warn!("[SCHED] {} timed out after {:?}, cancelled", task.name, started.elapsed());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_daily_cadence_before_and_after_target() {
        let cadence = Cadence::DailyAt { hour: 0, minute: 10 };

        // 00:05 → five minutes out.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 5, 0).unwrap();
        assert_eq!(cadence.next_delay(now), Duration::from_secs(300));

        // 00:10 exactly → tomorrow.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 10, 0).unwrap();
        assert_eq!(cadence.next_delay(now), Duration::from_secs(24 * 3600));

        // 23:10 → one hour.
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 23, 10, 0).unwrap();
        assert_eq!(cadence.next_delay(now), Duration::from_secs(3600));
    }

    #[test]
    fn test_windowed_cadence() {
        let cadence = Cadence::Windowed {
            active: Duration::from_secs(300),
            idle: Duration::from_secs(1800),
            start_hour: 12,
            end_hour: 23,
        };

        let noon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(cadence.next_delay(noon), Duration::from_secs(300));

        let late = Utc.with_ymd_and_hms(2026, 3, 1, 22, 59, 0).unwrap();
        assert_eq!(cadence.next_delay(late), Duration::from_secs(300));

        let night = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        assert_eq!(cadence.next_delay(night), Duration::from_secs(1800));

        let morning = Utc.with_ymd_and_hms(2026, 3, 1, 6, 0, 0).unwrap();
        assert_eq!(cadence.next_delay(morning), Duration::from_secs(1800));
    }

    #[test]
    fn test_every_cadence() {
        let cadence = Cadence::Every(Duration::from_secs(60));
        assert_eq!(cadence.next_delay(Utc::now()), Duration::from_secs(60));
    }

    #[test]
    fn test_stale_allowance_scales_with_cadence() {
        let sweep = Cadence::Every(Duration::from_secs(300));
        assert_eq!(sweep.stale_after(Duration::from_secs(240)), Duration::from_secs(840));

        let daily = Cadence::DailyAt { hour: 6, minute: 0 };
        assert!(daily.stale_after(Duration::from_secs(600)) > Duration::from_secs(24 * 3600));
    }
}
