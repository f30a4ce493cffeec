//! Bitredict off-chain relay.
//!
//! Mirrors the prediction-market contracts into Postgres, feeds football
//! results into the guided oracle, settles pools, and drives the daily
//! Oddyssey cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use bitr_relay::config::Config;
use bitr_relay::context::AppContext;
use bitr_relay::indexer::{Indexer, OddysseyMirror, OracleEvents, PoolMirror};
use bitr_relay::oddyssey::{CycleDriver, MatchSelector, SlipEvaluator};
use bitr_relay::oracle::OracleSubmitter;
use bitr_relay::results::client::SportsApiClient;
use bitr_relay::results::ResultsFetcher;
use bitr_relay::retry::RetryPolicy;
use bitr_relay::scheduler::{task_fn, Cadence, Scheduler, Task};
use bitr_relay::settlement::SettlementCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging: stdout plus a non-blocking file appender.
    let file_appender = tracing_appender::rolling::never(".", "relay.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("bitr_relay=info".parse().unwrap());

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    dotenvy::dotenv().ok();
    let cfg = Config::from_env().context("configuration error")?;

    info!("🚀 Bitredict relay starting");
    info!("   RPC endpoints: {}", cfg.rpc.endpoints.len());
    info!("   Confirmation depth: {}", cfg.rpc.confirmation_depth);
    info!("   Oddyssey cycle opens at {:02}:{:02} UTC", cfg.oddyssey.cycle_open_time.0, cfg.oddyssey.cycle_open_time.1);

    let ctx = Arc::new(AppContext::init(cfg).await?);

    // === Indexer streams ===
    let indexer = Arc::new(Indexer::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.cfg.indexer.clone(),
        ctx.cfg.rpc.confirmation_depth,
        ctx.flags.clone(),
        ctx.heartbeats.clone(),
    ));

    let pool_mirror = Arc::new(PoolMirror::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
    ));
    let oddyssey_mirror = Arc::new(OddysseyMirror::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
    ));
    let oracle_events = Arc::new(OracleEvents::new(ctx.registry.clone(), ctx.flags.clone()));

    let mut handles = vec![
        tokio::spawn(indexer.clone().run_stream(pool_mirror)),
        tokio::spawn(indexer.clone().run_stream(oddyssey_mirror)),
        tokio::spawn(indexer.clone().run_stream(oracle_events)),
    ];

    // === Pipeline components ===
    let fetcher = Arc::new(ResultsFetcher::new(
        SportsApiClient::new(&ctx.cfg.results)?,
        ctx.store.clone(),
        ctx.flags.clone(),
    ));
    let submitter = Arc::new(OracleSubmitter::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
        ctx.sender.clone(),
    ));
    let coordinator = Arc::new(SettlementCoordinator::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
        ctx.sender.clone(),
    ));
    let selector = Arc::new(MatchSelector::new(ctx.store.clone(), ctx.cfg.oddyssey.clone()));
    let driver = Arc::new(CycleDriver::new(
        ctx.gateway.clone(),
        ctx.store.clone(),
        ctx.registry.clone(),
        ctx.sender.clone(),
        ctx.cfg.oddyssey.clone(),
    ));
    let evaluator = Arc::new(SlipEvaluator::new(ctx.store.clone(), ctx.cfg.oddyssey.clone()));

    // Settlement also reacts to indexed OutcomeSubmitted events, ahead of
    // its periodic sweep.
    handles.push(tokio::spawn(
        coordinator.clone().run_nudge_listener(ctx.flags.clone()),
    ));

    // === Scheduled tasks ===
    let (open_hour, open_minute) = ctx.cfg.oddyssey.cycle_open_time;
    let results_cadence = Cadence::Windowed {
        active: ctx.cfg.results.poll_match_window,
        idle: ctx.cfg.results.poll_idle,
        start_hour: 12,
        end_hour: 23,
    };

    let tasks = vec![
        Task::new(
            "fetch-fixtures",
            Cadence::DailyAt { hour: 6, minute: 0 },
            Duration::from_secs(600),
            task_fn(fetcher.clone(), |f| async move { f.sync_catalogue().await }),
        )
        .with_retry(RetryPolicy::http()),
        Task::new(
            "select-oddyssey-matches",
            Cadence::DailyAt { hour: 0, minute: 5 },
            Duration::from_secs(120),
            task_fn(selector, |s| async move { s.select_for_today().await }),
        ),
        Task::new(
            "start-oddyssey-cycle",
            Cadence::DailyAt { hour: open_hour, minute: open_minute },
            Duration::from_secs(120),
            task_fn(driver.clone(), |d| async move { d.open_cycle().await }),
        ),
        Task::new(
            "fetch-results",
            results_cadence,
            Duration::from_secs(300),
            task_fn(fetcher, |f| async move { f.sync_results().await }),
        ),
        Task::new(
            "submit-oracle-outcomes",
            Cadence::Every(Duration::from_secs(300)),
            Duration::from_secs(240),
            task_fn(submitter, |s| async move { s.submit_pending().await }),
        ),
        Task::new(
            "settle-pools",
            Cadence::Every(Duration::from_secs(300)),
            Duration::from_secs(240),
            task_fn(coordinator, |c| async move { c.sweep().await }),
        ),
        Task::new(
            "resolve-oddyssey-cycle",
            Cadence::Every(Duration::from_secs(900)),
            Duration::from_secs(300),
            task_fn(driver, |d| async move { d.resolve_due_cycles().await }),
        ),
        Task::new(
            "evaluate-slips",
            Cadence::Every(Duration::from_secs(600)),
            Duration::from_secs(300),
            task_fn(evaluator, |e| async move { e.evaluate_ready().await }),
        ),
        Task::new(
            "health-probe",
            Cadence::Every(Duration::from_secs(60)),
            Duration::from_secs(30),
            task_fn(ctx.clone(), |ctx| async move {
                for (component, age) in ctx.heartbeats.overdue() {
                    warn!("[HEALTH] {} silent for {}s", component, age);
                }
                for (url, ok, failed, open) in ctx.gateway.endpoint_stats() {
                    if open {
                        warn!("[HEALTH] endpoint {} circuit-open ({} ok / {} failed)", url, ok, failed);
                    }
                }
                Ok(())
            }),
        ),
    ];

    let scheduler = Scheduler::new(ctx.heartbeats.clone());
    handles.extend(scheduler.spawn_all(tasks));

    info!("✅ all systems running ({} tasks)", handles.len());

    // Run until termination; on SIGINT/SIGTERM cancel every task at its next
    // suspension point and drain the pool.
    shutdown_signal().await;
    info!("signal received, shutting down");
    for handle in &handles {
        handle.abort();
    }
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
