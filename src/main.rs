use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hr_onboard::config::AppConfig;
use hr_onboard::console::Console;
use hr_onboard::dashboard::{self, DashboardAggregator};
use hr_onboard::directory::UserId;
use hr_onboard::lifecycle::LifecycleEngine;
use hr_onboard::notify::{
    LogTransport, NotificationDispatcher, NotificationTransport, OutboxTransport,
    RetryingTransport,
};
use hr_onboard::seed::Seed;
use hr_onboard::store::{Database, LibSqlBackend, MemoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit
    let _log_guard = init_tracing(&config);

    eprintln!("HR Onboard v{}", env!("CARGO_PKG_VERSION"));

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = match &config.db_path {
        Some(path) => {
            let backend = LibSqlBackend::new_local(path)
                .await
                .with_context(|| format!("failed to open database at {}", path.display()))?;
            eprintln!("   Database: {}", path.display());
            Arc::new(backend)
        }
        None => {
            eprintln!("   Database: in-memory (set ONBOARD_DB_PATH to persist)");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = Arc::new(LifecycleEngine::new(Arc::clone(&db), config.engine.clone()));

    if let Some(path) = &config.seed_path {
        let seed = Seed::load(path)
            .await
            .with_context(|| format!("failed to read seed {}", path.display()))?;
        let summary = seed.apply(&engine).await.context("failed to apply seed")?;
        eprintln!(
            "   Seed: {} department(s), {} template(s) added",
            summary.departments, summary.templates
        );
    }

    // ── Notifications ────────────────────────────────────────────────────
    let notify = &config.notify;
    let transport: Arc<dyn NotificationTransport> = match &notify.outbox_path {
        Some(path) => {
            eprintln!("   Outbox: {}", path.display());
            Arc::new(RetryingTransport::new(
                OutboxTransport::new(path),
                notify.delivery_attempts,
                notify.delivery_backoff,
            ))
        }
        None => Arc::new(RetryingTransport::new(
            LogTransport,
            notify.delivery_attempts,
            notify.delivery_backoff,
        )),
    };
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&db), transport, notify));
    let _dispatch_handle = dispatcher.spawn(engine.subscribe_queue());

    // ── Dashboard ────────────────────────────────────────────────────────
    let aggregator = Arc::new(DashboardAggregator::new(Arc::clone(&db), &config.dashboard));
    let refresh_every = config.dashboard.max_staleness.max(Duration::from_secs(1));
    let _refresh_handle =
        dashboard::spawn_refresh_task(Arc::clone(&aggregator), engine.subscribe(), refresh_every);

    let actor = config.actor.clone().unwrap_or_else(|| UserId::new("console"));
    eprintln!("   Acting as: {actor}");
    eprintln!("   Type `help` for commands, `quit` to exit.\n");

    Console::new(engine, aggregator, actor).run().await?;
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hr-onboard.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
