use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use trendcross::archive::{FileArchive, NullArchive, RawArchive};
use trendcross::config::{Config, StoreBackend};
use trendcross::dispatcher::AlertDispatcher;
use trendcross::model::signal::Alert;
use trendcross::notifier::{BroadcastNotifier, FanoutNotifier, LogNotifier, Notifier, WebhookNotifier};
use trendcross::pipeline::{
    ingest_line, Ingested, Router, TickOutcome, TickReport, WorkerContext, WorkerSettings,
};
use trendcross::store::{InMemoryStateStore, SqliteStateStore, StateStore};

fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .logging
            .level
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .json();
    match &config.logging.file {
        Some(path) => {
            let log_file = std::fs::File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            builder.with_writer(log_file).init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn build_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    Ok(match config.store.backend {
        StoreBackend::Sqlite => {
            let store = SqliteStateStore::open(&config.store.path).with_context(|| {
                format!("failed to open state store {}", config.store.path.display())
            })?;
            Arc::new(store)
        }
        StoreBackend::Memory => Arc::new(InMemoryStateStore::new()),
    })
}

fn build_archive(config: &Config) -> Arc<dyn RawArchive> {
    if config.archive.enabled {
        Arc::new(FileArchive::new(&config.archive.root))
    } else {
        Arc::new(NullArchive)
    }
}

async fn open_ingress(source: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if source == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("failed to open ingress source {}", source))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Alert feed subscriber. Ends once every notifier handle is dropped.
async fn log_alert_feed(mut rx: broadcast::Receiver<Alert>) {
    let log = LogNotifier;
    loop {
        match rx.recv().await {
            Ok(alert) => {
                let _ = log.publish(&alert).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Alert feed subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_reports(mut rx: mpsc::Receiver<TickReport>) {
    let mut processed = 0u64;
    let mut failed = 0u64;
    while let Some(report) = rx.recv().await {
        match report.result {
            Ok(TickOutcome::Evaluated {
                alert: Some(alert),
                delivery,
                ..
            }) => {
                processed += 1;
                tracing::info!(
                    subject = %alert.subject(),
                    delivery = ?delivery,
                    "{}",
                    alert.message()
                );
            }
            Ok(_) => processed += 1,
            Err(_) => failed += 1,
        }
    }
    tracing::info!(processed, failed, "Tick reports drained");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set TRENDCROSS_CONFIG or create config/default.toml");
            std::process::exit(1);
        }
    };

    init_tracing(&config)?;

    tracing::info!(
        fast = config.engine.fast_period,
        slow = config.engine.slow_period,
        store = ?config.store.backend,
        source = %config.ingress.source,
        "Starting trendcross"
    );

    let store = build_store(&config)?;
    let archive = build_archive(&config);

    let feed = BroadcastNotifier::new(config.notify.broadcast_capacity);
    let feed_logger = tokio::spawn(log_alert_feed(feed.subscribe()));
    let mut notifier = FanoutNotifier::new().with(Arc::new(feed));
    if let Some(url) = &config.notify.webhook_url {
        tracing::info!(url = %url, "Webhook notifier enabled");
        notifier = notifier.with(Arc::new(WebhookNotifier::new(url)));
    }
    let dispatcher = Arc::new(AlertDispatcher::new(Arc::new(notifier), &config.dispatch));

    let ctx = Arc::new(WorkerContext {
        store,
        dispatcher,
        settings: WorkerSettings::from_config(&config),
    });

    let (report_tx, report_rx) = mpsc::channel::<TickReport>(config.engine.lane_capacity);
    let reporter = tokio::spawn(log_reports(report_rx));
    let mut router = Router::new(
        ctx,
        config.engine.lane_capacity,
        config.engine.tracked_symbols(),
    )
    .with_reports(report_tx);

    let mut lines = open_ingress(&config.ingress.source).await?.lines();
    let threshold = config.engine.anomaly_threshold_pct;
    let mut rejected = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("Ingress exhausted");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Ingress read failed");
                        break;
                    }
                };
                match ingest_line(&mut router, &archive, threshold, &line).await {
                    Ok(Ingested::Rejected(_)) => rejected += 1,
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Failed to route tick"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received");
                break;
            }
        }
    }

    let symbols = router.active_symbols();
    router.shutdown().await;
    let _ = reporter.await;
    let _ = feed_logger.await;
    tracing::info!(symbols, rejected, "Shutdown complete");
    Ok(())
}
