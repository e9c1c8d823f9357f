use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::archive::{ArchivedTick, RawArchive};
use crate::backoff::ExponentialBackoff;
use crate::config::Config;
use crate::dispatcher::{AlertDispatcher, DispatchAck};
use crate::error::{EngineError, StoreError};
use crate::indicator::rolling_window::IngestOutcome;
use crate::model::signal::{Alert, Relation};
use crate::model::state::SymbolState;
use crate::model::tick::Tick;
use crate::store::StateStore;
use crate::strategy::ma_crossover::CrossDetector;
use crate::validator::{validate_line, Rejection};

const STORE_RETRY_INITIAL: Duration = Duration::from_millis(50);
const STORE_RETRY_MAX: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub fast_period: usize,
    pub slow_period: usize,
    pub delivery_log_retention: usize,
    pub store_timeout: Duration,
    pub store_max_attempts: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fast_period: config.engine.fast_period,
            slow_period: config.engine.slow_period,
            delivery_log_retention: config.store.delivery_log_retention,
            store_timeout: config.store.timeout(),
            store_max_attempts: config.store.max_attempts.max(1),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collaborators shared by every symbol worker.
pub struct WorkerContext {
    pub store: Arc<dyn StateStore>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub settings: WorkerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered { attempts: u32 },
    AlreadyDelivered,
    /// Recorded in the delivery log for a later attempt.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    WarmingUp {
        sma_fast: Option<Decimal>,
        sma_slow: Option<Decimal>,
    },
    Evaluated {
        sma_fast: Decimal,
        sma_slow: Decimal,
        relation: Relation,
        alert: Option<Alert>,
        delivery: Option<DeliveryStatus>,
    },
    Duplicate,
    Stale,
    /// Price too large for the window to average.
    OutOfRange,
}

impl TickOutcome {
    pub fn alert(&self) -> Option<&Alert> {
        match self {
            TickOutcome::Evaluated { alert, .. } => alert.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TickReport {
    pub tick: Tick,
    pub result: Result<TickOutcome, EngineError>,
}

async fn call_store<T, F>(timeout: Duration, op: &'static str, f: F) -> Result<T, EngineError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Err(_) => Err(EngineError::Timeout(op)),
        Ok(Err(join_err)) => Err(EngineError::Task(join_err)),
        Ok(Ok(result)) => result.map_err(EngineError::from),
    }
}

/// Owns one symbol's state and applies its ticks strictly one at a time.
pub struct SymbolWorker {
    symbol: String,
    ctx: Arc<WorkerContext>,
    detector: CrossDetector,
    state: Option<SymbolState>,
}

impl SymbolWorker {
    pub fn new(symbol: &str, ctx: Arc<WorkerContext>) -> Self {
        Self {
            symbol: symbol.to_string(),
            ctx,
            detector: CrossDetector::new(),
            state: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// In-memory state, `None` until a store read has succeeded.
    pub fn state(&self) -> Option<&SymbolState> {
        self.state.as_ref()
    }

    async fn with_retry<T, F>(&self, op: &'static str, f: F) -> Result<T, EngineError>
    where
        F: Fn() -> Result<T, StoreError> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let settings = &self.ctx.settings;
        let mut backoff = ExponentialBackoff::new(STORE_RETRY_INITIAL, STORE_RETRY_MAX, 2.0);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match call_store(settings.store_timeout, op, f.clone()).await {
                Ok(value) => return Ok(value),
                // the same write can never pass once the store moved past it
                Err(e @ EngineError::StateStore(StoreError::Conflict { .. })) => return Err(e),
                Err(e) if attempt >= settings.store_max_attempts => return Err(e),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        symbol = %self.symbol,
                        op,
                        attempt,
                        error = %e,
                        "State store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Working copy of the current state, reading it from the store first if needed.
    async fn load(&mut self) -> Result<SymbolState, EngineError> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let store = Arc::clone(&self.ctx.store);
        let symbol = self.symbol.clone();
        let loaded = self
            .with_retry("state read", move || store.read(&symbol))
            .await?;
        let settings = &self.ctx.settings;
        let state = match loaded {
            Some(state) => {
                tracing::debug!(symbol = %self.symbol, entries = state.window.len(), "Restored symbol state");
                state
            }
            None => SymbolState::new(
                settings.fast_period,
                settings.slow_period,
                settings.delivery_log_retention,
            ),
        };
        self.state = Some(state.clone());
        Ok(state)
    }

    async fn persist(&self, state: &SymbolState) -> Result<(), EngineError> {
        let store = Arc::clone(&self.ctx.store);
        let symbol = self.symbol.clone();
        let snapshot = Arc::new(state.clone());
        self.with_retry("state write", move || store.write(&symbol, &snapshot))
            .await
    }

    /// Write `next` as a new version and adopt it. On failure the in-memory
    /// state is dropped so the next tick re-reads whatever the store actually
    /// holds.
    async fn commit(&mut self, mut next: SymbolState) -> Result<(), EngineError> {
        next.version += 1;
        match self.persist(&next).await {
            Ok(()) => {
                self.state = Some(next);
                Ok(())
            }
            Err(e) => {
                self.state = None;
                Err(e)
            }
        }
    }

    pub async fn process(&mut self, tick: Tick) -> Result<TickOutcome, EngineError> {
        let mut next = self.load().await?;

        let mut dirty = false;
        if next.delivery_log.has_pending() {
            let redelivered = self
                .ctx
                .dispatcher
                .redeliver_pending(&mut next.delivery_log)
                .await;
            dirty = redelivered > 0;
        }

        let mut outcome = match next.window.ingest_tick(&tick) {
            IngestOutcome::Duplicate => {
                tracing::debug!(symbol = %self.symbol, timestamp = %tick.timestamp, "Duplicate tick ignored");
                TickOutcome::Duplicate
            }
            IngestOutcome::Stale => {
                tracing::debug!(symbol = %self.symbol, timestamp = %tick.timestamp, "Stale tick dropped");
                TickOutcome::Stale
            }
            IngestOutcome::OutOfRange => {
                tracing::warn!(
                    symbol = %self.symbol,
                    timestamp = %tick.timestamp,
                    price = %tick.price,
                    "Tick price out of range, dropped"
                );
                TickOutcome::OutOfRange
            }
            IngestOutcome::Updated {
                sma_fast: Some(sma_fast),
                sma_slow: Some(sma_slow),
            } => {
                dirty = true;
                let alert = self.detector.evaluate(
                    &mut next.trend,
                    &self.symbol,
                    sma_fast,
                    sma_slow,
                    tick.timestamp,
                );
                TickOutcome::Evaluated {
                    sma_fast,
                    sma_slow,
                    relation: next.trend.last_relation,
                    alert,
                    delivery: None,
                }
            }
            IngestOutcome::Updated { sma_fast, sma_slow } => {
                dirty = true;
                tracing::debug!(
                    symbol = %self.symbol,
                    entries = next.window.len(),
                    "Window warming up"
                );
                TickOutcome::WarmingUp { sma_fast, sma_slow }
            }
        };

        if dirty {
            self.commit(next).await?;
        }

        if let TickOutcome::Evaluated {
            alert: Some(alert),
            delivery,
            ..
        } = &mut outcome
        {
            tracing::info!(
                symbol = %alert.symbol,
                direction = %alert.direction,
                sma5 = %alert.sma5,
                sma20 = %alert.sma20,
                timestamp = %alert.timestamp,
                "Cross detected"
            );
            *delivery = Some(self.deliver(alert).await);
        }

        Ok(outcome)
    }

    async fn deliver(&mut self, alert: &Alert) -> DeliveryStatus {
        let Some(mut after) = self.state.clone() else {
            return DeliveryStatus::Pending;
        };
        after.version += 1;
        let status = match self
            .ctx
            .dispatcher
            .dispatch(alert, &mut after.delivery_log)
            .await
        {
            Ok(DispatchAck::Delivered { attempts }) => DeliveryStatus::Delivered { attempts },
            Ok(DispatchAck::AlreadyDelivered) => DeliveryStatus::AlreadyDelivered,
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Alert left pending");
                DeliveryStatus::Pending
            }
        };

        if let Err(e) = self.persist(&after).await {
            tracing::warn!(
                symbol = %self.symbol,
                error = %e,
                "Delivery log not persisted, keeping it in memory"
            );
        }
        self.state = Some(after);
        status
    }

    /// Drain the lane until every sender is dropped.
    pub async fn run(
        mut self,
        mut rx: mpsc::Receiver<Tick>,
        reports: Option<mpsc::Sender<TickReport>>,
    ) {
        while let Some(tick) = rx.recv().await {
            let result = self.process(tick.clone()).await;
            if let Err(e) = &result {
                tracing::error!(
                    symbol = %self.symbol,
                    timestamp = %tick.timestamp,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Tick processing failed"
                );
            }
            if let Some(tx) = &reports {
                let _ = tx.send(TickReport { tick, result }).await;
            }
        }
        tracing::debug!(symbol = %self.symbol, "Symbol lane closed, worker exiting");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Accepted,
    /// Symbol is not in the configured allow-list.
    Ignored,
}

/// Partitions ticks by symbol onto one ordered lane per symbol.
pub struct Router {
    ctx: Arc<WorkerContext>,
    lane_capacity: usize,
    tracked: Vec<String>,
    lanes: HashMap<String, mpsc::Sender<Tick>>,
    handles: Vec<JoinHandle<()>>,
    reports: Option<mpsc::Sender<TickReport>>,
}

impl Router {
    pub fn new(ctx: Arc<WorkerContext>, lane_capacity: usize, tracked: Vec<String>) -> Self {
        Self {
            ctx,
            lane_capacity: lane_capacity.max(1),
            tracked,
            lanes: HashMap::new(),
            handles: Vec::new(),
            reports: None,
        }
    }

    /// Receive a `TickReport` for every tick a worker finishes.
    pub fn with_reports(mut self, tx: mpsc::Sender<TickReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn active_symbols(&self) -> usize {
        self.lanes.len()
    }

    pub async fn route(&mut self, tick: Tick) -> Result<Routed, EngineError> {
        if !self.tracked.is_empty() && !self.tracked.iter().any(|s| s == &tick.symbol) {
            tracing::debug!(symbol = %tick.symbol, "Symbol not tracked, tick ignored");
            return Ok(Routed::Ignored);
        }

        let lane = match self.lanes.get(&tick.symbol) {
            Some(lane) => lane.clone(),
            None => self.spawn_lane(&tick.symbol),
        };
        let symbol = tick.symbol.clone();
        lane.send(tick)
            .await
            .map_err(|_| EngineError::LaneClosed(symbol))?;
        Ok(Routed::Accepted)
    }

    fn spawn_lane(&mut self, symbol: &str) -> mpsc::Sender<Tick> {
        let (tx, rx) = mpsc::channel(self.lane_capacity);
        let worker = SymbolWorker::new(symbol, Arc::clone(&self.ctx));
        let reports = self.reports.clone();
        self.handles
            .push(tokio::spawn(async move { worker.run(rx, reports).await }));
        self.lanes.insert(symbol.to_string(), tx.clone());
        tracing::info!(symbol, "Symbol worker started");
        tx
    }

    /// Close every lane and wait for the workers to drain.
    pub async fn shutdown(mut self) {
        self.lanes.clear();
        self.reports = None;
        for result in join_all(self.handles.drain(..)).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Symbol worker panicked");
            }
        }
    }
}

/// What became of one ingress line.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Routed(Routed),
    Rejected(Rejection),
    Blank,
}

/// Validate one JSON line, archive it best-effort, then hand it to its lane.
/// A rejected line never reaches a worker.
pub async fn ingest_line(
    router: &mut Router,
    archive: &Arc<dyn RawArchive>,
    anomaly_threshold_pct: Decimal,
    line: &str,
) -> Result<Ingested, EngineError> {
    if line.trim().is_empty() {
        return Ok(Ingested::Blank);
    }
    let tick = match validate_line(line) {
        Ok(tick) => tick,
        Err(rejection) => {
            tracing::warn!(field = rejection.field, reason = %rejection.reason, "Malformed tick dropped");
            return Ok(Ingested::Rejected(rejection));
        }
    };

    let record = ArchivedTick::from_tick(&tick, anomaly_threshold_pct);
    let archive = Arc::clone(archive);
    tokio::task::spawn_blocking(move || {
        if let Err(e) = archive.append(&record) {
            tracing::warn!(symbol = %record.tick.symbol, error = %e, "Raw archive write failed");
        }
    });

    router.route(tick).await.map(Ingested::Routed)
}
