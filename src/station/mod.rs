//! Station: the generic worker loop shared by Assembler, QualityInspection,
//! Packaging, and Shipping. Per-station processing semantics are supplied
//! as a `StationLogic` trait object, grounded on the teacher's
//! `pipeline::stages::Stage` trait; the worker loop itself is grounded on
//! the teacher's `WorkerPool::run`.

pub mod assembler;
pub mod intake;
pub mod packaging;
pub mod quality_inspection;
pub mod shipping;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::buffer::{BoundedBuffer, Outcome};
use crate::events::{PipelineEvent, StationEvent};
use crate::logger::{AsyncLogger, LogLevel};
use crate::product::Product;
use crate::rng::PipelineRng;

const PAUSE_POLL: Duration = Duration::from_millis(100);
const INPUT_POP_TIMEOUT: Duration = Duration::from_millis(10);
const METRICS_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationState {
    Idle,
    Running,
    Paused,
    Blocked,
    Stopping,
    Stopped,
    Error,
}

/// What a station's `process` decided to do with the product it was handed.
/// Only `QualityInspectionLogic` ever returns `Rework`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Pass,
    Rework,
    Reject,
}

#[async_trait]
pub trait StationLogic: Send + Sync {
    async fn process(&self, product: &mut Product, rng: &PipelineRng) -> ProcessOutcome;
    fn processing_delay(&self, rng: &PipelineRng) -> Duration;
}

pub struct Station {
    pub name: String,
    state: RwLock<StationState>,
    processed: AtomicU64,
    rejected: AtomicU64,
    started_at: Mutex<std::time::Instant>,
    current_product: Mutex<Option<Uuid>>,
    stopping: AtomicBool,
    paused: AtomicBool,
    pause_notify: Notify,
    pub input: Option<Arc<BoundedBuffer<Product>>>,
    pub output: Option<Arc<BoundedBuffer<Product>>>,
    pub rework_output: Option<Arc<BoundedBuffer<Product>>>,
    events: broadcast::Sender<PipelineEvent>,
    logger: Arc<AsyncLogger>,
    logic: Arc<dyn StationLogic>,
    rng: Arc<PipelineRng>,
}

impl Station {
    pub fn new(
        name: impl Into<String>,
        input: Option<Arc<BoundedBuffer<Product>>>,
        output: Option<Arc<BoundedBuffer<Product>>>,
        rework_output: Option<Arc<BoundedBuffer<Product>>>,
        logic: Arc<dyn StationLogic>,
        rng: Arc<PipelineRng>,
        events: broadcast::Sender<PipelineEvent>,
        logger: Arc<AsyncLogger>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            state: RwLock::new(StationState::Idle),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started_at: Mutex::new(std::time::Instant::now()),
            current_product: Mutex::new(None),
            stopping: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            pause_notify: Notify::new(),
            input,
            output,
            rework_output,
            events,
            logger,
            logic,
            rng,
        })
    }

    pub fn state(&self) -> StationState {
        *self.state.read()
    }

    fn set_state(&self, new: StationState) {
        let old = {
            let mut guard = self.state.write();
            let old = *guard;
            *guard = new;
            old
        };
        if old != new {
            self.emit(StationEvent::StateChanged {
                station: self.name.clone(),
                from: old,
                to: new,
            });
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn current_product(&self) -> Option<Uuid> {
        *self.current_product.lock()
    }

    pub fn throughput_per_minute(&self) -> f64 {
        let elapsed_ms = self.started_at.lock().elapsed().as_millis().max(1) as f64;
        self.processed() as f64 * 60_000.0 / elapsed_ms
    }

    fn set_current_product(&self, id: Option<Uuid>) {
        *self.current_product.lock() = id;
    }

    fn emit(&self, event: StationEvent) {
        let _ = self.events.send(PipelineEvent::Station(event));
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.logger.log(level, &self.name, message);
    }

    /// Idle, Error, or Stopped all move to Running; any other state is a
    /// no-op (matches the controller's idempotent fan-out). Counters are
    /// left untouched — only `reset_state` zeroes them.
    pub fn start(&self) {
        let current = self.state();
        if matches!(current, StationState::Idle | StationState::Error | StationState::Stopped) {
            self.stopping.store(false, Ordering::Release);
            self.paused.store(false, Ordering::Release);
            *self.started_at.lock() = std::time::Instant::now();
            self.set_state(StationState::Running);
        }
    }

    pub fn pause(&self) {
        if self.state() == StationState::Running {
            self.paused.store(true, Ordering::Release);
            self.set_state(StationState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.state() == StationState::Paused {
            self.paused.store(false, Ordering::Release);
            self.pause_notify.notify_waiters();
            self.set_state(StationState::Running);
        }
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.pause_notify.notify_waiters();
        if let Some(input) = &self.input {
            input.stop();
        }
        if let Some(output) = &self.output {
            output.stop();
        }
        if self.state() != StationState::Error {
            self.set_state(StationState::Stopping);
        }
    }

    pub fn mark_stopped(&self) {
        if self.state() != StationState::Error {
            self.set_state(StationState::Stopped);
        }
    }

    fn mark_error(&self, message: &str) {
        self.set_state(StationState::Error);
        self.emit(StationEvent::ErrorOccurred {
            station: self.name.clone(),
            message: message.to_string(),
        });
        self.log(LogLevel::Error, message.to_string());
    }

    /// Clears an `Error` station back to `Idle`. Resolves spec.md's open
    /// question: `reset()` does clear `Error`.
    pub fn reset_state(&self) {
        self.stopping.store(false, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        self.processed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        self.set_current_product(None);
        self.set_state(StationState::Idle);
    }

    async fn wait_while_paused(&self) {
        while self.paused.load(Ordering::Acquire) && !self.stopping.load(Ordering::Acquire) {
            tokio::select! {
                _ = self.pause_notify.notified() => {}
                _ = tokio::time::sleep(PAUSE_POLL) => {}
            }
        }
    }

    async fn pop_input(&self) -> Option<Product> {
        let input = self.input.as_ref()?;
        match tokio::time::timeout(INPUT_POP_TIMEOUT, input.pop()).await {
            Ok(Some(p)) => Some(p),
            _ => None,
        }
    }

    /// Pushes to `buf`, flipping to `Blocked` for the duration of any push
    /// that does not land immediately. Returns whether the product was
    /// actually accepted downstream.
    async fn push_tracked(&self, buf: &Arc<BoundedBuffer<Product>>, item: Product) -> bool {
        match buf.try_push(item) {
            Ok(Outcome::Accepted) => true,
            Ok(Outcome::Refused) => false,
            Err(item) => {
                self.emit(StationEvent::Blocked {
                    station: self.name.clone(),
                    downstream: String::new(),
                });
                self.set_state(StationState::Blocked);
                let outcome = buf.push(item).await;
                if self.state() == StationState::Blocked {
                    self.set_state(StationState::Running);
                }
                self.emit(StationEvent::Unblocked { station: self.name.clone() });
                outcome == Outcome::Accepted
            }
        }
    }

    /// Step 4b/5/6: route a processed product according to its outcome.
    async fn forward(&self, mut product: Product, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::Reject => {
                product.reject();
                self.rejected.fetch_add(1, Ordering::Relaxed);
                let trace = product.trace.iter().map(|t| t.station.clone()).collect();
                self.emit(StationEvent::ProductRejected {
                    station: self.name.clone(),
                    product_id: product.id,
                    at: Utc::now(),
                    trace,
                });
            }
            ProcessOutcome::Rework => {
                product.record_trace(&self.name);
                product.send_to_rework();
                if let Some(rework_out) = self.rework_output.clone() {
                    self.push_tracked(&rework_out, product).await;
                }
            }
            ProcessOutcome::Pass => {
                product.record_trace(&self.name);
                product.advance();
                match self.output.clone() {
                    Some(out) => {
                        if self.push_tracked(&out, product).await {
                            self.processed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    None => {
                        self.processed.fetch_add(1, Ordering::Relaxed);
                        let trace = product.trace.iter().map(|t| t.station.clone()).collect();
                        self.emit(StationEvent::ProductProcessed {
                            station: self.name.clone(),
                            product_id: product.id,
                            resulting_state: product.state,
                            at: Utc::now(),
                            trace,
                        });
                    }
                }
            }
        }
    }
}

/// The generic worker loop for every station except Intake, which is
/// timer-driven instead of input-buffer-driven (see `intake::spawn_intake`).
pub fn spawn_processing(station: Arc<Station>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if station.stopping.load(Ordering::Acquire) {
                break;
            }
            if station.state() == StationState::Error {
                tokio::time::sleep(PAUSE_POLL).await;
                continue;
            }
            if station.paused.load(Ordering::Acquire) {
                station.wait_while_paused().await;
                continue;
            }

            let Some(mut product) = station.pop_input().await else {
                continue;
            };
            if station.stopping.load(Ordering::Acquire) {
                break;
            }

            station.set_current_product(Some(product.id));
            tokio::time::sleep(station.logic.processing_delay(&station.rng)).await;

            let result = AssertUnwindSafe(station.logic.process(&mut product, &station.rng))
                .catch_unwind()
                .await;

            match result {
                Ok(outcome) => station.forward(product, outcome).await,
                Err(_) => {
                    station.mark_error("unrecoverable fault during processing");
                    station.rejected.fetch_add(1, Ordering::Relaxed);
                }
            }
            station.set_current_product(None);
        }
        station.mark_stopped();
    })
}

/// Once-per-second `(name, input_depth, throughput)` reporter, one per
/// station, run alongside `spawn_processing`/`spawn_intake` for the life of
/// a `start()`..`stop()` cycle.
pub fn spawn_metrics_timer(station: Arc<Station>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(METRICS_TICK);
        loop {
            ticker.tick().await;
            if station.stopping.load(Ordering::Acquire) {
                break;
            }
            let input_depth = station.input.as_ref().map(|b| b.size()).unwrap_or(0);
            station.emit(StationEvent::MetricsUpdated {
                station: station.name.clone(),
                input_depth,
                throughput_per_minute: station.throughput_per_minute(),
            });
        }
    })
}
