//! PipelineController: owns the five stations and four inter-station
//! buffers, wires the fixed topology between them once at construction, and
//! drives the pipeline's start/pause/resume/stop/reset lifecycle.
//!
//! Station and buffer `Arc` identities never change across a stop/start
//! cycle — `BoundedBuffer::restart` and `Station::start` accepting `Stopped`
//! exist specifically so the `MetricsAggregator`'s sampler closure, captured
//! once here at construction, keeps reading live objects forever instead of
//! going stale after a restart.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::buffer::BoundedBuffer;
use crate::config::Config;
use crate::events::{ControllerEvent, PipelineEvent, StationEvent};
use crate::logger::AsyncLogger;
use crate::metrics::{keys, MetricsAggregator, MetricsSample};
use crate::product::Product;
use crate::registry::WorkerRegistry;
use crate::rng::PipelineRng;
use crate::station::assembler::AssemblerLogic;
use crate::station::intake::{spawn_intake, IntakeLogic};
use crate::station::packaging::PackagingLogic;
use crate::station::quality_inspection::QualityInspectionLogic;
use crate::station::shipping::ShippingLogic;
use crate::station::{spawn_metrics_timer, spawn_processing, Station, StationLogic, StationState};

pub struct PipelineController {
    config: Config,
    events: broadcast::Sender<PipelineEvent>,
    logger: Arc<AsyncLogger>,
    logger_task: Mutex<Option<JoinHandle<()>>>,

    intake: Arc<Station>,
    intake_logic: Arc<IntakeLogic>,
    assembler: Arc<Station>,
    quality: Arc<Station>,
    packaging: Arc<Station>,
    shipping: Arc<Station>,

    b1: Arc<BoundedBuffer<Product>>,
    b2: Arc<BoundedBuffer<Product>>,
    b3: Arc<BoundedBuffer<Product>>,
    b4: Arc<BoundedBuffer<Product>>,

    aggregator: Arc<MetricsAggregator>,
    registry: Arc<WorkerRegistry>,

    finished_count: Arc<AtomicU64>,
    started_at: Arc<Mutex<Instant>>,
    running: AtomicBool,
    paused: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PipelineController {
    /// Wires the fixed topology: Intake -> B1 -> Assembler -> B2 ->
    /// QualityInspection -> B3 -> Packaging -> B4 -> Shipping, with
    /// QualityInspection's rework edge pushing back to B1.
    pub fn new(config: Config) -> Arc<Self> {
        let (events, _) = broadcast::channel(4096);
        let rng = Arc::new(PipelineRng::new(config.rng_seed));
        let (logger, logger_task) = AsyncLogger::start(config.logger_min_level, tokio::io::stdout(), events.clone());

        let b1 = Arc::new(BoundedBuffer::new(config.buffer_capacity));
        let b2 = Arc::new(BoundedBuffer::new(config.buffer_capacity));
        let b3 = Arc::new(BoundedBuffer::new(config.buffer_capacity));
        let b4 = Arc::new(BoundedBuffer::new(config.buffer_capacity));

        let intake_logic = Arc::new(IntakeLogic {
            min_ms: config.intake.min_processing_ms,
            max_ms: config.intake.max_processing_ms,
            failure_rate: config.intake.failure_rate,
        });
        let intake_logic_dyn: Arc<dyn StationLogic> = intake_logic.clone();
        let intake = Station::new(
            "Intake",
            None,
            Some(b1.clone()),
            None,
            intake_logic_dyn,
            rng.clone(),
            events.clone(),
            logger.clone(),
        );

        let assembler_logic: Arc<dyn StationLogic> = Arc::new(AssemblerLogic {
            min_ms: config.assembler.min_processing_ms,
            max_ms: config.assembler.max_processing_ms,
            failure_rate: config.assembler.failure_rate,
        });
        let assembler = Station::new(
            "Assembler",
            Some(b1.clone()),
            Some(b2.clone()),
            None,
            assembler_logic,
            rng.clone(),
            events.clone(),
            logger.clone(),
        );

        let quality_logic: Arc<dyn StationLogic> = Arc::new(QualityInspectionLogic {
            min_ms: config.quality.min_processing_ms,
            max_ms: config.quality.max_processing_ms,
            failure_rate: config.quality.failure_rate,
            sub_test_pass_rate: config.quality.sub_test_pass_rate,
            rework_rate: config.quality.rework_rate,
            max_rework_count: config.quality.max_rework_count,
        });
        let quality = Station::new(
            "QualityInspection",
            Some(b2.clone()),
            Some(b3.clone()),
            Some(b1.clone()),
            quality_logic,
            rng.clone(),
            events.clone(),
            logger.clone(),
        );

        let packaging_logic: Arc<dyn StationLogic> = Arc::new(PackagingLogic {
            min_ms: config.packaging.min_processing_ms,
            max_ms: config.packaging.max_processing_ms,
            failure_rate: config.packaging.failure_rate,
        });
        let packaging = Station::new(
            "Packaging",
            Some(b3.clone()),
            Some(b4.clone()),
            None,
            packaging_logic,
            rng.clone(),
            events.clone(),
            logger.clone(),
        );

        let shipping_logic: Arc<dyn StationLogic> = Arc::new(ShippingLogic {
            min_ms: config.shipping.min_processing_ms,
            max_ms: config.shipping.max_processing_ms,
            failure_rate: config.shipping.failure_rate,
        });
        let shipping = Station::new(
            "Shipping",
            Some(b4.clone()),
            None,
            None,
            shipping_logic,
            rng.clone(),
            events.clone(),
            logger.clone(),
        );

        let registry = WorkerRegistry::new(events.clone());
        for name in [
            "Intake",
            "Assembler",
            "QualityInspection",
            "Packaging",
            "Shipping",
            "logger-sink",
            "metrics-sampler",
            "event-router",
        ] {
            registry.register(name, 0);
        }

        let station_names: Vec<String> = vec![
            "Intake".to_string(),
            "Assembler".to_string(),
            "QualityInspection".to_string(),
            "Packaging".to_string(),
            "Shipping".to_string(),
        ];

        let finished_count = Arc::new(AtomicU64::new(0));
        let started_at = Arc::new(Mutex::new(Instant::now()));

        let sampler = {
            let (b1, b2, b3, b4) = (b1.clone(), b2.clone(), b3.clone(), b4.clone());
            let stations = [intake.clone(), assembler.clone(), quality.clone(), packaging.clone(), shipping.clone()];
            let finished_count = finished_count.clone();
            let started_at = started_at.clone();
            move || -> MetricsSample {
                let mut values = BTreeMap::new();
                for (name, buf) in [("B1", &b1), ("B2", &b2), ("B3", &b3), ("B4", &b4)] {
                    values.insert(keys::buffer_size(name), buf.size() as f64);
                    values.insert(keys::buffer_utilization(name), buf.utilization());
                }
                for station in &stations {
                    values.insert(keys::station_processed(&station.name), station.processed() as f64);
                    values.insert(keys::station_rejected(&station.name), station.rejected() as f64);
                    values.insert(keys::station_throughput(&station.name), station.throughput_per_minute());
                }
                let finished = finished_count.load(Ordering::Relaxed) as f64;
                let wip = b1.size() as f64 + b2.size() as f64 + b3.size() as f64 + b4.size() as f64;
                let elapsed_min = (started_at.lock().elapsed().as_secs_f64() / 60.0).max(1.0 / 60.0);
                values.insert(keys::FINISHED_COUNT.to_string(), finished);
                values.insert(keys::WIP_COUNT.to_string(), wip);
                values.insert(keys::THROUGHPUT_PER_MIN.to_string(), finished / elapsed_min);
                MetricsSample { at: Utc::now(), values }
            }
        };

        let aggregator = MetricsAggregator::new(
            config.aggregator_max_history_size,
            config.aggregator_expected_throughput_per_min,
            station_names,
            events.clone(),
            sampler,
        );

        Arc::new(Self {
            config,
            events,
            logger,
            logger_task: Mutex::new(Some(logger_task)),
            intake,
            intake_logic,
            assembler,
            quality,
            packaging,
            shipping,
            b1,
            b2,
            b3,
            b4,
            aggregator,
            registry,
            finished_count,
            started_at,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn stations(&self) -> [Arc<Station>; 5] {
        [
            self.intake.clone(),
            self.assembler.clone(),
            self.quality.clone(),
            self.packaging.clone(),
            self.shipping.clone(),
        ]
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn finished_count(&self) -> u64 {
        self.finished_count.load(Ordering::Relaxed)
    }

    pub fn aggregator(&self) -> Arc<MetricsAggregator> {
        self.aggregator.clone()
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        self.registry.clone()
    }

    pub fn station(&self, name: &str) -> Option<Arc<Station>> {
        self.stations().into_iter().find(|s| s.name == name)
    }

    /// Current combined occupancy of all four inter-station buffers.
    pub fn wip_count(&self) -> usize {
        self.b1.size() + self.b2.size() + self.b3.size() + self.b4.size()
    }

    /// Total rejected across every station, including Intake.
    pub fn total_rejected(&self) -> u64 {
        self.stations().iter().map(|s| s.rejected()).sum()
    }

    /// Size of one of the four named inter-station buffers ("B1".."B4").
    pub fn buffer_size(&self, name: &str) -> Option<usize> {
        match name {
            "B1" => Some(self.b1.size()),
            "B2" => Some(self.b2.size()),
            "B3" => Some(self.b3.size()),
            "B4" => Some(self.b4.size()),
            _ => None,
        }
    }

    /// Products currently held mid-processing inside any station (neither in
    /// a buffer nor yet forwarded). Zero once every station has cleanly
    /// stopped.
    pub fn in_process_count(&self) -> usize {
        self.stations().iter().filter(|s| s.current_product().is_some()).count()
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.events.send(PipelineEvent::Controller(event));
    }

    /// Relays Shipping's terminal `ProductProcessed` into a controller-level
    /// `ProductFinished`, and re-broadcasts station errors at the controller
    /// level, per the spec's event-routing contract.
    fn spawn_event_router(&self) -> JoinHandle<()> {
        let events = self.events.clone();
        let finished_count = self.finished_count.clone();
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(PipelineEvent::Station(StationEvent::ProductProcessed { station, product_id, at, trace, .. }))
                        if station == "Shipping" =>
                    {
                        finished_count.fetch_add(1, Ordering::Relaxed);
                        let _ = events.send(PipelineEvent::Controller(ControllerEvent::ProductFinished {
                            product_id,
                            at,
                            trace,
                        }));
                    }
                    Ok(PipelineEvent::Station(StationEvent::ErrorOccurred { message, .. })) => {
                        let _ = events.send(PipelineEvent::Controller(ControllerEvent::ErrorOccurred { message }));
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Idempotent. Reopens all four buffers (a no-op the first time, a real
    /// reopen on a restart after `stop`), starts every station, and spawns
    /// the background workers: the four processing loops, Intake's timer
    /// loop, the event router, the metrics sampler, and the health sweep.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.paused.store(false, Ordering::Release);
        *self.started_at.lock() = Instant::now();

        for buf in [&self.b1, &self.b2, &self.b3, &self.b4] {
            buf.restart();
        }
        for station in self.stations() {
            station.start();
        }

        let mut tasks = self.tasks.lock();
        tasks.push(spawn_processing(self.assembler.clone()));
        tasks.push(spawn_processing(self.quality.clone()));
        tasks.push(spawn_processing(self.packaging.clone()));
        tasks.push(spawn_processing(self.shipping.clone()));
        tasks.push(spawn_intake(
            self.intake.clone(),
            self.intake_logic.clone(),
            self.config.intake.production_rate_per_min,
        ));
        for station in self.stations() {
            tasks.push(spawn_metrics_timer(station));
        }
        tasks.push(self.spawn_event_router());
        tasks.push(
            self.aggregator
                .start(Duration::from_millis(self.config.aggregator_update_interval_ms)),
        );

        let stations_for_health = self.stations();
        tasks.push(self.registry.start(
            Duration::from_millis(self.config.worker_health_check_interval_ms),
            Duration::from_millis(self.config.worker_unresponsive_threshold_ms),
            move |name: &str| {
                stations_for_health
                    .iter()
                    .find(|s| s.name == name)
                    .map(|s| s.state() != StationState::Error)
                    .unwrap_or(true)
            },
        ));
        drop(tasks);

        self.emit(ControllerEvent::Started);
    }

    pub fn pause(&self) {
        if !self.running.load(Ordering::Acquire) || self.paused.swap(true, Ordering::AcqRel) {
            return;
        }
        for station in self.stations() {
            station.pause();
        }
        self.emit(ControllerEvent::Paused);
    }

    pub fn resume(&self) {
        if !self.running.load(Ordering::Acquire) || !self.paused.swap(false, Ordering::AcqRel) {
            return;
        }
        for station in self.stations() {
            station.resume();
        }
        self.emit(ControllerEvent::Resumed);
    }

    /// Idempotent. Requests every station stop, closes all four buffers as a
    /// safety net for anything still blocked on a push/pop, then waits (up
    /// to 5s per task) for every spawned worker to actually exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.emit(ControllerEvent::StopRequested);
        self.paused.store(false, Ordering::Release);

        for station in self.stations() {
            station.request_stop();
        }
        for buf in [&self.b1, &self.b2, &self.b3, &self.b4] {
            buf.stop();
        }
        self.aggregator.stop();
        self.registry.stop();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        self.emit(ControllerEvent::Stopped);
    }

    /// Stops the pipeline if running, reopens every buffer, clears any
    /// station left in `Error` back to `Idle`, zeroes the finished count,
    /// and clears the aggregator's retained history and alerts.
    pub async fn reset(&self) {
        if self.running.load(Ordering::Acquire) {
            self.stop().await;
        }
        for buf in [&self.b1, &self.b2, &self.b3, &self.b4] {
            buf.restart();
        }
        for station in self.stations() {
            if station.state() == StationState::Error {
                station.reset_state();
            }
        }
        self.finished_count.store(0, Ordering::Relaxed);
        self.aggregator.reset().await;
        self.emit(ControllerEvent::Reset);
    }

    /// Drains the logger's sink task. Only meaningful after `stop`; the
    /// controller does not outlive the process, so this is best-effort.
    pub async fn shutdown_logger(&self) {
        self.logger.stop();
        if let Some(handle) = self.logger_task.lock().take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::AggregatorEvent;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.buffer_capacity = 4;
        config.rng_seed = Some(11);
        config.intake.production_rate_per_min = 600.0; // fast tick for tests
        config.aggregator_update_interval_ms = 20;
        config
    }

    #[tokio::test]
    async fn products_flow_from_intake_to_finished() {
        let controller = PipelineController::new(test_config());
        let mut rx = controller.subscribe();
        controller.start();

        let mut saw_finished = false;
        for _ in 0..2000 {
            match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
                Ok(Ok(PipelineEvent::Controller(ControllerEvent::ProductFinished { .. }))) => {
                    saw_finished = true;
                    break;
                }
                Ok(Ok(_)) => continue,
                _ => continue,
            }
        }
        controller.stop().await;
        assert!(saw_finished, "expected at least one product to finish");
        assert!(controller.finished_count() >= 1);
    }

    #[tokio::test]
    async fn stop_then_start_resumes_flow() {
        let controller = PipelineController::new(test_config());
        controller.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.stop().await;
        assert!(!controller.is_running());

        let before = controller.finished_count();
        controller.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.stop().await;
        assert!(controller.finished_count() >= before);
    }

    #[tokio::test]
    async fn reset_clears_finished_count_and_history() {
        let controller = PipelineController::new(test_config());
        controller.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.reset().await;
        assert_eq!(controller.finished_count(), 0);
        let derived = controller.aggregator().derived_stats().await;
        assert!(derived.moving_avg_60.is_empty());
    }

    #[tokio::test]
    async fn aggregator_emits_stats_while_running() {
        let controller = PipelineController::new(test_config());
        let mut rx = controller.subscribe();
        controller.start();

        let mut saw_stats = false;
        for _ in 0..50 {
            match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
                Ok(Ok(PipelineEvent::Aggregator(AggregatorEvent::StatsUpdated { .. }))) => {
                    saw_stats = true;
                    break;
                }
                _ => continue,
            }
        }
        controller.stop().await;
        assert!(saw_stats);
    }
}
