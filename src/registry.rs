//! WorkerRegistry: liveness bookkeeping for every background worker
//! (stations, the logger sink, the metrics sampler, the event router).
//! Pause/resume is not a registry concern — see spec §4.4's note; this only
//! tracks whether a worker is still alive and recently health-checked.
//!
//! Grounded on the teacher's `MetricsReporter::start`/`stop` background-task
//! pair for the health-check/sweep tasks' own shape.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::{ControllerEvent, PipelineEvent};

#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub name: String,
    pub priority_hint: u8,
    pub started_at: DateTime<Utc>,
    pub last_health_check: DateTime<Utc>,
    pub active: bool,
}

pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerRecord>>,
    running: AtomicBool,
    events: broadcast::Sender<PipelineEvent>,
}

impl WorkerRegistry {
    pub fn new(events: broadcast::Sender<PipelineEvent>) -> Arc<Self> {
        Arc::new(Self {
            workers: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
            events,
        })
    }

    pub fn register(&self, name: impl Into<String>, priority_hint: u8) {
        let name = name.into();
        let now = Utc::now();
        self.workers.lock().insert(
            name.clone(),
            WorkerRecord {
                name,
                priority_hint,
                started_at: now,
                last_health_check: now,
                active: true,
            },
        );
    }

    pub fn unregister(&self, name: &str) {
        self.workers.lock().remove(name);
    }

    pub fn list(&self) -> Vec<WorkerRecord> {
        self.workers.lock().values().cloned().collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<WorkerRecord> {
        self.workers.lock().get(name).cloned()
    }

    pub fn count_active(&self) -> usize {
        self.workers.lock().values().filter(|w| w.active).count()
    }

    pub fn touch(&self, name: &str) {
        if let Some(record) = self.workers.lock().get_mut(name) {
            record.last_health_check = Utc::now();
        }
    }

    /// Marks every still-registered worker's health-check stamp current.
    /// A worker whose liveness predicate the caller supplies as `false`
    /// raises a desync alert and has its active flag cleared.
    fn health_sweep(&self, is_alive: impl Fn(&str) -> bool) {
        let mut workers = self.workers.lock();
        let now = Utc::now();
        for record in workers.values_mut() {
            if is_alive(&record.name) {
                record.last_health_check = now;
            } else if record.active {
                record.active = false;
                let _ = self.events.send(PipelineEvent::Controller(ControllerEvent::WorkerUnresponsive {
                    name: record.name.clone(),
                }));
            }
        }
    }

    /// Force-stops (marks inactive and alerts on) any worker whose last
    /// health-check stamp is older than `threshold`.
    fn terminate_unresponsive(&self, threshold: Duration) -> Vec<String> {
        let mut workers = self.workers.lock();
        let now = Utc::now();
        let mut terminated = Vec::new();
        for record in workers.values_mut() {
            let age = now.signed_duration_since(record.last_health_check);
            if age.to_std().unwrap_or(Duration::ZERO) > threshold && record.active {
                record.active = false;
                terminated.push(record.name.clone());
            }
        }
        drop(workers);
        for name in &terminated {
            let _ = self
                .events
                .send(PipelineEvent::Controller(ControllerEvent::WorkerUnresponsive { name: name.clone() }));
        }
        terminated
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Spawns the periodic health-check and unresponsive-sweep tasks. The
    /// `is_alive` predicate lets the controller wire in the actual
    /// liveness source (e.g. a station's run state) without this module
    /// depending on `Station`.
    pub fn start(
        self: &Arc<Self>,
        health_check_interval: Duration,
        unresponsive_threshold: Duration,
        is_alive: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> JoinHandle<()> {
        let this = self.clone();
        self.running.store(true, Ordering::Release);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_check_interval);
            loop {
                ticker.tick().await;
                if !this.running.load(Ordering::Acquire) {
                    break;
                }
                this.health_sweep(&is_alive);
                this.terminate_unresponsive(unresponsive_threshold);
            }
        })
    }
}
