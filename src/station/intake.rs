//! Intake is timer-driven rather than input-buffer-driven: it has no input
//! buffer, and its forward push is `try_push`-only (a full downstream
//! buffer just drops the tick's product rather than flipping to `Blocked`).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::buffer::Outcome;
use crate::events::StationEvent;
use crate::product::{Product, ProductKind};
use crate::rng::PipelineRng;
use crate::station::{ProcessOutcome, Station, StationLogic, StationState};

pub struct IntakeLogic {
    pub min_ms: u64,
    pub max_ms: u64,
    pub failure_rate: f64,
}

impl IntakeLogic {
    pub fn generate(&self, rng: &PipelineRng) -> Product {
        let idx = rng.gen_index(ProductKind::ALL.len());
        let mut product = Product::new(ProductKind::ALL[idx]);
        product.advance(); // Created -> AtIntake
        product
    }
}

#[async_trait]
impl StationLogic for IntakeLogic {
    async fn process(&self, _product: &mut Product, rng: &PipelineRng) -> ProcessOutcome {
        if rng.gen_bool(self.failure_rate) {
            ProcessOutcome::Reject
        } else {
            ProcessOutcome::Pass
        }
    }

    fn processing_delay(&self, rng: &PipelineRng) -> Duration {
        Duration::from_millis(rng.gen_range_u64(self.min_ms, self.max_ms))
    }
}

/// `production_rate_per_min` governs tick cadence; the logic's own
/// `[min_ms, max_ms]` range simulates the generation time within a tick.
pub fn spawn_intake(station: Arc<Station>, logic: Arc<IntakeLogic>, production_rate_per_min: f64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval_ms = (60_000.0 / production_rate_per_min.max(0.01)).max(1.0) as u64;
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));

        loop {
            ticker.tick().await;
            if station.stopping.load(Ordering::Acquire) {
                break;
            }
            if station.state() != StationState::Running {
                continue;
            }

            let mut product = logic.generate(&station.rng);
            tokio::time::sleep(logic.processing_delay(&station.rng)).await;
            let outcome = logic.process(&mut product, &station.rng).await;

            match outcome {
                ProcessOutcome::Reject => {
                    product.reject();
                    station.rejected.fetch_add(1, Ordering::Relaxed);
                    station.emit(StationEvent::ProductRejected {
                        station: station.name.clone(),
                        product_id: product.id,
                        at: Utc::now(),
                        trace: product.trace.iter().map(|t| t.station.clone()).collect(),
                    });
                }
                ProcessOutcome::Pass => {
                    product.record_trace(&station.name);
                    product.advance();
                    if let Some(out) = &station.output {
                        if let Ok(Outcome::Accepted) = out.try_push(product) {
                            station.processed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                ProcessOutcome::Rework => unreachable!("Intake never reworks a product"),
            }
        }
        station.mark_stopped();
    })
}
