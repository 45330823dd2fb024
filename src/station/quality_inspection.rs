//! QualityInspection is the one station with a non-trivial decision: an
//! outright failure-rate sample first, then `N` independent sub-tests whose
//! failure count decides Pass vs. Rework. An external `max_rework_count`
//! cap (unset by default) forces a Reject once a product has cycled
//! through rework that many times, matching the rework-loop scenario's
//! requirement that it eventually terminate.

use std::time::Duration;

use async_trait::async_trait;

use crate::product::Product;
use crate::rng::PipelineRng;
use crate::station::{ProcessOutcome, StationLogic};

const SUB_TESTS_PER_PRODUCT: u32 = 4;

pub struct QualityInspectionLogic {
    pub min_ms: u64,
    pub max_ms: u64,
    pub failure_rate: f64,
    pub sub_test_pass_rate: f64,
    pub rework_rate: f64,
    pub max_rework_count: Option<u32>,
}

#[async_trait]
impl StationLogic for QualityInspectionLogic {
    async fn process(&self, product: &mut Product, rng: &PipelineRng) -> ProcessOutcome {
        if rng.gen_bool(self.failure_rate) {
            return ProcessOutcome::Reject;
        }

        let failures = (0..SUB_TESTS_PER_PRODUCT)
            .filter(|_| !rng.gen_bool(self.sub_test_pass_rate))
            .count();

        let wants_rework = match failures {
            0 => false,
            1 => rng.gen_bool(self.rework_rate),
            _ => true,
        };

        if !wants_rework {
            return ProcessOutcome::Pass;
        }

        if let Some(cap) = self.max_rework_count {
            if product.rework_count >= cap {
                return ProcessOutcome::Reject;
            }
        }
        ProcessOutcome::Rework
    }

    fn processing_delay(&self, rng: &PipelineRng) -> Duration {
        Duration::from_millis(rng.gen_range_u64(self.min_ms, self.max_ms))
    }
}
