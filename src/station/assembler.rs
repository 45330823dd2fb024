use std::time::Duration;

use async_trait::async_trait;

use crate::product::Product;
use crate::rng::PipelineRng;
use crate::station::{ProcessOutcome, StationLogic};

pub struct AssemblerLogic {
    pub min_ms: u64,
    pub max_ms: u64,
    pub failure_rate: f64,
}

#[async_trait]
impl StationLogic for AssemblerLogic {
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
