//! Shipping has no output buffer; `Station::forward`'s terminal branch
//! handles emitting `ProductProcessed` for a finished product. Translating
//! that into a controller-level `productFinished` event is the
//! controller's job, not this station's — see `controller.rs`.

use std::time::Duration;

use async_trait::async_trait;

use crate::product::Product;
use crate::rng::PipelineRng;
use crate::station::{ProcessOutcome, StationLogic};

pub struct ShippingLogic {
    pub min_ms: u64,
    pub max_ms: u64,
    pub failure_rate: f64,
}

#[async_trait]
impl StationLogic for ShippingLogic {
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
