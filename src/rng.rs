//! A single shared pseudorandom source. Every station and Intake's type
//! sampler draw through this one instance so a seeded run is reproducible.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct PipelineRng {
    inner: Mutex<StdRng>,
}

impl PipelineRng {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    pub fn gen_range_u64(&self, lo: u64, hi: u64) -> u64 {
        if lo >= hi {
            return lo;
        }
        self.inner.lock().gen_range(lo..=hi)
    }

    pub fn gen_bool(&self, p: f64) -> bool {
        self.inner.lock().gen_bool(p.clamp(0.0, 1.0))
    }

    pub fn gen_index(&self, n: usize) -> usize {
        self.inner.lock().gen_range(0..n)
    }
}
