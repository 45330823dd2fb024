//! Core library for the manufacturing pipeline simulation: five stations
//! connected by bounded buffers, a controller that owns their lifecycle, a
//! metrics aggregator, a worker registry, and an async log sink.

pub mod buffer;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod logger;
pub mod metrics;
pub mod product;
pub mod registry;
pub mod rng;
pub mod station;

pub use config::Config;
pub use controller::PipelineController;
pub use error::{PipelineError, Result};
