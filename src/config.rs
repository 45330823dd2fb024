//! Configuration for the pipeline simulation

use anyhow::Result;
use serde::Deserialize;

use crate::logger::LogLevel;

#[derive(Debug, Clone, Deserialize)]
pub struct IntakeConfig {
    #[serde(default = "default_intake_min_ms")]
    pub min_processing_ms: u64,
    #[serde(default = "default_intake_max_ms")]
    pub max_processing_ms: u64,
    #[serde(default)]
    pub failure_rate: f64,
    #[serde(default = "default_production_rate")]
    pub production_rate_per_min: f64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            min_processing_ms: default_intake_min_ms(),
            max_processing_ms: default_intake_max_ms(),
            failure_rate: 0.0,
            production_rate_per_min: default_production_rate(),
        }
    }
}

fn default_intake_min_ms() -> u64 {
    50
}
fn default_intake_max_ms() -> u64 {
    150
}
fn default_production_rate() -> f64 {
    10.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    #[serde(default = "default_assembler_min_ms")]
    pub min_processing_ms: u64,
    #[serde(default = "default_assembler_max_ms")]
    pub max_processing_ms: u64,
    #[serde(default = "default_assembler_failure_rate")]
    pub failure_rate: f64,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            min_processing_ms: default_assembler_min_ms(),
            max_processing_ms: default_assembler_max_ms(),
            failure_rate: default_assembler_failure_rate(),
        }
    }
}

fn default_assembler_min_ms() -> u64 {
    200
}
fn default_assembler_max_ms() -> u64 {
    400
}
fn default_assembler_failure_rate() -> f64 {
    0.02
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_min_ms")]
    pub min_processing_ms: u64,
    #[serde(default = "default_quality_max_ms")]
    pub max_processing_ms: u64,
    #[serde(default = "default_quality_failure_rate")]
    pub failure_rate: f64,
    #[serde(default = "default_sub_test_pass_rate")]
    pub sub_test_pass_rate: f64,
    #[serde(default = "default_rework_rate")]
    pub rework_rate: f64,
    pub max_rework_count: Option<u32>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_processing_ms: default_quality_min_ms(),
            max_processing_ms: default_quality_max_ms(),
            failure_rate: default_quality_failure_rate(),
            sub_test_pass_rate: default_sub_test_pass_rate(),
            rework_rate: default_rework_rate(),
            max_rework_count: None,
        }
    }
}

fn default_quality_min_ms() -> u64 {
    150
}
fn default_quality_max_ms() -> u64 {
    300
}
fn default_quality_failure_rate() -> f64 {
    0.03
}
fn default_sub_test_pass_rate() -> f64 {
    0.85
}
fn default_rework_rate() -> f64 {
    0.08
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackagingConfig {
    #[serde(default = "default_packaging_min_ms")]
    pub min_processing_ms: u64,
    #[serde(default = "default_packaging_max_ms")]
    pub max_processing_ms: u64,
    #[serde(default = "default_packaging_failure_rate")]
    pub failure_rate: f64,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            min_processing_ms: default_packaging_min_ms(),
            max_processing_ms: default_packaging_max_ms(),
            failure_rate: default_packaging_failure_rate(),
        }
    }
}

fn default_packaging_min_ms() -> u64 {
    180
}
fn default_packaging_max_ms() -> u64 {
    350
}
fn default_packaging_failure_rate() -> f64 {
    0.01
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingConfig {
    #[serde(default = "default_shipping_min_ms")]
    pub min_processing_ms: u64,
    #[serde(default = "default_shipping_max_ms")]
    pub max_processing_ms: u64,
    #[serde(default = "default_shipping_failure_rate")]
    pub failure_rate: f64,
}

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            min_processing_ms: default_shipping_min_ms(),
            max_processing_ms: default_shipping_max_ms(),
            failure_rate: default_shipping_failure_rate(),
        }
    }
}

fn default_shipping_min_ms() -> u64 {
    100
}
fn default_shipping_max_ms() -> u64 {
    200
}
fn default_shipping_failure_rate() -> f64 {
    0.005
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default)]
    pub intake: IntakeConfig,
    #[serde(default)]
    pub assembler: AssemblerConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub packaging: PackagingConfig,
    #[serde(default)]
    pub shipping: ShippingConfig,

    /// Seeds the shared pipeline RNG; unset means seed from OS entropy.
    pub rng_seed: Option<u64>,

    #[serde(default = "default_agg_interval_ms")]
    pub aggregator_update_interval_ms: u64,
    #[serde(default = "default_history_size")]
    pub aggregator_max_history_size: usize,
    #[serde(default = "default_expected_throughput")]
    pub aggregator_expected_throughput_per_min: f64,

    #[serde(default)]
    pub logger_min_level: LogLevel,

    #[serde(default = "default_health_check_ms")]
    pub worker_health_check_interval_ms: u64,
    #[serde(default = "default_unresponsive_ms")]
    pub worker_unresponsive_threshold_ms: u64,
}

fn default_buffer_capacity() -> usize {
    20
}
fn default_agg_interval_ms() -> u64 {
    1000
}
fn default_history_size() -> usize {
    300
}
fn default_expected_throughput() -> f64 {
    10.0
}
fn default_health_check_ms() -> u64 {
    5000
}
fn default_unresponsive_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            intake: IntakeConfig::default(),
            assembler: AssemblerConfig::default(),
            quality: QualityConfig::default(),
            packaging: PackagingConfig::default(),
            shipping: ShippingConfig::default(),
            rng_seed: None,
            aggregator_update_interval_ms: default_agg_interval_ms(),
            aggregator_max_history_size: default_history_size(),
            aggregator_expected_throughput_per_min: default_expected_throughput(),
            logger_min_level: LogLevel::default(),
            worker_health_check_interval_ms: default_health_check_ms(),
            worker_unresponsive_threshold_ms: default_unresponsive_ms(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PIPELINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.buffer_capacity >= 1, "buffer_capacity must be at least 1");
        Ok(())
    }
}
