//! The event vocabulary stations, the controller, and the aggregator
//! broadcast on the shared `tokio::sync::broadcast` channel. An external
//! observer (the CLI's `status` loop, or a future UI) subscribes once and
//! sees the whole pipeline through this one enum.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::logger::LogRecord;
use crate::metrics::{AlertKind, DerivedStats, MetricsSample};
use crate::product::ProductState;
use crate::station::StationState;

#[derive(Debug, Clone)]
pub enum StationEvent {
    StateChanged {
        station: String,
        from: StationState,
        to: StationState,
    },
    ProductProcessed {
        station: String,
        product_id: Uuid,
        resulting_state: ProductState,
        at: DateTime<Utc>,
        trace: Vec<String>,
    },
    ProductRejected {
        station: String,
        product_id: Uuid,
        at: DateTime<Utc>,
        trace: Vec<String>,
    },
    Blocked {
        station: String,
        downstream: String,
    },
    Unblocked {
        station: String,
    },
    ErrorOccurred {
        station: String,
        message: String,
    },
    MetricsUpdated {
        station: String,
        input_depth: usize,
        throughput_per_minute: f64,
    },
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Started,
    Paused,
    Resumed,
    StopRequested,
    Stopped,
    Reset,
    ProductFinished { product_id: Uuid, at: DateTime<Utc>, trace: Vec<String> },
    WorkerUnresponsive { name: String },
    ErrorOccurred { message: String },
}

#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    StatsUpdated { sample: MetricsSample },
    AggregatedStatsChanged { derived: DerivedStats },
    AlertTriggered { kind: AlertKind, message: String, value: f64 },
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Station(StationEvent),
    Controller(ControllerEvent),
    Aggregator(AggregatorEvent),
    Logger(LogRecord),
}

impl From<StationEvent> for PipelineEvent {
    fn from(e: StationEvent) -> Self {
        PipelineEvent::Station(e)
    }
}

impl From<ControllerEvent> for PipelineEvent {
    fn from(e: ControllerEvent) -> Self {
        PipelineEvent::Controller(e)
    }
}

impl From<AggregatorEvent> for PipelineEvent {
    fn from(e: AggregatorEvent) -> Self {
        PipelineEvent::Aggregator(e)
    }
}

impl From<LogRecord> for PipelineEvent {
    fn from(e: LogRecord) -> Self {
        PipelineEvent::Logger(e)
    }
}
