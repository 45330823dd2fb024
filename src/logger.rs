//! AsyncLogger: a simulated in-pipeline log sink, distinct from this
//! crate's own `tracing`-based operational logging. This is the component
//! an external UI would subscribe to for `logEntryAdded` events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::PipelineEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: String,
    pub thread_name: String,
    pub message: String,
}

pub struct AsyncLogger {
    tx: Mutex<Option<mpsc::UnboundedSender<LogRecord>>>,
    events: broadcast::Sender<PipelineEvent>,
    min_level: LogLevel,
    draining: AtomicBool,
}

impl AsyncLogger {
    /// Spawns the single dedicated sink task and returns the logger plus a
    /// handle callers can await to know the sink has fully drained. `events`
    /// is the same broadcast channel every other component posts to, so a
    /// `logEntryAdded` observer can subscribe once and see everything.
    pub fn start(
        min_level: LogLevel,
        mut sink: impl AsyncWrite + Unpin + Send + 'static,
        events: broadcast::Sender<PipelineEvent>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogRecord>();
        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let line = format!(
                    "{} [{:?}] ({}) {}: {}\n",
                    record.timestamp.to_rfc3339(),
                    record.level,
                    record.thread_name,
                    record.category,
                    record.message
                );
                if sink.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            let _ = sink.flush().await;
        });

        let logger = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            events,
            min_level,
            draining: AtomicBool::new(false),
        });
        (logger, handle)
    }

    pub fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        if level < self.min_level || self.draining.load(Ordering::Acquire) {
            return;
        }
        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            category: category.to_string(),
            thread_name: current_thread_name(),
            message: message.into(),
        };
        let _ = self.events.send(PipelineEvent::Logger(record.clone()));
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(record);
        }
    }

    /// Drops the sender, which closes the channel: the sink task drains
    /// whatever is already queued and exits. Records enqueued after this
    /// call are dropped rather than delivered.
    pub fn stop(&self) {
        self.draining.store(true, Ordering::Release);
        self.tx.lock().take();
    }
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?}", std::thread::current().id()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logged_records_reach_the_sink() {
        let (tx, _rx) = broadcast::channel(16);
        let (logger, handle) = AsyncLogger::start(LogLevel::Debug, tokio::io::sink(), tx);
        logger.log(LogLevel::Info, "test", "hello");
        logger.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn records_below_min_level_are_filtered() {
        let (tx, _rx) = broadcast::channel(16);
        let (logger, handle) = AsyncLogger::start(LogLevel::Error, tokio::io::sink(), tx);
        logger.log(LogLevel::Debug, "test", "should be dropped");
        logger.log(LogLevel::Critical, "test", "should pass");
        logger.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn logged_records_are_published_on_the_event_bus() {
        let (tx, mut rx) = broadcast::channel(16);
        let (logger, handle) = AsyncLogger::start(LogLevel::Debug, tokio::io::sink(), tx);
        logger.log(LogLevel::Warning, "test", "observable");
        match rx.recv().await {
            Ok(PipelineEvent::Logger(record)) => {
                assert_eq!(record.category, "test");
                assert_eq!(record.message, "observable");
            }
            other => panic!("expected a Logger event, got {other:?}"),
        }
        logger.stop();
        handle.await.unwrap();
    }
}
