//! Tick snapshots and where they go.
//!
//! The controller hands a read-only [`Snapshot`] to a [`MetricsSink`] after
//! every tick. Recording is best-effort: an error is logged by the caller and
//! never stops the loop.

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FanMetrics {
    pub current: i32,
    pub target: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TemperatureMetrics {
    pub current: i32,
    pub average: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerMetrics {
    pub current: i32,
    pub target: i32,
    pub average: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateMetrics {
    pub auto_fan_control: bool,
    pub performance_mode: bool,
    /// At least one reading this tick fell back to its last-known value.
    pub degraded: bool,
}

/// State of one control tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub fan_speed: FanMetrics,
    pub temperature: TemperatureMetrics,
    pub power_limit: PowerMetrics,
    pub state: StateMetrics,
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics sink is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&mut self, snapshot: &Snapshot) -> Result<(), MetricsError>;

    async fn close(&mut self) -> Result<(), MetricsError>;
}

/// Discards everything. Used when no consumer is attached.
#[derive(Debug, Default)]
pub struct NoopMetrics;

#[async_trait]
impl MetricsSink for NoopMetrics {
    async fn record(&mut self, _snapshot: &Snapshot) -> Result<(), MetricsError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Publishes the most recent snapshot on a watch channel.
///
/// Only the latest value is kept; slow readers skip intermediate ticks.
#[derive(Debug)]
pub struct WatchMetrics {
    tx: Option<watch::Sender<Option<Snapshot>>>,
}

impl WatchMetrics {
    pub fn new() -> (Self, watch::Receiver<Option<Snapshot>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx: Some(tx) }, rx)
    }
}

#[async_trait]
impl MetricsSink for WatchMetrics {
    async fn record(&mut self, snapshot: &Snapshot) -> Result<(), MetricsError> {
        let tx = self.tx.as_ref().ok_or(MetricsError::Closed)?;
        // No receivers is fine; the value is still retained for late subscribers.
        tx.send_replace(Some(snapshot.clone()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MetricsError> {
        self.tx.take();
        Ok(())
    }
}
