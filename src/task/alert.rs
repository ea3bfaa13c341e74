//! Severity-ordered operational alerts.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    pub raised_at: std::time::SystemTime,
}

/// Anything that wants to observe alerts as they are raised (a metrics
/// exporter, a notification sink, ...) implements this.
#[async_trait]
pub trait Manager: Send + Sync {
    async fn raise(&self, severity: Severity, message: String);
}

/// Default in-memory alert sink: logs through `tracing` at a level
/// matching severity, and retains recent alerts for inspection.
pub struct AlertLog {
    retention: Duration,
    entries: Mutex<VecDeque<(Instant, Alert)>>,
}

impl AlertLog {
    /// Alerts older than 10 minutes are dropped from the in-memory log;
    /// they have already been emitted through `tracing` by then.
    const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

    pub fn new() -> Self {
        Self {
            retention: Self::DEFAULT_RETENTION,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn recent(&self) -> Vec<Alert> {
        let entries = self.entries.lock().await;
        entries.iter().map(|(_, a)| a.clone()).collect()
    }

    async fn prune(&self, entries: &mut VecDeque<(Instant, Alert)>) {
        let now = Instant::now();
        let retention = self.retention;
        while let Some((at, _)) = entries.front() {
            if now.duration_since(*at) > retention {
                entries.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Manager for AlertLog {
    async fn raise(&self, severity: Severity, message: String) {
        match severity {
            Severity::Info => info!(%message, "alert"),
            Severity::Warning => warn!(%message, "alert"),
            Severity::Critical => error!(%message, "alert"),
        }
        let alert = Alert {
            severity,
            message,
            raised_at: std::time::SystemTime::now(),
        };
        let mut entries = self.entries.lock().await;
        self.prune(&mut entries).await;
        entries.push_back((Instant::now(), alert));
    }
}
