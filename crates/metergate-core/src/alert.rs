//! Budget alert delivery.
//!
//! The ledger emits an alert whenever a post-execution check crosses a
//! threshold. Delivery is the deployment's choice: the default sink writes
//! structured log events, and the in-memory sink backs tests and dashboards.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Informational.
    Info,
    /// Budget pressure worth attention.
    Warning,
    /// A hard limit was crossed.
    Critical,
    /// Spending must stop now.
    Emergency,
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Emergency => "emergency",
        };
        write!(f, "{s}")
    }
}

/// Which limit produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Hourly query-count limit.
    HourlyQueryLimit,
    /// Daily query-count limit.
    DailyQueryLimit,
    /// Daily cost limit.
    DailyCostLimit,
    /// Monthly cost limit.
    MonthlyCostLimit,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertKind::HourlyQueryLimit => "hourly_query_limit",
            AlertKind::DailyQueryLimit => "daily_query_limit",
            AlertKind::DailyCostLimit => "daily_cost_limit",
            AlertKind::MonthlyCostLimit => "monthly_cost_limit",
        };
        write!(f, "{s}")
    }
}

/// A single budget alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// The limit that was breached.
    pub kind: AlertKind,
    /// Severity of the breach.
    pub severity: AlertSeverity,
    /// Human-readable description.
    pub message: String,
    /// Structured details (current value, limit).
    pub details: serde_json::Value,
    /// When the alert was raised.
    pub at: DateTime<Utc>,
}

impl Alert {
    /// Build an alert stamped with the current time.
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            details,
            at: Utc::now(),
        }
    }
}

/// Destination for budget alerts.
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. Must not block on network I/O.
    fn send(&self, alert: Alert);
}

/// Sink that writes alerts as structured log events.
#[derive(Debug, Default)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn send(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Info => {
                info!(kind = %alert.kind, details = %alert.details, "{}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(kind = %alert.kind, details = %alert.details, "{}", alert.message)
            }
            AlertSeverity::Critical | AlertSeverity::Emergency => {
                error!(
                    kind = %alert.kind,
                    severity = %alert.severity,
                    details = %alert.details,
                    "{}",
                    alert.message
                )
            }
        }
    }
}

/// Sink that retains alerts in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlertSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all alerts received so far.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Number of alerts received.
    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    /// Whether no alerts were received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all retained alerts.
    pub fn clear(&self) {
        self.alerts.lock().clear();
    }
}

impl AlertSink for MemoryAlertSink {
    fn send(&self, alert: Alert) {
        self.alerts.lock().push(alert);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_retains_alerts() {
        let sink = MemoryAlertSink::new();
        assert!(sink.is_empty());

        sink.send(Alert::new(
            AlertKind::DailyCostLimit,
            AlertSeverity::Emergency,
            "daily cost limit exceeded",
            json!({"current": 5.2, "limit": 5.0}),
        ));

        let alerts = sink.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::DailyCostLimit);
        assert_eq!(alerts[0].severity, AlertSeverity::Emergency);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AlertSeverity::Emergency > AlertSeverity::Critical);
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }
}
