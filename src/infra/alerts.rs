//! Structured-log alert sink.
//!
//! Alert delivery, storage and acknowledgement live outside this
//! service; the default sink emits alerts as structured log events so
//! the log pipeline can route them.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::domain::{AlertKind, AlertSeverity, AlertSink};

#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn create_alert(
        &self,
        kind: AlertKind,
        message: &str,
        severity: AlertSeverity,
        related_account_id: Option<i64>,
        metadata: Option<serde_json::Value>,
    ) {
        let metadata = metadata.unwrap_or(serde_json::Value::Null);
        match severity {
            AlertSeverity::Info => info!(
                alert = kind.as_str(),
                account_id = related_account_id,
                metadata = %metadata,
                "{}",
                message
            ),
            AlertSeverity::Warning => warn!(
                alert = kind.as_str(),
                account_id = related_account_id,
                metadata = %metadata,
                "{}",
                message
            ),
            AlertSeverity::Critical => error!(
                alert = kind.as_str(),
                account_id = related_account_id,
                metadata = %metadata,
                "{}",
                message
            ),
        }
    }
}
