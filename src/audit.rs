/// Audit logging for chain rotations
///
/// Every rotation that touches the engine leaves a JSON-lines record:
/// opened, closed, or failed with the error that stopped it.
use crate::core::family::Family;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Types of auditable events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    OpenRotation,
    CloseRotation,
    RotationFailed,
    InspectChains,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Identifies the rotation run an event belongs to
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub run_id: Uuid,
    pub plan_sha256: Option<&'a str>,
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Audit log at an explicit path
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log (one JSON object per line)
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events from the log, newest first
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }

    /// Writes an event; audit failures never abort a rotation
    async fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(event).await {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }

    pub async fn log_open(&self, ctx: RunContext<'_>, name: &str, families: &[Family]) {
        self.record(AuditEvent::new(
            EventType::OpenRotation,
            true,
            serde_json::json!({
                "run_id": ctx.run_id,
                "plan_sha256": ctx.plan_sha256,
                "container": name,
                "families": families,
            }),
            None,
        ))
        .await;
    }

    pub async fn log_close(
        &self,
        ctx: RunContext<'_>,
        name: &str,
        family: Family,
        rules_appended: usize,
    ) {
        self.record(AuditEvent::new(
            EventType::CloseRotation,
            true,
            serde_json::json!({
                "run_id": ctx.run_id,
                "plan_sha256": ctx.plan_sha256,
                "container": name,
                "family": family,
                "rules_appended": rules_appended,
            }),
            None,
        ))
        .await;
    }

    pub async fn log_failure(&self, ctx: RunContext<'_>, name: &str, error: String) {
        self.record(AuditEvent::new(
            EventType::RotationFailed,
            false,
            serde_json::json!({
                "run_id": ctx.run_id,
                "plan_sha256": ctx.plan_sha256,
                "container": name,
            }),
            Some(error),
        ))
        .await;
    }

    pub async fn log_inspect(&self, name: &str, family: Family, steady: bool) {
        self.record(AuditEvent::new(
            EventType::InspectChains,
            steady,
            serde_json::json!({
                "container": name,
                "family": family,
            }),
            None,
        ))
        .await;
    }
}
