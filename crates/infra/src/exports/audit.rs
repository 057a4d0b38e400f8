//! Fire-and-forget audit trail for export and schedule mutations.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use exportkit_core::OwnerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditAction {
    #[serde(rename = "export.created")]
    ExportCreated,
    #[serde(rename = "export.completed")]
    ExportCompleted,
    #[serde(rename = "export.failed")]
    ExportFailed,
    #[serde(rename = "export.deleted")]
    ExportDeleted,
    #[serde(rename = "export.url_refreshed")]
    ExportUrlRefreshed,
    #[serde(rename = "schedule.created")]
    ScheduleCreated,
    #[serde(rename = "schedule.updated")]
    ScheduleUpdated,
    #[serde(rename = "schedule.deleted")]
    ScheduleDeleted,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ExportCreated => "export.created",
            AuditAction::ExportCompleted => "export.completed",
            AuditAction::ExportFailed => "export.failed",
            AuditAction::ExportDeleted => "export.deleted",
            AuditAction::ExportUrlRefreshed => "export.url_refreshed",
            AuditAction::ScheduleCreated => "schedule.created",
            AuditAction::ScheduleUpdated => "schedule.updated",
            AuditAction::ScheduleDeleted => "schedule.deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub owner: OwnerId,
    pub subject_id: String,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl AuditEvent {
    pub fn new(action: AuditAction, owner: OwnerId, subject_id: impl ToString, at: DateTime<Utc>) -> Self {
        Self {
            action,
            owner,
            subject_id: subject_id.to_string(),
            at,
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit sink. Recording never fails the calling operation.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured log lines on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            action = event.action.as_str(),
            owner = %event.owner,
            subject_id = %event.subject_id,
            at = %event.at.to_rfc3339(),
            details = %event.details,
            "audit"
        );
    }
}

/// Collects events in memory for assertions.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.events().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }
}
