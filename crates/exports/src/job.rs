//! Export job model and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use exportkit_core::{DomainError, DomainResult, ExportId, OwnerId};

/// Dataset an export materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Sessions,
    Agents,
    All,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Sessions => "sessions",
            DataType::Agents => "agents",
            DataType::All => "all",
        }
    }
}

impl core::fmt::Display for DataType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output encoding of an export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }
}

/// Row filters passed by value to the data sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
}

impl ExportFilters {
    /// Whether any session-specific criterion is present.
    ///
    /// `DataType::All` exports follow the sessions branch only when this holds.
    pub fn has_session_criteria(&self) -> bool {
        self.date_from.is_some()
            || self.date_to.is_some()
            || self.status.is_some()
            || self.agent_id.is_some()
    }
}

/// Where a completed artifact ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Durable object storage; the URL is a signed, shareable link.
    Persistent,
    /// Process-local fallback after a storage failure; lost on restart.
    Ephemeral,
}

/// Export job status.
///
/// Transitions only move forward:
/// `Pending -> Processing -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Processing,
    Completed { storage: StorageKind },
    Failed,
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportStatus::Completed { .. } | ExportStatus::Failed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExportStatus::Pending => "pending",
            ExportStatus::Processing => "processing",
            ExportStatus::Completed { .. } => "completed",
            ExportStatus::Failed => "failed",
        }
    }
}

/// A one-off export request as submitted by a user or a firing schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub data_type: DataType,
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: ExportFilters,
}

/// Everything the coordinator learns about a successfully stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedArtifact {
    pub file_name: String,
    pub file_size_bytes: u64,
    pub storage_path: String,
    pub storage: StorageKind,
    pub download_url: String,
    pub download_url_expires_at: DateTime<Utc>,
}

/// Export job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: ExportId,
    pub owner: OwnerId,
    pub data_type: DataType,
    pub format: ExportFormat,
    #[serde(flatten)]
    pub status: ExportStatus,
    pub filters: ExportFilters,
    pub file_name: Option<String>,
    pub file_size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
    pub download_url: Option<String>,
    pub download_url_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExportJob {
    /// Create a new job in `Pending`.
    pub fn new(owner: OwnerId, request: ExportRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: ExportId::new(),
            owner,
            data_type: request.data_type,
            format: request.format,
            status: ExportStatus::Pending,
            filters: request.filters,
            file_name: None,
            file_size_bytes: None,
            storage_path: None,
            download_url: None,
            download_url_expires_at: None,
            error_message: None,
            error_details: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Pending -> Processing.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.expect_status("processing", matches!(self.status, ExportStatus::Pending))?;
        self.status = ExportStatus::Processing;
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Completed.
    ///
    /// The download URL must outlive the completion instant.
    pub fn mark_completed(
        &mut self,
        artifact: CompletedArtifact,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.expect_status("completed", matches!(self.status, ExportStatus::Processing))?;
        if artifact.download_url_expires_at <= now {
            return Err(DomainError::invariant(
                "download_url_expires_at must be later than completed_at",
            ));
        }

        self.status = ExportStatus::Completed {
            storage: artifact.storage,
        };
        self.file_name = Some(artifact.file_name);
        self.file_size_bytes = Some(artifact.file_size_bytes);
        self.storage_path = Some(artifact.storage_path);
        self.download_url = Some(artifact.download_url);
        self.download_url_expires_at = Some(artifact.download_url_expires_at);
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Processing -> Failed.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        details: serde_json::Value,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        self.expect_status("failed", matches!(self.status, ExportStatus::Processing))?;
        self.status = ExportStatus::Failed;
        self.error_message = Some(message.into());
        self.error_details = Some(details);
        self.updated_at = now;
        Ok(())
    }

    /// Replace the download link of a completed job.
    pub fn renew_download_url(
        &mut self,
        url: String,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        if !matches!(self.status, ExportStatus::Completed { .. }) {
            return Err(DomainError::invariant(format!(
                "cannot refresh download url of a {} export",
                self.status.name()
            )));
        }
        if expires_at <= now {
            return Err(DomainError::invariant("renewed url must expire in the future"));
        }
        self.download_url = Some(url);
        self.download_url_expires_at = Some(expires_at);
        self.updated_at = now;
        Ok(())
    }

    /// The cached download URL, if it is still valid at `now`.
    pub fn valid_download_url(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.download_url, self.download_url_expires_at) {
            (Some(url), Some(expires_at)) if expires_at > now => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn storage(&self) -> Option<StorageKind> {
        match self.status {
            ExportStatus::Completed { storage } => Some(storage),
            _ => None,
        }
    }

    fn expect_status(&self, target: &str, allowed: bool) -> DomainResult<()> {
        if allowed {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "illegal export transition {} -> {}",
                self.status.name(),
                target
            )))
        }
    }
}

/// `<data_type>-export-<epoch_millis>.<ext>`
pub fn file_name(data_type: DataType, format: ExportFormat, now: DateTime<Utc>) -> String {
    format!(
        "{}-export-{}.{}",
        data_type.as_str(),
        now.timestamp_millis(),
        format.extension()
    )
}

/// Object-storage key for an owner's artifact.
pub fn storage_path(owner: OwnerId, file_name: &str) -> String {
    format!("{owner}/{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn request() -> ExportRequest {
        ExportRequest {
            data_type: DataType::Agents,
            format: ExportFormat::Csv,
            filters: ExportFilters::default(),
        }
    }

    fn artifact(now: DateTime<Utc>) -> CompletedArtifact {
        CompletedArtifact {
            file_name: file_name(DataType::Agents, ExportFormat::Csv, now),
            file_size_bytes: 12,
            storage_path: "owner/agents.csv".to_string(),
            storage: StorageKind::Persistent,
            download_url: "https://example.test/a".to_string(),
            download_url_expires_at: now + Duration::hours(24),
        }
    }

    #[test]
    fn happy_path_sets_download_fields() {
        let mut job = ExportJob::new(OwnerId::new(), request(), t0());
        assert_eq!(job.status, ExportStatus::Pending);

        job.mark_processing(t0()).unwrap();
        let done = t0() + Duration::seconds(2);
        job.mark_completed(artifact(done), done).unwrap();

        assert_eq!(
            job.status,
            ExportStatus::Completed {
                storage: StorageKind::Persistent
            }
        );
        assert_eq!(job.completed_at, Some(done));
        assert_eq!(job.download_url_expires_at, Some(done + Duration::hours(24)));
        assert!(job.download_url.is_some());
    }

    #[test]
    fn transitions_never_move_backward() {
        let mut job = ExportJob::new(OwnerId::new(), request(), t0());
        assert!(job.mark_completed(artifact(t0()), t0()).is_err());
        assert!(job.mark_failed("x", serde_json::Value::Null, t0()).is_err());

        job.mark_processing(t0()).unwrap();
        assert!(job.mark_processing(t0()).is_err());

        job.mark_failed("boom", serde_json::json!({"kind": "test"}), t0())
            .unwrap();
        assert!(job.mark_processing(t0()).is_err());
        assert!(job.mark_completed(artifact(t0()), t0()).is_err());
        assert_eq!(job.status, ExportStatus::Failed);
        assert!(job.download_url.is_none());
    }

    #[test]
    fn completion_requires_future_expiry() {
        let mut job = ExportJob::new(OwnerId::new(), request(), t0());
        job.mark_processing(t0()).unwrap();
        let mut stale = artifact(t0());
        stale.download_url_expires_at = t0();
        assert!(matches!(
            job.mark_completed(stale, t0()),
            Err(DomainError::InvariantViolation(_))
        ));
        assert_eq!(job.status, ExportStatus::Processing);
    }

    #[test]
    fn valid_download_url_respects_expiry() {
        let mut job = ExportJob::new(OwnerId::new(), request(), t0());
        job.mark_processing(t0()).unwrap();
        job.mark_completed(artifact(t0()), t0()).unwrap();

        assert!(job.valid_download_url(t0() + Duration::hours(23)).is_some());
        assert!(job.valid_download_url(t0() + Duration::hours(24)).is_none());
    }

    #[test]
    fn file_name_uses_epoch_millis() {
        let name = file_name(DataType::Sessions, ExportFormat::Json, t0());
        assert_eq!(name, format!("sessions-export-{}.json", t0().timestamp_millis()));
    }

    #[test]
    fn status_serializes_flat_with_storage_tag() {
        let mut job = ExportJob::new(OwnerId::new(), request(), t0());
        job.mark_processing(t0()).unwrap();
        job.mark_completed(artifact(t0()), t0()).unwrap();

        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["storage"], "persistent");

        let back: ExportJob = serde_json::from_value(v).unwrap();
        assert_eq!(back.status, job.status);
    }
}
