use serde::Deserialize;
use serde_json::{Value, json};

use exportkit_exports::{ExportJob, ExportSchedule, WebhookAuth};
use exportkit_infra::exports::{PageRequest, UrlSignature};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ListExportsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

impl ListExportsQuery {
    pub fn page_request(&self) -> PageRequest {
        let defaults = PageRequest::default();
        PageRequest::new(
            self.page.unwrap_or(defaults.page),
            self.page_size.unwrap_or(defaults.page_size),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleScheduleRequest {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct SignedUrlQuery {
    pub expires: i64,
    pub nonce: String,
    pub signature: String,
}

impl From<SignedUrlQuery> for UrlSignature {
    fn from(q: SignedUrlQuery) -> Self {
        UrlSignature {
            expires: q.expires,
            nonce: q.nonce,
            signature: q.signature,
        }
    }
}

// -------------------------
// Response mapping
// -------------------------

/// Export as seen by its owner. Internal storage keys stay server-side.
pub fn export_to_json(job: &ExportJob) -> Value {
    json!({
        "id": job.id.to_string(),
        "data_type": job.data_type,
        "format": job.format,
        "status": job.status.name(),
        "storage": job.storage(),
        "filters": job.filters,
        "file_name": job.file_name,
        "file_size_bytes": job.file_size_bytes,
        "download_url": job.download_url,
        "download_url_expires_at": job.download_url_expires_at,
        "error_message": job.error_message,
        "error_details": job.error_details,
        "created_at": job.created_at,
        "completed_at": job.completed_at,
    })
}

const REDACTED: &str = "[redacted]";

/// Schedule with webhook credentials redacted. Header names are kept, their
/// values are not.
pub fn schedule_to_json(schedule: &ExportSchedule) -> Value {
    let webhook = schedule.webhook.as_ref().map(|w| {
        let auth_type = match &w.auth {
            WebhookAuth::None => "none",
            WebhookAuth::Bearer { .. } => "bearer",
            WebhookAuth::Basic { .. } => "basic",
            WebhookAuth::ApiKey { .. } => "api_key",
        };
        let headers: serde_json::Map<String, Value> = w
            .headers
            .keys()
            .map(|name| (name.clone(), Value::from(REDACTED)))
            .collect();
        json!({
            "url": w.url,
            "headers": headers,
            "auth": { "type": auth_type },
        })
    });

    json!({
        "id": schedule.id.to_string(),
        "name": schedule.name,
        "enabled": schedule.enabled,
        "data_type": schedule.data_type,
        "format": schedule.format,
        "filters": schedule.filters,
        "frequency": schedule.frequency,
        "frequency_config": schedule.frequency_config,
        "delivery_method": schedule.delivery_method,
        "webhook": webhook,
        "retry_policy": schedule.retry_policy,
        "next_run_at": schedule.next_run_at,
        "last_run_at": schedule.last_run_at,
        "version": schedule.version,
        "created_at": schedule.created_at,
        "updated_at": schedule.updated_at,
    })
}
