//! Recurring export schedules and webhook delivery configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use exportkit_core::{DomainError, DomainResult, ExpectedVersion, OwnerId, ScheduleId};

use crate::job::{DataType, ExportFilters, ExportFormat, ExportRequest};

/// How often a schedule fires.
///
/// Unknown values are kept verbatim and scheduled with the daily rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Custom,
    Unrecognized(String),
}

impl Frequency {
    pub fn as_str(&self) -> &str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Custom => "custom",
            Frequency::Unrecognized(other) => other,
        }
    }
}

impl From<String> for Frequency {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "custom" => Frequency::Custom,
            _ => Frequency::Unrecognized(value),
        }
    }
}

impl From<Frequency> for String {
    fn from(value: Frequency) -> Self {
        value.as_str().to_string()
    }
}

/// Time-of-firing parameters. Ranges are not validated here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minute: Option<u32>,
    /// 0 = Sunday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    /// User-defined recurrence for `custom` schedules (stored, not yet interpreted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Download,
    Webhook,
    Both,
}

impl Default for DeliveryMethod {
    fn default() -> Self {
        Self::Download
    }
}

/// Authentication attached to webhook deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookAuth {
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

impl Default for WebhookAuth {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auth: WebhookAuth,
}

/// Backoff strategy for webhook redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// initial * 2^(attempt - 1)
    Exponential,
    /// initial * attempt
    Linear,
}

impl Default for BackoffType {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy handed to the external delivery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRetryPolicy {
    pub max_retries: u32,
    pub backoff_type: BackoffType,
    pub initial_delay_ms: u64,
    pub rate_limit_per_minute: u32,
}

impl Default for DeliveryRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_type: BackoffType::Exponential,
            initial_delay_ms: 1_000,
            rate_limit_per_minute: 60,
        }
    }
}

impl DeliveryRetryPolicy {
    /// Delay before retry `attempt` (1-indexed). Attempt 0 is the first delivery.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = match self.backoff_type {
            BackoffType::Exponential => {
                let exp = (attempt - 1).min(32);
                self.initial_delay_ms.saturating_mul(1u64 << exp)
            }
            BackoffType::Linear => self.initial_delay_ms.saturating_mul(u64::from(attempt)),
        };

        Duration::from_millis(delay_ms)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Minimum spacing between deliveries implied by the rate limit.
    pub fn min_interval(&self) -> Duration {
        if self.rate_limit_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(60_000 / u64::from(self.rate_limit_per_minute))
    }
}

fn default_enabled() -> bool {
    true
}

/// Schedule creation payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchedule {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub data_type: DataType,
    pub format: ExportFormat,
    #[serde(default)]
    pub filters: ExportFilters,
    pub frequency: Frequency,
    #[serde(default)]
    pub frequency_config: FrequencyConfig,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
    #[serde(default)]
    pub retry_policy: DeliveryRetryPolicy,
}

impl NewSchedule {
    pub fn validate(&self) -> DomainResult<()> {
        validate_definition(&self.name, self.delivery_method, self.webhook.as_ref())
    }
}

fn validate_definition(
    name: &str,
    delivery_method: DeliveryMethod,
    webhook: Option<&WebhookConfig>,
) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation("schedule name must not be empty"));
    }
    match (delivery_method, webhook) {
        (DeliveryMethod::Webhook | DeliveryMethod::Both, None) => Err(DomainError::validation(
            "webhook delivery requires a webhook configuration",
        )),
        _ => Ok(()),
    }
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial schedule update. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub format: Option<ExportFormat>,
    #[serde(default)]
    pub filters: Option<ExportFilters>,
    #[serde(default)]
    pub frequency: Option<Frequency>,
    #[serde(default)]
    pub frequency_config: Option<FrequencyConfig>,
    #[serde(default)]
    pub delivery_method: Option<DeliveryMethod>,
    /// `null` removes the webhook; absent leaves it alone.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub webhook: Option<Option<WebhookConfig>>,
    #[serde(default)]
    pub retry_policy: Option<DeliveryRetryPolicy>,
    /// When present, the write only succeeds against this exact version.
    #[serde(default)]
    pub expected_version: Option<u64>,
}

impl SchedulePatch {
    pub fn enabled_only(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    /// Whether the patch changes when the schedule fires.
    pub fn touches_recurrence(&self) -> bool {
        self.frequency.is_some() || self.frequency_config.is_some()
    }
}

/// Persisted recurring export definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSchedule {
    pub id: ScheduleId,
    pub owner: OwnerId,
    pub name: String,
    pub enabled: bool,
    pub data_type: DataType,
    pub format: ExportFormat,
    pub filters: ExportFilters,
    pub frequency: Frequency,
    pub frequency_config: FrequencyConfig,
    pub delivery_method: DeliveryMethod,
    pub webhook: Option<WebhookConfig>,
    pub retry_policy: DeliveryRetryPolicy,
    pub next_run_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExportSchedule {
    /// Build a schedule record; `next_run_at` is supplied by the caller.
    pub fn new(
        owner: OwnerId,
        new: NewSchedule,
        next_run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ScheduleId::new(),
            owner,
            name: new.name,
            enabled: new.enabled,
            data_type: new.data_type,
            format: new.format,
            filters: new.filters,
            frequency: new.frequency,
            frequency_config: new.frequency_config,
            delivery_method: new.delivery_method,
            webhook: new.webhook,
            retry_policy: new.retry_policy,
            next_run_at,
            last_run_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` onto this record and bump the version.
    ///
    /// The record is left unchanged when the version check or validation of
    /// the merged definition fails. `next_run_at` is not touched;
    /// recomputing it is the caller's job.
    pub fn apply_patch(&mut self, patch: SchedulePatch, now: DateTime<Utc>) -> DomainResult<()> {
        ExpectedVersion::from(patch.expected_version).check(self.version)?;

        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(data_type) = patch.data_type {
            next.data_type = data_type;
        }
        if let Some(format) = patch.format {
            next.format = format;
        }
        if let Some(filters) = patch.filters {
            next.filters = filters;
        }
        if let Some(frequency) = patch.frequency {
            next.frequency = frequency;
        }
        if let Some(config) = patch.frequency_config {
            next.frequency_config = config;
        }
        if let Some(method) = patch.delivery_method {
            next.delivery_method = method;
        }
        if let Some(webhook) = patch.webhook {
            next.webhook = webhook;
        }
        if let Some(policy) = patch.retry_policy {
            next.retry_policy = policy;
        }
        validate_definition(&next.name, next.delivery_method, next.webhook.as_ref())?;

        next.version += 1;
        next.updated_at = now;
        *self = next;
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run_at <= now
    }

    /// The export request this schedule produces when it fires.
    pub fn export_request(&self) -> ExportRequest {
        ExportRequest {
            data_type: self.data_type,
            format: self.format,
            filters: self.filters.clone(),
        }
    }
}
