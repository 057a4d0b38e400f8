//! Export domain module.
//!
//! This crate contains the rules for export jobs and recurring export
//! schedules, implemented purely as deterministic domain logic (no IO, no
//! HTTP, no storage). Time is always passed in explicitly.

pub mod job;
pub mod next_run;
pub mod schedule;
pub mod serialize;

pub use job::{
    CompletedArtifact, DataType, ExportFilters, ExportFormat, ExportJob, ExportRequest,
    ExportStatus, StorageKind, file_name, storage_path,
};
pub use next_run::next_run;
pub use schedule::{
    BackoffType, DeliveryMethod, DeliveryRetryPolicy, ExportSchedule, Frequency, FrequencyConfig,
    NewSchedule, SchedulePatch, WebhookAuth, WebhookConfig,
};
pub use serialize::{Row, SerializeError, render, to_csv, to_json};
