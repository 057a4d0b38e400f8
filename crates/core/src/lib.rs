//! `exportkit-core`: shared building blocks for the export engine.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{ExportId, OwnerId, ScheduleId};
pub use version::ExpectedVersion;
