//! Export services and the collaborators they drive.

pub mod artifacts;
pub mod audit;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod schedules;
pub mod sources;
pub mod storage;
pub mod store;

pub use artifacts::{ArtifactError, ArtifactStore, EphemeralArtifacts, StoredArtifact};
pub use audit::{AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use coordinator::{CreatedExport, ExportRequestCoordinator};
pub use error::ExportError;
pub use generator::{ExportGenerator, GeneratedExport, GenerationError};
pub use schedules::ScheduleManager;
pub use sources::{
    AgentQuery, AgentSource, InMemoryAgentSource, InMemorySessionSource, SessionQuery,
    SessionSource, SourceError, SourcePage,
};
pub use storage::{LocalObjectStorage, ObjectStorage, StorageError, StoredObject, UrlSignature};
pub use store::{
    ExportJobStore, InMemoryExportJobStore, InMemoryScheduleStore, Page, PageRequest,
    ScheduleStore, StoreError,
};
