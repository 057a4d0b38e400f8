use thiserror::Error;

use exportkit_core::{DomainError, ExportId};

use super::artifacts::ArtifactError;
use super::generator::GenerationError;
use super::storage::StorageError;
use super::store::StoreError;

/// Errors surfaced by the export and schedule services.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("authentication required")]
    AuthenticationRequired,

    /// Absent, or owned by someone else.
    #[error("not found")]
    NotFound,

    #[error("export {export_id} matched no sessions")]
    EmptyResultSet { export_id: ExportId },

    #[error("export {export_id} failed: {message}")]
    Generation { export_id: ExportId, message: String },

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Store(StoreError),
}

impl ExportError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::AuthenticationRequired => "authentication_required",
            ExportError::NotFound => "not_found",
            ExportError::EmptyResultSet { .. } => "empty_result_set",
            ExportError::Generation { .. } => "generation_failure",
            ExportError::Storage(_) => "storage_failure",
            ExportError::Validation(_) => "validation_error",
            ExportError::Conflict(_) => "conflict",
            ExportError::Store(_) => "store_error",
        }
    }

    pub(crate) fn from_generation(export_id: ExportId, err: &GenerationError) -> Self {
        match err {
            GenerationError::EmptyResultSet => ExportError::EmptyResultSet { export_id },
            other => ExportError::Generation {
                export_id,
                message: other.to_string(),
            },
        }
    }
}

impl From<DomainError> for ExportError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => ExportError::Validation(msg),
            DomainError::InvariantViolation(msg) | DomainError::Conflict(msg) => {
                ExportError::Conflict(msg)
            }
        }
    }
}

impl From<StoreError> for ExportError {
    fn from(err: StoreError) -> Self {
        if matches!(err, StoreError::VersionConflict { .. }) {
            return ExportError::Conflict(err.to_string());
        }
        ExportError::Store(err)
    }
}

impl From<StorageError> for ExportError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => ExportError::NotFound,
            other => ExportError::Storage(other.to_string()),
        }
    }
}

impl From<ArtifactError> for ExportError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::Gone | ArtifactError::Expired => ExportError::NotFound,
            ArtifactError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_service_codes() {
        assert_eq!(ExportError::from(DomainError::validation("blank")).code(), "validation_error");
        assert_eq!(ExportError::from(DomainError::conflict("v")).code(), "conflict");
        assert_eq!(ExportError::from(DomainError::invariant("t")).code(), "conflict");
        assert_eq!(ExportError::from(DomainError::invalid_id("x")).code(), "validation_error");
    }

    #[test]
    fn lost_version_race_is_a_conflict() {
        let err = ExportError::from(StoreError::VersionConflict {
            expected: 1,
            actual: 2,
        });
        assert_eq!(err.code(), "conflict");
        assert_eq!(ExportError::from(StoreError::Storage("x".into())).code(), "store_error");
    }

    #[test]
    fn gone_ephemeral_artifact_is_not_found() {
        assert!(matches!(ExportError::from(ArtifactError::Gone), ExportError::NotFound));
    }

    #[test]
    fn empty_generation_keeps_export_id() {
        let id = ExportId::new();
        let err = ExportError::from_generation(id, &GenerationError::EmptyResultSet);
        assert!(matches!(err, ExportError::EmptyResultSet { export_id } if export_id == id));
    }
}
