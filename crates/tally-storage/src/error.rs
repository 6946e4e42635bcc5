//! Storage error types.
//!
//! Every failure crossing the crate boundary is one of three kinds, each
//! carrying a stable machine-readable code alongside a human detail string.

use tally_core::cursor::InvalidCursor;
use tally_core::validation::{ValidationCode, ValidationError};

/// Codes for failures originating in the storage substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseCode {
    NotInitialized,
    InitializationFailed,
    CloseFailed,
    BackupFailed,
    RestoreFailed,
    VacuumFailed,
    AnalyzeFailed,
    IntegrityCheckFailed,
    StatsFailed,
    CreateJobFailed,
    CreateArtifactFailed,
    CreateEventFailed,
    ArtifactStorageFailed,
    ArtifactMissing,
    ArtifactCorrupt,
    StorageNotAvailable,
    UsageCaptureFailed,
    MigrationFailed,
    TransactionFailed,
    QueryFailed,
}

impl DatabaseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::InitializationFailed => "INITIALIZATION_FAILED",
            Self::CloseFailed => "CLOSE_FAILED",
            Self::BackupFailed => "BACKUP_FAILED",
            Self::RestoreFailed => "RESTORE_FAILED",
            Self::VacuumFailed => "VACUUM_FAILED",
            Self::AnalyzeFailed => "ANALYZE_FAILED",
            Self::IntegrityCheckFailed => "INTEGRITY_CHECK_FAILED",
            Self::StatsFailed => "STATS_FAILED",
            Self::CreateJobFailed => "CREATE_JOB_FAILED",
            Self::CreateArtifactFailed => "CREATE_ARTIFACT_FAILED",
            Self::CreateEventFailed => "CREATE_EVENT_FAILED",
            Self::ArtifactStorageFailed => "ARTIFACT_STORAGE_FAILED",
            Self::ArtifactMissing => "ARTIFACT_MISSING",
            Self::ArtifactCorrupt => "ARTIFACT_CORRUPT",
            Self::StorageNotAvailable => "STORAGE_NOT_AVAILABLE",
            Self::UsageCaptureFailed => "USAGE_CAPTURE_FAILED",
            Self::MigrationFailed => "MIGRATION_FAILED",
            Self::TransactionFailed => "TRANSACTION_FAILED",
            Self::QueryFailed => "QUERY_FAILED",
        }
    }
}

impl std::fmt::Display for DatabaseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codes for lookups of entities that do not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundCode {
    JobNotFound,
    ArtifactNotFound,
    EventNotFound,
}

impl NotFoundCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobNotFound => "JOB_NOT_FOUND",
            Self::ArtifactNotFound => "ARTIFACT_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
        }
    }
}

impl std::fmt::Display for NotFoundCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced at the store boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Anything originating from the storage substrate.
    #[error("{code}: {detail}")]
    Database {
        /// Stable error code.
        code: DatabaseCode,
        /// Human-readable detail.
        detail: String,
    },

    /// A referenced entity does not exist.
    #[error("{code}: {detail}")]
    NotFound {
        code: NotFoundCode,
        detail: String,
    },

    /// Caller-supplied input violates a contract.
    #[error("{code}: {detail}")]
    Validation {
        code: ValidationCode,
        detail: String,
    },
}

/// Convenience alias used throughout the storage crate.
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    // -- Constructors --------------------------------------------------------

    /// Creates a [`StoreError::Database`] with the given code.
    pub fn db(code: DatabaseCode, detail: impl std::fmt::Display) -> Self {
        Self::Database {
            code,
            detail: detail.to_string(),
        }
    }

    /// Creates a [`StoreError::NotFound`] for a job id.
    pub fn job_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            code: NotFoundCode::JobNotFound,
            detail: format!("job {id}"),
        }
    }

    /// Creates a [`StoreError::NotFound`] for an artifact id.
    pub fn artifact_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            code: NotFoundCode::ArtifactNotFound,
            detail: format!("artifact {id}"),
        }
    }

    /// Creates a [`StoreError::NotFound`] for an event id.
    pub fn event_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            code: NotFoundCode::EventNotFound,
            detail: format!("event {id}"),
        }
    }

    // -- Predicates ----------------------------------------------------------

    /// Returns `true` if this is a [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if this is a validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// The stable code string, whichever kind this is.
    pub fn code_str(&self) -> &'static str {
        match self {
            Self::Database { code, .. } => code.as_str(),
            Self::NotFound { code, .. } => code.as_str(),
            Self::Validation { code, .. } => code.as_str(),
        }
    }
}

impl From<ValidationError> for StoreError {
    fn from(e: ValidationError) -> Self {
        Self::Validation {
            code: e.code,
            detail: e.detail,
        }
    }
}

impl From<InvalidCursor> for StoreError {
    fn from(e: InvalidCursor) -> Self {
        Self::Validation {
            code: ValidationCode::InvalidCursor,
            detail: e.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_render_screaming_snake() {
        assert_eq!(DatabaseCode::NotInitialized.as_str(), "NOT_INITIALIZED");
        assert_eq!(DatabaseCode::ArtifactCorrupt.as_str(), "ARTIFACT_CORRUPT");
        assert_eq!(NotFoundCode::JobNotFound.as_str(), "JOB_NOT_FOUND");
    }

    #[test]
    fn error_display_includes_code() {
        let err = StoreError::job_not_found("j-1");
        assert_eq!(err.to_string(), "JOB_NOT_FOUND: job j-1");
        assert!(err.is_not_found());
    }

    #[test]
    fn invalid_cursor_maps_to_validation() {
        let err: StoreError = InvalidCursor("garbage".into()).into();
        assert!(err.is_validation());
        assert_eq!(err.code_str(), "INVALID_CURSOR");
    }
}
