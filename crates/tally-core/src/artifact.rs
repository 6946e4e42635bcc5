//! Artifact metadata -- one row per stored blob reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::ArtifactType;

/// Metadata row for a content-addressed artifact.
///
/// Several rows may share a `hash_sha256`; the physical file is written once
/// and lives at `<base>/<hh>/<hh>/<hash>` relative to the storage root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobArtifact {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub job_id: String,

    #[serde(rename = "type", default)]
    pub artifact_type: ArtifactType,

    #[serde(default)]
    pub name: String,

    /// Path relative to the artifact storage root.
    #[serde(default)]
    pub file_path: String,

    #[serde(default)]
    pub file_size: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Lowercase hex SHA-256 of the content (64 chars).
    #[serde(default)]
    pub hash_sha256: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    #[serde(default)]
    pub is_deleted: bool,

    /// Set when a read detected a hash mismatch. The row stays readable as
    /// metadata; the bytes are untrusted until re-verified.
    #[serde(default)]
    pub suspect: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// One problem found by integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub artifact_id: String,
    pub issue: IntegrityProblem,
}

/// What went wrong for a single artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityProblem {
    MissingFile,
    HashMismatch,
    SizeMismatch,
}

impl IntegrityProblem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingFile => "missing-file",
            Self::HashMismatch => "hash-mismatch",
            Self::SizeMismatch => "size-mismatch",
        }
    }
}
