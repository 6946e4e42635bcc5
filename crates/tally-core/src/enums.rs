//! Enum types for the tally system.
//!
//! Each enum has:
//! - Custom Serialize (as snake_case string)
//! - Custom Deserialize (known variants + catch-all Custom(String))
//! - `as_str()`, `is_default()`, `is_builtin()`, `Display` impl
//!
//! The catch-all variant exists because rows written by internal paths may
//! carry values outside the public vocabulary (e.g. status-transition
//! events store the raw status string).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

define_enum!(
    /// The kind of AI job being tracked.
    JobType, default = Chat,
    variants: [
        (Chat, "chat"),
        (Vision, "vision"),
        (Capture, "capture"),
        (Automation, "automation"),
        (ImageGeneration, "image_generation"),
    ]
);

define_enum!(
    /// The lifecycle status of a job.
    JobStatus, default = Pending,
    variants: [
        (Pending, "pending"),
        (Running, "running"),
        (Completed, "completed"),
        (Failed, "failed"),
        (Cancelled, "cancelled"),
    ]
);

impl JobStatus {
    /// Returns `true` for terminal states (completed, failed, cancelled).
    ///
    /// Terminal jobs must carry a `completed_at` timestamp.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

define_enum!(
    /// The kind of artifact a job produced.
    ArtifactType, default = File,
    variants: [
        (Screenshot, "screenshot"),
        (File, "file"),
        (Log, "log"),
        (Result, "result"),
        (Preview, "preview"),
    ]
);

define_enum!(
    /// Event types appearing on a job timeline.
    EventType, default = Created,
    variants: [
        (Created, "created"),
        (Started, "started"),
        (Progress, "progress"),
        (Completed, "completed"),
        (Failed, "failed"),
        (Cancelled, "cancelled"),
        (Warning, "warning"),
    ]
);

define_enum!(
    /// Severity level of an event.
    EventLevel, default = Info,
    variants: [
        (Debug, "debug"),
        (Info, "info"),
        (Warn, "warn"),
        (Error, "error"),
    ]
);

/// Sort direction for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    /// SQL keyword for this direction.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sortable job columns. Every variant maps to an indexed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    CompletedAt,
    DurationMs,
    TotalCost,
    Status,
    Type,
}

impl JobSortField {
    /// Column name for this sort field.
    pub fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::CompletedAt => "completed_at",
            Self::DurationMs => "duration_ms",
            Self::TotalCost => "total_cost",
            Self::Status => "status",
            Self::Type => "type",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips() {
        for s in ["pending", "running", "completed", "failed", "cancelled"] {
            let status = JobStatus::from(s);
            assert!(status.is_builtin());
            assert_eq!(status.as_str(), s);
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn unknown_value_becomes_custom() {
        let t = JobType::from("telepathy");
        assert!(!t.is_builtin());
        assert_eq!(t.as_str(), "telepathy");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&EventType::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::Warning);
    }

    #[test]
    fn sort_field_columns() {
        assert_eq!(JobSortField::CreatedAt.column(), "created_at");
        assert_eq!(JobSortField::TotalCost.column(), "total_cost");
        assert_eq!(SortDirection::Desc.as_sql(), "DESC");
    }
}
