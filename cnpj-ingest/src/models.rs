//! Shared domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one release import in the `data_versions` registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Pending => "pending",
            IngestionStatus::Running => "running",
            IngestionStatus::Completed => "completed",
            IngestionStatus::Failed => "failed",
        }
    }

    /// Parse the database representation. Unknown values surface as `None`
    /// rather than panicking; the registry treats them as corrupt rows.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(IngestionStatus::Pending),
            "running" => Some(IngestionStatus::Running),
            "completed" => Some(IngestionStatus::Completed),
            "failed" => Some(IngestionStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the `data_versions` registry.
#[derive(Debug, Clone, Serialize)]
pub struct DataVersion {
    pub id: i32,
    pub release: String,
    pub status: IngestionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// A remote archive advertised by the release directory index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub url: String,
    /// Raw size column text, when the index exposes one.
    pub size: Option<String>,
    /// Raw last-modified column text, when the index exposes one.
    pub last_modified: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            IngestionStatus::Pending,
            IngestionStatus::Running,
            IngestionStatus::Completed,
            IngestionStatus::Failed,
        ] {
            assert_eq!(IngestionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(IngestionStatus::parse("exploded"), None);
    }
}
