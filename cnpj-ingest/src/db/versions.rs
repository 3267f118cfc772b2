//! Release version registry
//!
//! Append-only bookkeeping of release imports in `data_versions`. A release
//! only counts as queryable once its row flips to `completed`; readers that
//! tolerate stale data mid-ingestion consult `current_release`.

use crate::error::{PipelineError, Result};
use crate::models::{DataVersion, IngestionStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

const NOTE_MAX_LEN: usize = 255;

type VersionRow = (
    i32,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<String>,
);

#[derive(Clone)]
pub struct VersionRegistry {
    pool: PgPool,
}

impl VersionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The most recently started registry row, if any.
    pub async fn current_release(&self) -> Result<Option<DataVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(
            r#"
            SELECT id, release, status, started_at, finished_at, note
            FROM data_versions
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::into_version).transpose()
    }

    /// Upsert a release into `running`, resetting any previous outcome.
    pub async fn start_release(&self, release: &str) -> Result<DataVersion> {
        let row: VersionRow = sqlx::query_as(
            r#"
            INSERT INTO data_versions (release, status, started_at, finished_at, note)
            VALUES ($1, 'running', now(), NULL, NULL)
            ON CONFLICT (release) DO UPDATE SET
                status = 'running',
                started_at = now(),
                finished_at = NULL,
                note = NULL
            RETURNING id, release, status, started_at, finished_at, note
            "#,
        )
        .bind(release)
        .fetch_one(&self.pool)
        .await?;
        Self::into_version(row)
    }

    /// Terminal transition to `completed` or `failed`.
    pub async fn finish_release(
        &self,
        release: &str,
        success: bool,
        note: Option<&str>,
    ) -> Result<()> {
        let status = if success {
            IngestionStatus::Completed
        } else {
            IngestionStatus::Failed
        };
        let note = note.map(|n| truncate_note(n));
        sqlx::query(
            r#"
            UPDATE data_versions
            SET status = $2, finished_at = now(), note = $3
            WHERE release = $1
            "#,
        )
        .bind(release)
        .bind(status.as_str())
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn into_version(row: VersionRow) -> Result<DataVersion> {
        let (id, release, status, started_at, finished_at, note) = row;
        let status = IngestionStatus::parse(&status).ok_or_else(|| {
            PipelineError::Internal(format!(
                "corrupt data_versions row for {release}: unknown status {status}"
            ))
        })?;
        Ok(DataVersion {
            id,
            release,
            status,
            started_at,
            finished_at,
            note,
        })
    }
}

// VARCHAR(255) column; error text from a failed run can be arbitrarily long.
fn truncate_note(note: &str) -> String {
    if note.chars().count() <= NOTE_MAX_LEN {
        note.to_string()
    } else {
        note.chars().take(NOTE_MAX_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_notes_pass_through() {
        assert_eq!(truncate_note("disk full"), "disk full");
    }

    #[test]
    fn long_notes_are_truncated_on_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_note(&long);
        assert_eq!(truncated.chars().count(), NOTE_MAX_LEN);
    }
}
