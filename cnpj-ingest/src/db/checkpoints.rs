//! Durable import checkpoints
//!
//! Two tables outlive any single run: `import_checkpoints` holds one
//! per-release row of phase booleans, `import_files_processed` records every
//! durably committed unit of work (input file, consolidation chunk or
//! synthetic marker). Every write here is its own committed statement; the
//! unique index on `(release, fase, filename)` makes the upserts idempotent
//! under repetition and safe against concurrent readers.

use crate::db::tables;
use crate::error::{PipelineError, Result};
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Phase tags as stored in `import_files_processed.fase` and as columns of
/// `import_checkpoints`.
pub mod phase {
    pub const FASE1_EMPRESAS: &str = "fase1_empresas";
    pub const FASE2_SIMPLES: &str = "fase2_simples";
    pub const FASE3_ESTABELECIMENTOS: &str = "fase3_estabelecimentos";
    pub const FASE3_PARTE1_STAGING: &str = "fase3_parte1_staging";
    pub const FASE3_PARTE2_CHUNKS: &str = "fase3_parte2_chunks";
    pub const FASE3_PARTE2_CREATE_TABLE: &str = "fase3_parte2_create_table";
    pub const FASE3_PARTE3_INDEXES: &str = "fase3_parte3_indexes";
    pub const FASE3_PARTE4_CLEANUP: &str = "fase3_parte4_cleanup";
    pub const FASE4_SOCIOS: &str = "fase4_socios";
}

/// Synthetic filenames recorded for non-file units of work.
pub mod marker {
    pub const CONSOLIDATED: &str = "CONSOLIDATED";
    pub const INDEXES_CREATED: &str = "INDEXES_CREATED";
    pub const STAGING_DROPPED: &str = "STAGING_DROPPED";
}

/// Per-release phase completion flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseStatus {
    pub fase1_empresas: bool,
    pub fase2_simples: bool,
    pub fase3_estabelecimentos: bool,
    pub fase4_socios: bool,
}

/// Repository over the two checkpoint tables.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: PgPool,
}

impl CheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the checkpoint tables if absent.
    pub async fn ensure_tables(&self) -> Result<()> {
        sqlx::query(tables::CREATE_IMPORT_CHECKPOINTS)
            .execute(&self.pool)
            .await?;
        sqlx::query(tables::CREATE_IMPORT_FILES_PROCESSED)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Phase flags for a release, creating an all-false row on first call.
    pub async fn get(&self, release: &str) -> Result<PhaseStatus> {
        let row: Option<(bool, bool, bool, bool)> = sqlx::query_as(
            r#"
            SELECT fase1_empresas, fase2_simples, fase3_estabelecimentos, fase4_socios
            FROM import_checkpoints
            WHERE release = $1
            "#,
        )
        .bind(release)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((fase1, fase2, fase3, fase4)) => Ok(PhaseStatus {
                fase1_empresas: fase1,
                fase2_simples: fase2,
                fase3_estabelecimentos: fase3,
                fase4_socios: fase4,
            }),
            None => {
                sqlx::query(
                    "INSERT INTO import_checkpoints (release) VALUES ($1) ON CONFLICT (release) DO NOTHING",
                )
                .bind(release)
                .execute(&self.pool)
                .await?;
                Ok(PhaseStatus::default())
            }
        }
    }

    /// Idempotent set-to-true of one phase flag.
    pub async fn mark_phase(&self, release: &str, phase: &str) -> Result<()> {
        // Column name cannot be bound; restrict to the known flag columns.
        let sql = match phase {
            phase::FASE1_EMPRESAS => {
                "UPDATE import_checkpoints SET fase1_empresas = TRUE, updated_at = now() WHERE release = $1"
            }
            phase::FASE2_SIMPLES => {
                "UPDATE import_checkpoints SET fase2_simples = TRUE, updated_at = now() WHERE release = $1"
            }
            phase::FASE3_ESTABELECIMENTOS => {
                "UPDATE import_checkpoints SET fase3_estabelecimentos = TRUE, updated_at = now() WHERE release = $1"
            }
            phase::FASE4_SOCIOS => {
                "UPDATE import_checkpoints SET fase4_socios = TRUE, updated_at = now() WHERE release = $1"
            }
            other => {
                return Err(PipelineError::Internal(format!(
                    "unknown checkpoint phase column: {other}"
                )));
            }
        };
        sqlx::query(sql).bind(release).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn is_file_processed(&self, release: &str, fase: &str, filename: &str) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM import_files_processed
            WHERE release = $1 AND fase = $2 AND filename = $3
            "#,
        )
        .bind(release)
        .bind(fase)
        .bind(filename)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Idempotent upsert of a processed unit and its imported row count.
    pub async fn mark_file(
        &self,
        release: &str,
        fase: &str,
        filename: &str,
        rows_imported: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_files_processed (release, fase, filename, rows_imported)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (release, fase, filename) DO UPDATE SET
                rows_imported = EXCLUDED.rows_imported,
                processed_at = now()
            "#,
        )
        .bind(release)
        .bind(fase)
        .bind(filename)
        .bind(rows_imported)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of units already recorded for a (release, phase) pair.
    pub async fn count_files(&self, release: &str, fase: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM import_files_processed WHERE release = $1 AND fase = $2",
        )
        .bind(release)
        .bind(fase)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// All processed units of one phase, keyed by filename/label, in label
    /// order (chunk labels sort correctly because they are zero-padded).
    pub async fn list_processed_chunks(
        &self,
        release: &str,
        fase: &str,
    ) -> Result<BTreeMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT filename, rows_imported
            FROM import_files_processed
            WHERE release = $1 AND fase = $2
            ORDER BY filename
            "#,
        )
        .bind(release)
        .bind(fase)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }

    /// Forget per-file records for the given phases (used by the Phase 3
    /// guard when staging tables vanished under completed checkpoints).
    pub async fn invalidate_files(&self, release: &str, fases: &[&str]) -> Result<()> {
        for fase in fases {
            sqlx::query("DELETE FROM import_files_processed WHERE release = $1 AND fase = $2")
                .bind(release)
                .bind(fase)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Reset phase flags for the given phases alongside `invalidate_files`.
    pub async fn reset_phases(&self, release: &str, fases: &[&str]) -> Result<()> {
        for fase in fases {
            let sql = match *fase {
                phase::FASE1_EMPRESAS => {
                    "UPDATE import_checkpoints SET fase1_empresas = FALSE, updated_at = now() WHERE release = $1"
                }
                phase::FASE2_SIMPLES => {
                    "UPDATE import_checkpoints SET fase2_simples = FALSE, updated_at = now() WHERE release = $1"
                }
                phase::FASE3_ESTABELECIMENTOS => {
                    "UPDATE import_checkpoints SET fase3_estabelecimentos = FALSE, updated_at = now() WHERE release = $1"
                }
                phase::FASE4_SOCIOS => {
                    "UPDATE import_checkpoints SET fase4_socios = FALSE, updated_at = now() WHERE release = $1"
                }
                other => {
                    return Err(PipelineError::Internal(format!(
                        "unknown checkpoint phase column: {other}"
                    )));
                }
            };
            sqlx::query(sql).bind(release).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Drop both checkpoint tables - the clean slate after a fully completed
    /// release import.
    pub async fn drop_tables(&self) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS import_checkpoints CASCADE")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS import_files_processed CASCADE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_tags_match_wire_constants() {
        assert_eq!(phase::FASE1_EMPRESAS, "fase1_empresas");
        assert_eq!(phase::FASE3_PARTE2_CHUNKS, "fase3_parte2_chunks");
        assert_eq!(phase::FASE3_PARTE4_CLEANUP, "fase3_parte4_cleanup");
        assert_eq!(marker::STAGING_DROPPED, "STAGING_DROPPED");
    }
}
