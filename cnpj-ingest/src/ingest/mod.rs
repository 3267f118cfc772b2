//! Streaming ingestor
//!
//! Drives the four checkpointed import phases over an extracted release:
//!
//! 1. empresas into `staging_empresas`
//! 2. simples into `staging_simples`
//! 3. estabelecimentos into staging, then the chunked join into the
//!    denormalised super-table, its indexes and the staging cleanup
//! 4. socios straight into the final partner table
//!
//! Phases run strictly in order on a single logical writer. Each completed
//! phase flips its flag in `import_checkpoints`; each committed file or
//! chunk is recorded in `import_files_processed`, so an interrupted run
//! resumes at the first incomplete unit without redoing finished work.

pub mod consolidate;
pub mod copy;
pub mod phases;
pub mod rows;

pub use consolidate::ChunkRange;
pub use phases::{FileStats, RowOutcome};

use crate::db::checkpoints::phase;
use crate::db::CheckpointStore;
use crate::error::Result;
use consolidate::table_exists;
use phases::{create_socios_indexes, run_streaming_phase, FASE1, FASE2, FASE3_PARTE1, FASE4};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which dataset an input file belongs to, by name signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    Empresas,
    Simples,
    Estabelecimentos,
    Socios,
}

impl Dataset {
    /// Case-insensitive substring match on the upstream naming convention.
    pub fn classify(file_name: &str) -> Option<Dataset> {
        let upper = file_name.to_ascii_uppercase();
        if upper.contains("EMPRECSV") {
            Some(Dataset::Empresas)
        } else if upper.contains("SIMECSV") || upper.contains("SIMPLES") {
            Some(Dataset::Simples)
        } else if upper.contains("ESTABELE") {
            Some(Dataset::Estabelecimentos)
        } else if upper.contains("SOCIO") {
            Some(Dataset::Socios)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct DatasetFiles {
    empresas: Vec<PathBuf>,
    simples: Vec<PathBuf>,
    estabelecimentos: Vec<PathBuf>,
    socios: Vec<PathBuf>,
}

impl DatasetFiles {
    fn partition(files: &[PathBuf]) -> Self {
        let mut sets = DatasetFiles::default();
        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            match Dataset::classify(name) {
                Some(Dataset::Empresas) => sets.empresas.push(file.clone()),
                Some(Dataset::Simples) => sets.simples.push(file.clone()),
                Some(Dataset::Estabelecimentos) => sets.estabelecimentos.push(file.clone()),
                Some(Dataset::Socios) => sets.socios.push(file.clone()),
                None => debug!(file = %file.display(), "Ignoring file without dataset signature"),
            }
        }
        sets.empresas.sort();
        sets.simples.sort();
        sets.estabelecimentos.sort();
        sets.socios.sort();
        sets
    }
}

pub struct Ingestor {
    pool: PgPool,
    checkpoints: CheckpointStore,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        let checkpoints = CheckpointStore::new(pool.clone());
        Self {
            pool,
            checkpoints,
            batch_size,
        }
    }

    /// Import one extracted release end to end.
    pub async fn load_files(&self, release: &str, files: &[PathBuf]) -> Result<()> {
        if files.is_empty() {
            warn!(release, "No files to load");
            return Ok(());
        }

        self.checkpoints.ensure_tables().await?;
        let status = self.checkpoints.get(release).await?;
        info!(
            release,
            fase1_empresas = status.fase1_empresas,
            fase2_simples = status.fase2_simples,
            fase3_estabelecimentos = status.fase3_estabelecimentos,
            fase4_socios = status.fase4_socios,
            "Checkpoint status"
        );

        let sets = DatasetFiles::partition(files);
        info!(
            empresas = sets.empresas.len(),
            simples = sets.simples.len(),
            estabelecimentos = sets.estabelecimentos.len(),
            socios = sets.socios.len(),
            "Input files by dataset"
        );

        if !status.fase1_empresas {
            run_streaming_phase(
                &self.pool,
                &self.checkpoints,
                release,
                &FASE1,
                &sets.empresas,
                self.batch_size,
            )
            .await?;
            self.checkpoints
                .mark_phase(release, phase::FASE1_EMPRESAS)
                .await?;
        } else {
            info!("Phase 1 (empresas) already complete, skipping");
        }

        if !status.fase2_simples {
            run_streaming_phase(
                &self.pool,
                &self.checkpoints,
                release,
                &FASE2,
                &sets.simples,
                self.batch_size,
            )
            .await?;
            self.checkpoints
                .mark_phase(release, phase::FASE2_SIMPLES)
                .await?;
        } else {
            info!("Phase 2 (simples) already complete, skipping");
        }

        if !status.fase3_estabelecimentos {
            self.repair_missing_staging(release, &sets).await?;

            run_streaming_phase(
                &self.pool,
                &self.checkpoints,
                release,
                &FASE3_PARTE1,
                &sets.estabelecimentos,
                self.batch_size,
            )
            .await?;
            consolidate::run_parte2_consolidation(&self.pool, &self.checkpoints, release).await?;
            consolidate::run_parte3_indexes(&self.pool, &self.checkpoints, release).await?;
            consolidate::run_parte4_cleanup(&self.pool, &self.checkpoints, release).await?;
            self.checkpoints
                .mark_phase(release, phase::FASE3_ESTABELECIMENTOS)
                .await?;
        } else {
            info!("Phase 3 (estabelecimentos) already complete, skipping");
        }

        if !status.fase4_socios {
            run_streaming_phase(
                &self.pool,
                &self.checkpoints,
                release,
                &FASE4,
                &sets.socios,
                self.batch_size,
            )
            .await?;
            create_socios_indexes(&self.pool).await?;
            self.checkpoints
                .mark_phase(release, phase::FASE4_SOCIOS)
                .await?;
        } else {
            info!("Phase 4 (socios) already complete, skipping");
        }

        // Clean slate for the next release: checkpoint state is only
        // meaningful while this import is in flight.
        info!("Dropping checkpoint tables");
        self.checkpoints.drop_tables().await?;

        info!(release, "Import complete");
        Ok(())
    }

    /// Phase 3 guard: phases 1/2 may be marked complete while their staging
    /// tables no longer exist (database reset between runs). Invalidate the
    /// stale checkpoints and re-run both phases inline so consolidation
    /// always sees its join inputs.
    async fn repair_missing_staging(&self, release: &str, sets: &DatasetFiles) -> Result<()> {
        let status = self.checkpoints.get(release).await?;
        if !(status.fase1_empresas || status.fase2_simples) {
            return Ok(());
        }

        let empresas_ok = table_exists(&self.pool, "public.staging_empresas").await?;
        let simples_ok = table_exists(&self.pool, "public.staging_simples").await?;
        if empresas_ok && simples_ok {
            return Ok(());
        }

        warn!(
            staging_empresas = empresas_ok,
            staging_simples = simples_ok,
            "Staging tables missing under completed checkpoints, re-running phases 1 and 2"
        );
        let stale = [phase::FASE1_EMPRESAS, phase::FASE2_SIMPLES];
        self.checkpoints.invalidate_files(release, &stale).await?;
        self.checkpoints.reset_phases(release, &stale).await?;

        run_streaming_phase(
            &self.pool,
            &self.checkpoints,
            release,
            &FASE1,
            &sets.empresas,
            self.batch_size,
        )
        .await?;
        self.checkpoints
            .mark_phase(release, phase::FASE1_EMPRESAS)
            .await?;

        run_streaming_phase(
            &self.pool,
            &self.checkpoints,
            release,
            &FASE2,
            &sets.simples,
            self.batch_size,
        )
        .await?;
        self.checkpoints
            .mark_phase(release, phase::FASE2_SIMPLES)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_name_signatures_case_insensitively() {
        assert_eq!(
            Dataset::classify("K3241.K03200Y0.D40511.EMPRECSV"),
            Some(Dataset::Empresas)
        );
        assert_eq!(
            Dataset::classify("f.k03200$w.simples.csv.d40511"),
            Some(Dataset::Simples)
        );
        assert_eq!(Dataset::classify("D40511.SIMECSV"), Some(Dataset::Simples));
        assert_eq!(
            Dataset::classify("K3241.K03200Y1.D40511.ESTABELE"),
            Some(Dataset::Estabelecimentos)
        );
        assert_eq!(
            Dataset::classify("K3241.K03200Y2.D40511.SOCIOCSV"),
            Some(Dataset::Socios)
        );
        assert_eq!(Dataset::classify("LEIAME.pdf"), None);
    }

    #[test]
    fn partition_sorts_within_each_dataset() {
        let files = vec![
            PathBuf::from("/s/2024-05/B.EMPRECSV"),
            PathBuf::from("/s/2024-05/A.EMPRECSV"),
            PathBuf::from("/s/2024-05/X.SOCIOCSV"),
        ];
        let sets = DatasetFiles::partition(&files);
        assert_eq!(sets.empresas.len(), 2);
        assert!(sets.empresas[0].ends_with("A.EMPRECSV"));
        assert_eq!(sets.socios.len(), 1);
        assert!(sets.estabelecimentos.is_empty());
    }
}
