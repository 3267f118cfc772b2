//! Phase 3 consolidation
//!
//! Joins `staging_estabelecimentos` with `staging_empresas` and
//! `staging_simples` into the final super-table. Running the LEFT JOIN as a
//! single INSERT would exhaust temp space on a ~60M-row join, so the
//! keyspace is partitioned into 100 fixed `cnpj_basico` ranges of one
//! million roots each. The partition is load-bearing: a chunk is both the
//! commit unit and the recovery unit, and its labels (`chunk_000` ..
//! `chunk_099`) stay stable across runs.

use crate::db::checkpoints::{marker, phase, CheckpointStore};
use crate::db::tables;
use crate::error::{PipelineError, Result};
use sqlx::{Connection, PgPool};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One of the 100 fixed `cnpj_basico` ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    index: usize,
}

impl ChunkRange {
    pub const COUNT: usize = 100;

    pub fn new(index: usize) -> Self {
        assert!(index < Self::COUNT);
        Self { index }
    }

    pub fn all() -> impl Iterator<Item = ChunkRange> {
        (0..Self::COUNT).map(ChunkRange::new)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stable checkpoint label (`chunk_000` .. `chunk_099`).
    pub fn label(&self) -> String {
        format!("chunk_{:03}", self.index)
    }

    /// Inclusive lower bound.
    pub fn start(&self) -> String {
        format!("{:08}", self.index * 1_000_000)
    }

    /// Upper bound: exclusive everywhere except the last range, which is
    /// inclusive at `99999999`.
    pub fn end(&self) -> String {
        if self.is_last() {
            "99999999".to_string()
        } else {
            format!("{:08}", (self.index + 1) * 1_000_000)
        }
    }

    pub fn is_last(&self) -> bool {
        self.index == Self::COUNT - 1
    }

    /// Range membership under lexicographic order (all keys are 8 digits).
    pub fn contains(&self, cnpj_basico: &str) -> bool {
        let start = self.start();
        let end = self.end();
        cnpj_basico >= start.as_str()
            && (cnpj_basico < end.as_str() || (self.is_last() && cnpj_basico == end.as_str()))
    }
}

fn range_predicate(inclusive_end: bool, qualifier: &str) -> String {
    let cmp = if inclusive_end { "<=" } else { "<" };
    format!("{qualifier}cnpj_basico >= $1 AND {qualifier}cnpj_basico {cmp} $2")
}

fn consolidation_insert_sql(inclusive_end: bool) -> String {
    format!(
        r#"
        INSERT INTO estabelecimentos
        SELECT
            e.cnpj14, e.cnpj_basico, e.cnpj_ordem, e.cnpj_dv, e.matriz_filial,
            e.nome_fantasia, e.situacao_cadastral, e.data_situacao_cadastral,
            e.motivo_situacao_cadastral, e.nome_cidade_exterior, e.codigo_pais,
            e.pais, e.data_inicio_atividade, e.cnae_fiscal_principal,
            e.cnae_fiscal_secundaria, e.tipo_logradouro, e.logradouro, e.numero,
            e.complemento, e.bairro, e.cep, e.uf, e.municipio, e.ddd1,
            e.telefone1, e.ddd2, e.telefone2, e.ddd_fax, e.fax, e.email,
            e.situacao_especial, e.data_situacao_especial,
            emp.razao_social, emp.natureza_juridica, emp.qualificacao_responsavel,
            emp.capital_social, emp.porte_empresa, emp.ente_federativo,
            s.opcao_simples, s.data_opcao_simples, s.data_exclusao_simples,
            s.opcao_mei, s.data_opcao_mei, s.data_exclusao_mei
        FROM staging_estabelecimentos e
        LEFT JOIN staging_empresas emp ON emp.cnpj_basico = e.cnpj_basico
        LEFT JOIN staging_simples s ON s.cnpj_basico = e.cnpj_basico
        WHERE {}
        "#,
        range_predicate(inclusive_end, "e.")
    )
}

fn range_delete_sql(inclusive_end: bool) -> String {
    format!(
        "DELETE FROM estabelecimentos WHERE {}",
        range_predicate(inclusive_end, "")
    )
}

pub(crate) async fn table_exists(pool: &PgPool, qualified_name: &str) -> Result<bool> {
    let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
        .bind(qualified_name)
        .fetch_one(pool)
        .await?;
    Ok(exists)
}

async fn count_rows(pool: &PgPool, table: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Reconstruct chunk checkpoints from table contents. Heals the state where
/// a previous run crashed between an INSERT commit and its checkpoint
/// write: any chunk whose final-table row count equals its staging range
/// count was fully consolidated.
async fn recover_chunks(pool: &PgPool) -> Result<Vec<(usize, i64)>> {
    let rows: Vec<(i32, i64, i64)> = sqlx::query_as(
        r#"
        WITH final_counts AS (
            SELECT (cnpj_basico::bigint / 1000000)::int AS chunk_num,
                   COUNT(*) AS rows_imported
            FROM estabelecimentos
            GROUP BY 1
        ),
        staging_counts AS (
            SELECT (cnpj_basico::bigint / 1000000)::int AS chunk_num,
                   COUNT(*) AS rows_expected
            FROM staging_estabelecimentos
            GROUP BY 1
        )
        SELECT f.chunk_num, f.rows_imported, s.rows_expected
        FROM final_counts f
        JOIN staging_counts s ON s.chunk_num = f.chunk_num
        ORDER BY f.chunk_num
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter(|(chunk_num, imported, expected)| {
            (0..ChunkRange::COUNT as i32).contains(chunk_num)
                && *expected > 0
                && imported == expected
        })
        .map(|(chunk_num, imported, _)| (chunk_num as usize, imported))
        .collect())
}

/// Part 2: chunked LEFT-JOIN INSERT into the recreated super-table.
pub(crate) async fn run_parte2_consolidation(
    pool: &PgPool,
    checkpoints: &CheckpointStore,
    release: &str,
) -> Result<()> {
    let parte2_done = checkpoints
        .count_files(release, phase::FASE3_PARTE2_CREATE_TABLE)
        .await?
        > 0;
    if parte2_done {
        info!("Consolidation already complete, skipping");
        return Ok(());
    }

    let mut processed = checkpoints
        .list_processed_chunks(release, phase::FASE3_PARTE2_CHUNKS)
        .await?;
    let final_exists = table_exists(pool, "public.estabelecimentos").await?;
    let staging_exists = table_exists(pool, "public.staging_estabelecimentos").await?;

    if processed.is_empty() && final_exists && staging_exists {
        let recovered = recover_chunks(pool).await?;
        if !recovered.is_empty() {
            info!(
                chunks = recovered.len(),
                "Recovered consolidated chunks from a previous uncheckpointed run"
            );
        }
        for (chunk_num, rows) in recovered {
            let label = ChunkRange::new(chunk_num).label();
            checkpoints
                .mark_file(release, phase::FASE3_PARTE2_CHUNKS, &label, rows)
                .await?;
            processed.insert(label, rows);
        }
    }

    if processed.len() == ChunkRange::COUNT {
        let mut total: i64 = processed.values().sum();
        if total == 0 {
            total = count_rows(pool, "estabelecimentos").await?;
        }
        checkpoints
            .mark_file(
                release,
                phase::FASE3_PARTE2_CREATE_TABLE,
                marker::CONSOLIDATED,
                total,
            )
            .await?;
        info!(total_rows = total, "All chunks were already consolidated");
        return Ok(());
    }

    let empresas_count = count_rows(pool, "staging_empresas").await?;
    let simples_count = count_rows(pool, "staging_simples").await?;
    info!(
        staging_empresas = empresas_count,
        staging_simples = simples_count,
        "Join inputs"
    );
    if empresas_count == 0 {
        return Err(PipelineError::CheckpointCorruption(
            "staging_empresas is empty; phase 1 must run before consolidation".to_string(),
        ));
    }
    if simples_count == 0 {
        return Err(PipelineError::CheckpointCorruption(
            "staging_simples is empty; phase 2 must run before consolidation".to_string(),
        ));
    }

    if processed.is_empty() || !final_exists {
        info!("Recreating estabelecimentos from scratch");
        sqlx::query("DROP TABLE IF EXISTS estabelecimentos CASCADE")
            .execute(pool)
            .await?;
        sqlx::query(&tables::create_estabelecimentos_sql(false))
            .execute(pool)
            .await?;
        processed.clear();
    } else {
        info!(
            chunks_done = processed.len(),
            "Resuming consolidation from the next pending chunk"
        );
    }

    let initial_done = processed.len();
    // A partially consolidated table may hold rows from a chunk that
    // committed without its checkpoint; sweep the first executed range
    // before inserting so the primary key stays unique.
    let mut needs_cleanup = initial_done > 0;
    let mut total_rows: i64 = processed.values().sum();
    let mut chunks_done = initial_done;
    let run_start = Instant::now();

    for chunk in ChunkRange::all() {
        let label = chunk.label();
        if processed.contains_key(&label) {
            debug!(chunk = %label, "Chunk already consolidated, skipping");
            continue;
        }

        let chunk_start = Instant::now();
        let mut conn = pool.acquire().await?;
        let mut tx = conn.begin().await?;

        if needs_cleanup {
            let deleted = sqlx::query(&range_delete_sql(chunk.is_last()))
                .bind(chunk.start())
                .bind(chunk.end())
                .execute(&mut *tx)
                .await?
                .rows_affected();
            if deleted > 0 {
                warn!(chunk = %label, deleted, "Removed leaked rows from an interrupted chunk");
            }
            needs_cleanup = false;
        }

        let rows_inserted = sqlx::query(&consolidation_insert_sql(chunk.is_last()))
            .bind(chunk.start())
            .bind(chunk.end())
            .execute(&mut *tx)
            .await?
            .rows_affected() as i64;

        tx.commit().await?;

        checkpoints
            .mark_file(release, phase::FASE3_PARTE2_CHUNKS, &label, rows_inserted)
            .await?;
        chunks_done += 1;
        total_rows += rows_inserted;

        let executed_this_run = chunks_done - initial_done;
        let avg_secs = run_start.elapsed().as_secs_f64() / executed_this_run as f64;
        let eta_min = avg_secs * (ChunkRange::COUNT - chunks_done) as f64 / 60.0;
        info!(
            chunk = %label,
            range = format!("{}-{}", chunk.start(), chunk.end()),
            rows = rows_inserted,
            chunk_secs = format!("{:.1}", chunk_start.elapsed().as_secs_f64()),
            total_rows,
            progress_pct = chunks_done,
            eta_min = format!("{eta_min:.1}"),
            "Chunk consolidated"
        );
    }

    checkpoints
        .mark_file(
            release,
            phase::FASE3_PARTE2_CREATE_TABLE,
            marker::CONSOLIDATED,
            total_rows,
        )
        .await?;
    info!(total_rows, "Consolidation complete");
    Ok(())
}

/// Part 3: final-table indexes, each statement in its own transaction.
pub(crate) async fn run_parte3_indexes(
    pool: &PgPool,
    checkpoints: &CheckpointStore,
    release: &str,
) -> Result<()> {
    let done = checkpoints
        .count_files(release, phase::FASE3_PARTE3_INDEXES)
        .await?
        > 0;
    if done {
        info!("Indexes already created, skipping");
        return Ok(());
    }

    for statement in tables::ESTABELECIMENTOS_INDEXES {
        info!(
            index = statement.split_whitespace().nth(5).unwrap_or(""),
            "Creating index"
        );
        sqlx::query(statement).execute(pool).await?;
    }

    checkpoints
        .mark_file(
            release,
            phase::FASE3_PARTE3_INDEXES,
            marker::INDEXES_CREATED,
            0,
        )
        .await?;
    info!("Final-table indexes created");
    Ok(())
}

/// Part 4: drop the three staging tables.
pub(crate) async fn run_parte4_cleanup(
    pool: &PgPool,
    checkpoints: &CheckpointStore,
    release: &str,
) -> Result<()> {
    let done = checkpoints
        .count_files(release, phase::FASE3_PARTE4_CLEANUP)
        .await?
        > 0;
    if done {
        info!("Staging tables already dropped, skipping");
        return Ok(());
    }

    for table in [
        "staging_estabelecimentos",
        "staging_empresas",
        "staging_simples",
    ] {
        info!(table, "Dropping staging table");
        sqlx::query(&format!("DROP TABLE IF EXISTS {table} CASCADE"))
            .execute(pool)
            .await?;
    }

    checkpoints
        .mark_file(
            release,
            phase::FASE3_PARTE4_CLEANUP,
            marker::STAGING_DROPPED,
            0,
        )
        .await?;
    info!("Staging tables dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_zero_padded_and_stable() {
        assert_eq!(ChunkRange::new(0).label(), "chunk_000");
        assert_eq!(ChunkRange::new(7).label(), "chunk_007");
        assert_eq!(ChunkRange::new(99).label(), "chunk_099");
    }

    #[test]
    fn chunk_boundaries() {
        let first = ChunkRange::new(0);
        assert_eq!(first.start(), "00000000");
        assert_eq!(first.end(), "01000000");
        assert!(first.contains("00999999"));
        assert!(!first.contains("01000000"));

        let second = ChunkRange::new(1);
        assert!(second.contains("01000000"));

        let last = ChunkRange::new(99);
        assert_eq!(last.start(), "99000000");
        assert_eq!(last.end(), "99999999");
        assert!(last.contains("99999999"));
    }

    #[test]
    fn every_key_lands_in_exactly_one_chunk() {
        for key in ["00000000", "00999999", "18000000", "54321098", "99999999"] {
            let owners = ChunkRange::all().filter(|c| c.contains(key)).count();
            assert_eq!(owners, 1, "key {key} must land in exactly one chunk");
        }
    }

    #[test]
    fn only_last_range_is_inclusive() {
        assert!(!ChunkRange::new(0).is_last());
        assert!(!ChunkRange::new(98).is_last());
        assert!(ChunkRange::new(99).is_last());
    }

    #[test]
    fn insert_sql_uses_exclusive_upper_except_last() {
        let regular = consolidation_insert_sql(false);
        assert!(regular.contains("e.cnpj_basico >= $1 AND e.cnpj_basico < $2"));
        let last = consolidation_insert_sql(true);
        assert!(last.contains("e.cnpj_basico >= $1 AND e.cnpj_basico <= $2"));
    }

    #[test]
    fn insert_selects_all_super_table_columns() {
        let sql = consolidation_insert_sql(false);
        let select = sql
            .split("FROM staging_estabelecimentos")
            .next()
            .unwrap()
            .split("SELECT")
            .nth(1)
            .unwrap();
        assert_eq!(select.matches(',').count(), 43); // 44 columns
        assert!(sql.contains("LEFT JOIN staging_empresas"));
        assert!(sql.contains("LEFT JOIN staging_simples"));
    }

    #[test]
    fn delete_sql_targets_unqualified_range() {
        assert_eq!(
            range_delete_sql(false),
            "DELETE FROM estabelecimentos WHERE cnpj_basico >= $1 AND cnpj_basico < $2"
        );
    }
}
