//! Streaming phases
//!
//! Phases 1 (empresas), 2 (simples) and 4 (socios) share one mechanic:
//! ensure the target table, truncate it when no file of the phase has been
//! recorded yet (fresh run) or append otherwise, then stream each pending
//! file through COPY on a connection dedicated to that file. The per-file
//! COMMIT is the unit of durability - a crash mid-file re-does only that
//! file on the next run.
//!
//! CSV parsing is synchronous and runs on a blocking thread; assembled COPY
//! batches cross a bounded channel to the single database writer, which
//! keeps both the single-writer guarantee and the memory bound.

use crate::db::checkpoints::phase;
use crate::db::{tables, CheckpointStore};
use crate::error::{PipelineError, Result};
use crate::ingest::copy::{copy_batch, BatchAssembler, CopyBatch};
use crate::ingest::rows::{
    decode_record, EmpresaRow, EstabelecimentoRow, SimplesRow, SocioRow,
};
use sqlx::{Connection, PgPool};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Batches in flight between the reader thread and the database writer.
const CHANNEL_CAPACITY: usize = 4;
/// Per-file cap on individually logged bad rows; the rest are only counted.
const SKIP_LOG_LIMIT: u64 = 5;

pub const COPY_STAGING_EMPRESAS: &str = "COPY staging_empresas (cnpj_basico, razao_social, \
     natureza_juridica, qualificacao_responsavel, capital_social, porte_empresa, \
     ente_federativo) FROM STDIN";

pub const COPY_STAGING_SIMPLES: &str = "COPY staging_simples (cnpj_basico, opcao_simples, \
     data_opcao_simples, data_exclusao_simples, opcao_mei, data_opcao_mei, \
     data_exclusao_mei) FROM STDIN";

pub const COPY_STAGING_ESTABELECIMENTOS: &str = "COPY staging_estabelecimentos (cnpj14, \
     cnpj_basico, cnpj_ordem, cnpj_dv, matriz_filial, nome_fantasia, situacao_cadastral, \
     data_situacao_cadastral, motivo_situacao_cadastral, nome_cidade_exterior, codigo_pais, \
     pais, data_inicio_atividade, cnae_fiscal_principal, cnae_fiscal_secundaria, \
     tipo_logradouro, logradouro, numero, complemento, bairro, cep, uf, municipio, ddd1, \
     telefone1, ddd2, telefone2, ddd_fax, fax, email, situacao_especial, \
     data_situacao_especial) FROM STDIN";

pub const COPY_SOCIOS: &str = "COPY socios (cnpj_basico, identificador_socio, nome_socio, \
     cnpj_cpf_socio, codigo_qualificacao_socio, percentual_capital_social, \
     data_entrada_sociedade, codigo_pais, cpf_representante_legal, \
     nome_representante_legal, codigo_qualificacao_representante, faixa_etaria) FROM STDIN";

/// Outcome of shaping one CSV row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Serialised into the COPY buffer.
    Loaded,
    /// Valid but excluded by a load-time rule (cancelled establishments).
    Filtered,
    /// Malformed (short) row, skipped and counted.
    Skipped,
}

/// Shapes one decoded record into a COPY line.
pub type RowBuilder = fn(&[String], &mut String) -> RowOutcome;

pub fn build_empresa_line(fields: &[String], out: &mut String) -> RowOutcome {
    match EmpresaRow::from_fields(fields) {
        Some(row) => {
            row.write_copy_line(out);
            RowOutcome::Loaded
        }
        None => RowOutcome::Skipped,
    }
}

pub fn build_simples_line(fields: &[String], out: &mut String) -> RowOutcome {
    match SimplesRow::from_fields(fields) {
        Some(row) => {
            row.write_copy_line(out);
            RowOutcome::Loaded
        }
        None => RowOutcome::Skipped,
    }
}

/// Cancelled establishments (`situacao_cadastral = "08"`) are dropped here,
/// before they ever reach staging. This removes roughly 40% of the volume.
pub fn build_estabelecimento_line(fields: &[String], out: &mut String) -> RowOutcome {
    match EstabelecimentoRow::from_fields(fields) {
        Some(row) if row.is_cancelled() => RowOutcome::Filtered,
        Some(row) => {
            row.write_copy_line(out);
            RowOutcome::Loaded
        }
        None => RowOutcome::Skipped,
    }
}

pub fn build_socio_line(fields: &[String], out: &mut String) -> RowOutcome {
    match SocioRow::from_fields(fields) {
        Some(row) => {
            row.write_copy_line(out);
            RowOutcome::Loaded
        }
        None => RowOutcome::Skipped,
    }
}

/// Static description of one streaming phase.
pub(crate) struct StreamingPhase {
    pub tag: &'static str,
    pub table: &'static str,
    pub create_sql: &'static str,
    pub copy_statement: &'static str,
    pub build: RowBuilder,
}

pub(crate) const FASE1: StreamingPhase = StreamingPhase {
    tag: phase::FASE1_EMPRESAS,
    table: "staging_empresas",
    create_sql: tables::CREATE_STAGING_EMPRESAS,
    copy_statement: COPY_STAGING_EMPRESAS,
    build: build_empresa_line,
};

pub(crate) const FASE2: StreamingPhase = StreamingPhase {
    tag: phase::FASE2_SIMPLES,
    table: "staging_simples",
    create_sql: tables::CREATE_STAGING_SIMPLES,
    copy_statement: COPY_STAGING_SIMPLES,
    build: build_simples_line,
};

pub(crate) const FASE3_PARTE1: StreamingPhase = StreamingPhase {
    tag: phase::FASE3_PARTE1_STAGING,
    table: "staging_estabelecimentos",
    create_sql: tables::CREATE_STAGING_ESTABELECIMENTOS,
    copy_statement: COPY_STAGING_ESTABELECIMENTOS,
    build: build_estabelecimento_line,
};

pub(crate) const FASE4: StreamingPhase = StreamingPhase {
    tag: phase::FASE4_SOCIOS,
    table: "socios",
    create_sql: tables::CREATE_SOCIOS,
    copy_statement: COPY_SOCIOS,
    build: build_socio_line,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct FileStats {
    pub rows_imported: u64,
    pub filtered: u64,
    pub skipped: u64,
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Run one streaming phase over its input files with per-file checkpoints.
pub(crate) async fn run_streaming_phase(
    pool: &PgPool,
    checkpoints: &CheckpointStore,
    release: &str,
    spec: &StreamingPhase,
    files: &[PathBuf],
    batch_size: usize,
) -> Result<()> {
    info!(phase = spec.tag, files = files.len(), "Starting phase");

    sqlx::query(spec.create_sql).execute(pool).await?;

    let processed = checkpoints.count_files(release, spec.tag).await?;
    if processed == 0 {
        info!(table = spec.table, "Fresh run, truncating target table");
        sqlx::query(&format!("TRUNCATE TABLE {}", spec.table))
            .execute(pool)
            .await?;
    } else {
        info!(
            table = spec.table,
            files_done = processed,
            "Resuming phase, keeping already committed rows"
        );
    }

    let mut pending = Vec::new();
    for file in files {
        let name = file_name(file);
        if checkpoints
            .is_file_processed(release, spec.tag, &name)
            .await?
        {
            info!(phase = spec.tag, file = %name, "File already processed, skipping");
        } else {
            pending.push(file.clone());
        }
    }

    for file in &pending {
        let name = file_name(file);
        info!(phase = spec.tag, file = %name, "Importing");
        let stats = import_file(pool, file, spec, batch_size).await?;
        checkpoints
            .mark_file(release, spec.tag, &name, stats.rows_imported as i64)
            .await?;
        info!(
            phase = spec.tag,
            file = %name,
            rows = stats.rows_imported,
            filtered = stats.filtered,
            skipped = stats.skipped,
            "File committed"
        );
    }

    info!(phase = spec.tag, "Phase complete");
    Ok(())
}

/// Stream one file into its table inside a single transaction.
async fn import_file(
    pool: &PgPool,
    path: &Path,
    spec: &StreamingPhase,
    batch_size: usize,
) -> Result<FileStats> {
    // One long-lived connection dedicated to this file.
    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    let (batch_tx, mut batch_rx) = mpsc::channel::<CopyBatch>(CHANNEL_CAPACITY);
    let reader_path = path.to_path_buf();
    let build = spec.build;
    let producer = tokio::task::spawn_blocking(move || {
        read_copy_batches(&reader_path, batch_size, build, batch_tx)
    });

    let mut rows_imported: u64 = 0;
    while let Some(batch) = batch_rx.recv().await {
        if let Err(err) = copy_batch(&mut *tx, spec.copy_statement, spec.table, &batch).await {
            // Dropping the receiver unblocks the reader thread; the
            // transaction rolls back on drop, so the file stays unrecorded.
            drop(batch_rx);
            let _ = producer.await;
            return Err(err);
        }
        rows_imported += batch.rows as u64;
    }

    let mut stats = producer.await??;
    stats.rows_imported = rows_imported;

    tx.commit().await?;
    Ok(stats)
}

/// Blocking CSV reader: decode, shape, assemble and hand off COPY batches.
fn read_copy_batches(
    path: &Path,
    batch_size: usize,
    build: RowBuilder,
    batch_tx: mpsc::Sender<CopyBatch>,
) -> Result<FileStats> {
    let name = file_name(path);
    let file = std::fs::File::open(path)?;
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .quote(b'"')
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut assembler = BatchAssembler::new(batch_size);
    let mut record = csv::ByteRecord::new();
    let mut line = String::new();
    let mut stats = FileStats::default();

    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                stats.skipped += 1;
                if stats.skipped <= SKIP_LOG_LIMIT {
                    warn!(file = %name, error = %err, "Skipping unparseable row");
                }
                continue;
            }
        }
        let fields = decode_record(&record);
        line.clear();
        match build(&fields, &mut line) {
            RowOutcome::Loaded => {
                if let Some(batch) = assembler.push_line(&line) {
                    if batch_tx.blocking_send(batch).is_err() {
                        return Err(PipelineError::Internal(
                            "copy writer stopped receiving batches".to_string(),
                        ));
                    }
                }
            }
            RowOutcome::Filtered => stats.filtered += 1,
            RowOutcome::Skipped => {
                stats.skipped += 1;
                if stats.skipped <= SKIP_LOG_LIMIT {
                    let preview: Vec<&str> =
                        fields.iter().take(4).map(String::as_str).collect();
                    warn!(file = %name, ?preview, "Skipping short row");
                }
            }
        }
    }

    if let Some(batch) = assembler.finish() {
        if batch_tx.blocking_send(batch).is_err() {
            return Err(PipelineError::Internal(
                "copy writer stopped receiving batches".to_string(),
            ));
        }
    }

    if stats.skipped > SKIP_LOG_LIMIT {
        warn!(file = %name, skipped = stats.skipped, "Bad rows skipped in total");
    }
    Ok(stats)
}

/// Phase 4 epilogue: partner-table indexes, each in its own transaction.
pub(crate) async fn create_socios_indexes(pool: &PgPool) -> Result<()> {
    for statement in tables::SOCIOS_INDEXES {
        info!(index = statement.split_whitespace().nth(5).unwrap_or(""), "Creating index");
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empresa_builder_reports_short_rows() {
        let mut line = String::new();
        assert_eq!(
            build_empresa_line(&fields(&["only", "three", "fields"]), &mut line),
            RowOutcome::Skipped
        );
        assert!(line.is_empty());
    }

    #[test]
    fn estabelecimento_builder_filters_cancelled() {
        let mut base = vec!["12345678", "0001", "23", "1", "NAME", "08", "", ""]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>();
        base.extend(std::iter::repeat(String::new()).take(22));
        let mut line = String::new();
        assert_eq!(
            build_estabelecimento_line(&base, &mut line),
            RowOutcome::Filtered
        );

        base[5] = "2".to_string();
        assert_eq!(
            build_estabelecimento_line(&base, &mut line),
            RowOutcome::Loaded
        );
        assert!(line.starts_with("12345678000123\t"));
    }

    #[test]
    fn copy_statements_name_every_column() {
        assert_eq!(COPY_STAGING_EMPRESAS.matches(',').count(), 6);
        assert_eq!(COPY_STAGING_SIMPLES.matches(',').count(), 6);
        assert_eq!(COPY_STAGING_ESTABELECIMENTOS.matches(',').count(), 31);
        assert_eq!(COPY_SOCIOS.matches(',').count(), 11);
    }
}
