//! COPY TEXT batching
//!
//! Rows are accumulated as pre-escaped tab-separated lines and shipped to
//! PostgreSQL in `batch_size`-row COPY statements. Peak memory per phase is
//! one batch plus whatever sits in the bounded channel between the CSV
//! reader thread and the database writer.

use crate::error::{PipelineError, Result};
use sqlx::postgres::PgConnection;

/// One fully assembled COPY payload.
#[derive(Debug)]
pub struct CopyBatch {
    pub data: String,
    pub rows: usize,
}

/// Accumulates COPY lines until a batch is full.
pub struct BatchAssembler {
    batch_size: usize,
    buffer: String,
    rows: usize,
}

impl BatchAssembler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            buffer: String::new(),
            rows: 0,
        }
    }

    /// Append one line (already escaped, newline-terminated). Returns the
    /// completed batch once `batch_size` rows are buffered.
    pub fn push_line(&mut self, line: &str) -> Option<CopyBatch> {
        self.buffer.push_str(line);
        self.rows += 1;
        if self.rows >= self.batch_size {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drain the tail batch, if any rows remain.
    pub fn finish(&mut self) -> Option<CopyBatch> {
        (self.rows > 0).then(|| self.take())
    }

    fn take(&mut self) -> CopyBatch {
        CopyBatch {
            data: std::mem::take(&mut self.buffer),
            rows: std::mem::replace(&mut self.rows, 0),
        }
    }
}

/// Execute one COPY FROM STDIN statement for a batch on the given
/// connection (typically inside the per-file transaction).
pub async fn copy_batch(
    conn: &mut PgConnection,
    statement: &str,
    target: &str,
    batch: &CopyBatch,
) -> Result<()> {
    let failed = |source: sqlx::Error| PipelineError::CopyFailed {
        target: target.to_string(),
        source,
    };
    let mut sink = conn.copy_in_raw(statement).await.map_err(failed)?;
    if let Err(err) = sink.send(batch.data.as_bytes()).await {
        // Surface the abort reason from the server, not the broken pipe.
        let aborted = sink.abort("batch send failed").await;
        return Err(failed(aborted.err().unwrap_or(err)));
    }
    sink.finish().await.map_err(failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_emits_full_batches_and_tail() {
        let mut assembler = BatchAssembler::new(3);
        assert!(assembler.push_line("a\n").is_none());
        assert!(assembler.push_line("b\n").is_none());
        let full = assembler.push_line("c\n").unwrap();
        assert_eq!(full.rows, 3);
        assert_eq!(full.data, "a\nb\nc\n");

        assert!(assembler.push_line("d\n").is_none());
        let tail = assembler.finish().unwrap();
        assert_eq!(tail.rows, 1);
        assert_eq!(tail.data, "d\n");
        assert!(assembler.finish().is_none());
    }

    #[test]
    fn empty_assembler_yields_no_tail() {
        let mut assembler = BatchAssembler::new(5);
        assert!(assembler.finish().is_none());
    }
}
