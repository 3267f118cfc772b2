//! Download manager
//!
//! Fetches all archives of a release into `<raw_dir>/<release>/`. Pending
//! files are spread over a bounded worker pool with a staggered start so the
//! workers do not enter TCP slow-start against the upstream simultaneously.
//! Each worker builds a fresh HTTP client and streams the body straight to
//! disk. A worker that exhausts its retries fails the whole release;
//! archives that did complete stay on disk to speed up the next attempt.

use crate::error::{PipelineError, Result};
use crate::models::RemoteFile;
use crate::services::catalogue::ReceitaClient;
use cnpj_common::{ensure_dir, Settings};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);
const WRITE_BUFFER_BYTES: usize = 8 * 1024 * 1024;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub struct DownloadManager {
    raw_dir: PathBuf,
    http_timeout: u64,
    max_parallel_downloads: usize,
    download_start_delay: u64,
    catalogue: ReceitaClient,
}

impl DownloadManager {
    pub fn new(settings: &Settings, catalogue: ReceitaClient) -> Self {
        Self {
            raw_dir: settings.raw_dir(),
            http_timeout: settings.http_timeout,
            max_parallel_downloads: settings.max_parallel_downloads,
            download_start_delay: settings.download_start_delay,
            catalogue,
        }
    }

    /// Directory that holds this release's archives.
    pub fn release_dir(&self, release: &str) -> PathBuf {
        self.raw_dir.join(release)
    }

    /// Ensure every archive of the release is on disk; returns the sorted
    /// local paths.
    pub async fn download_release(&self, release: &str, reuse_existing: bool) -> Result<Vec<PathBuf>> {
        let target_dir = ensure_dir(&self.release_dir(release))?;

        if reuse_existing {
            let existing = list_archives(&target_dir)?;
            if !existing.is_empty() {
                info!(
                    release,
                    archives = existing.len(),
                    "Reusing previously downloaded archives"
                );
                return Ok(existing);
            }
        }

        let files = self.catalogue.list_files(release).await?;

        let mut downloaded: Vec<PathBuf> = Vec::new();
        let mut pending: Vec<(RemoteFile, PathBuf)> = Vec::new();
        for remote in files {
            let local_path = target_dir.join(&remote.name);
            let already = local_path
                .metadata()
                .map(|m| m.len() > 0)
                .unwrap_or(false);
            if already {
                info!(file = %remote.name, "Archive already on disk, skipping download");
                downloaded.push(local_path);
            } else {
                pending.push((remote, local_path));
            }
        }

        if !pending.is_empty() {
            let workers = self.max_parallel_downloads.min(pending.len());
            info!(
                release,
                pending = pending.len(),
                workers,
                start_delay_secs = self.download_start_delay,
                "Downloading archives"
            );

            let semaphore = Arc::new(Semaphore::new(workers));
            let mut tasks: JoinSet<Result<PathBuf>> = JoinSet::new();
            for (i, (remote, path)) in pending.into_iter().enumerate() {
                // Staggered start: spacing out the workers avoids
                // synchronised TCP slow-start against the upstream server.
                if i > 0 {
                    tokio::time::sleep(Duration::from_secs(self.download_start_delay)).await;
                }
                let semaphore = Arc::clone(&semaphore);
                let http_timeout = self.http_timeout;
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| PipelineError::Internal(e.to_string()))?;
                    download_file(&remote, &path, http_timeout).await?;
                    Ok(path)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                // A failed worker aborts the release; dropping the JoinSet
                // cancels the rest. Finished archives stay on disk.
                let path = joined??;
                downloaded.push(path);
            }
        }

        downloaded.sort();
        Ok(downloaded)
    }
}

/// Download one archive with linear-backoff retries. Each attempt truncates
/// whatever a previous failed attempt left behind.
async fn download_file(remote: &RemoteFile, target: &Path, timeout_secs: u64) -> Result<()> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match stream_to_disk(remote, target, timeout_secs).await {
            Ok(bytes) => {
                info!(file = %remote.name, bytes, "Download complete");
                return Ok(());
            }
            Err(err) if attempt < MAX_ATTEMPTS => {
                warn!(
                    file = %remote.name,
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    error = %err,
                    retry_in_secs = RETRY_DELAY.as_secs(),
                    "Download attempt failed"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(err) => {
                return Err(PipelineError::DownloadFailed {
                    name: remote.name.clone(),
                    reason: format!("{err} (after {MAX_ATTEMPTS} attempts)"),
                });
            }
        }
    }
}

async fn stream_to_disk(remote: &RemoteFile, target: &Path, timeout_secs: u64) -> Result<u64> {
    // Fresh client per worker: no shared connection pool between workers,
    // keep-alive within one worker's redirects.
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(BROWSER_USER_AGENT)
        .build()?;

    let response = client
        .get(&remote.url)
        .header("Accept", "*/*")
        .send()
        .await?
        .error_for_status()?;

    let file = tokio::fs::File::create(target).await?;
    let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    writer.flush().await?;
    Ok(written)
}

fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
        })
        .collect();
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_archives_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("B.zip"), b"x").unwrap();
        std::fs::write(tmp.path().join("A.ZIP"), b"x").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), b"x").unwrap();
        let archives = list_archives(tmp.path()).unwrap();
        let names: Vec<_> = archives
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["A.ZIP", "B.zip"]);
    }
}
