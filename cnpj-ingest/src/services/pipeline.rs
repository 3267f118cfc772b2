//! Pipeline orchestrator
//!
//! Sequences one release import end to end:
//!
//! ```text
//! discover-target -> check-current -> start -> download -> extract
//!     -> ingest -> cleanup -> finish(completed)
//!                          -> finish(failed)
//! ```
//!
//! Target discovery: an explicit release argument wins; otherwise the newest
//! release directory already present in staging; otherwise the catalogue.
//! Any error between `start` and `cleanup` is recorded in the version
//! registry as `failed` (with the error text as note) and re-raised.

use crate::db::VersionRegistry;
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::models::IngestionStatus;
use crate::services::{DownloadManager, Extractor, ReceitaClient};
use cnpj_common::Settings;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct Pipeline {
    settings: Arc<Settings>,
    catalogue: ReceitaClient,
    downloader: DownloadManager,
    extractor: Extractor,
    ingestor: Ingestor,
    versions: VersionRegistry,
}

impl Pipeline {
    pub fn new(settings: Arc<Settings>, pool: PgPool) -> Result<Self> {
        let catalogue = ReceitaClient::new(&settings.download_base_url, settings.http_timeout)?;
        let downloader = DownloadManager::new(
            &settings,
            ReceitaClient::new(&settings.download_base_url, settings.http_timeout)?,
        );
        let extractor = Extractor::new(&settings);
        let ingestor = Ingestor::new(pool.clone(), settings.batch_size);
        let versions = VersionRegistry::new(pool);
        Ok(Self {
            settings,
            catalogue,
            downloader,
            extractor,
            ingestor,
            versions,
        })
    }

    /// Run the pipeline for a release (latest when `None`). Returns the
    /// imported release. `force` re-imports even when the registry already
    /// shows the target as completed.
    pub async fn run(&self, release: Option<&str>, force: bool) -> Result<String> {
        info!(release = release.unwrap_or("latest"), "Starting pipeline");

        let target = match release {
            Some(explicit) => explicit.to_string(),
            None => match self.find_existing_release()? {
                Some(existing) => existing,
                None => self.catalogue.latest_release().await?,
            },
        };
        info!(release = %target, "Target release");

        if !force {
            if let Some(current) = self.versions.current_release().await? {
                if current.release == target && current.status == IngestionStatus::Completed {
                    info!(release = %target, "Database already at this release, nothing to do");
                    return Ok(target);
                }
            }
        }

        self.versions.start_release(&target).await?;
        match self.execute(&target).await {
            Ok(()) => {
                self.versions.finish_release(&target, true, None).await?;
                info!(release = %target, "Pipeline finished");
                Ok(target)
            }
            Err(err) => {
                error!(release = %target, error = %err, "Pipeline failed");
                let note = err.to_string();
                if let Err(registry_err) = self
                    .versions
                    .finish_release(&target, false, Some(&note))
                    .await
                {
                    error!(error = %registry_err, "Failed to record pipeline failure");
                }
                Err(err)
            }
        }
    }

    async fn execute(&self, release: &str) -> Result<()> {
        let archives = self
            .downloader
            .download_release(release, self.settings.reuse_downloads)
            .await?;
        info!(archives = archives.len(), "Archives ready for extraction");

        let extracted = self
            .extractor
            .extract_release(release, &archives, self.settings.reuse_extractions)
            .await?;
        info!(files = extracted.len(), "Files ready for loading");

        self.ingestor.load_files(release, &extracted).await?;

        self.cleanup(release).await;
        Ok(())
    }

    /// Remove per-release scratch directories, each behind its own flag.
    async fn cleanup(&self, release: &str) {
        let targets = [
            (
                self.downloader.release_dir(release),
                self.settings.cleanup_raw_after_load,
            ),
            (
                self.extractor.release_dir(release),
                self.settings.cleanup_staging_after_load,
            ),
        ];
        for (path, should_remove) in targets {
            if !should_remove || !path.exists() {
                continue;
            }
            match tokio::fs::remove_dir_all(&path).await {
                Ok(()) => info!(path = %path.display(), "Removed"),
                Err(err) => warn!(path = %path.display(), error = %err, "Cleanup failed"),
            }
        }
    }

    /// Newest `YYYY-MM` directory already extracted under staging, if any.
    fn find_existing_release(&self) -> Result<Option<String>> {
        let staging = self.settings.staging_dir();
        if !staging.exists() {
            return Ok(None);
        }
        let mut releases: Vec<String> = std::fs::read_dir(&staging)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| looks_like_release(name))
            .collect();
        if releases.is_empty() {
            return Ok(None);
        }
        releases.sort();
        let newest = releases.pop();
        info!(releases = releases.len() + 1, newest = ?newest, "Found existing releases in staging");
        Ok(newest)
    }
}

fn looks_like_release(name: &str) -> bool {
    name.is_ascii()
        && name.len() == 7
        && name.as_bytes()[4] == b'-'
        && name[..4].bytes().all(|b| b.is_ascii_digit())
        && name[5..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_directory_names() {
        assert!(looks_like_release("2024-05"));
        assert!(looks_like_release("1999-12"));
        assert!(!looks_like_release("2024-5"));
        assert!(!looks_like_release("2024_05"));
        assert!(!looks_like_release("tmp"));
        assert!(!looks_like_release("2024-056"));
    }
}
