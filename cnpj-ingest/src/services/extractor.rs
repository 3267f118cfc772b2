//! Archive extractor
//!
//! Unzips release archives into `<staging_dir>/<release>/`, preserving each
//! archive's internal paths. Extraction is idempotent: when reuse is enabled
//! and the release staging directory already holds files, those are returned
//! untouched. Corrupt archives hard-fail; the checkpointed pipeline makes a
//! re-run after re-download cheap.

use crate::error::{PipelineError, Result};
use cnpj_common::{ensure_dir, Settings};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub struct Extractor {
    staging_dir: PathBuf,
}

impl Extractor {
    pub fn new(settings: &Settings) -> Self {
        Self {
            staging_dir: settings.staging_dir(),
        }
    }

    /// Directory that holds this release's extracted files.
    pub fn release_dir(&self, release: &str) -> PathBuf {
        self.staging_dir.join(release)
    }

    /// Extract all archives of a release; returns the sorted file paths.
    pub async fn extract_release(
        &self,
        release: &str,
        archives: &[PathBuf],
        reuse_existing: bool,
    ) -> Result<Vec<PathBuf>> {
        let release_dir = ensure_dir(&self.release_dir(release))?;

        if reuse_existing {
            let existing = list_files(&release_dir);
            if !existing.is_empty() {
                info!(
                    release,
                    files = existing.len(),
                    "Reusing previously extracted files"
                );
                return Ok(existing);
            }
        }

        let mut extracted = Vec::new();
        for archive in archives {
            if !archive.exists() {
                warn!(archive = %archive.display(), "Archive missing, skipping extraction");
                continue;
            }
            info!(archive = %archive.display(), "Extracting");
            let archive = archive.clone();
            let dest = release_dir.clone();
            // The zip crate is synchronous; tens of gigabytes of inflate work
            // do not belong on the async runtime.
            let files =
                tokio::task::spawn_blocking(move || extract_archive(&archive, &dest)).await??;
            extracted.extend(files);
        }

        extracted.sort();
        Ok(extracted)
    }
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let failed = |reason: String| PipelineError::ExtractionFailed {
        archive: archive.display().to_string(),
        reason,
    };

    let file = std::fs::File::open(archive).map_err(|e| failed(e.to_string()))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| failed(e.to_string()))?;

    let mut extracted = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| failed(e.to_string()))?;
        // enclosed_name rejects entries that would escape the destination.
        let Some(relative) = entry.enclosed_name() else {
            warn!(archive = %archive.display(), entry = entry.name(), "Skipping unsafe zip entry");
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| failed(e.to_string()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
        }
        let mut out = std::fs::File::create(&target).map_err(|e| failed(e.to_string()))?;
        std::io::copy(&mut entry, &mut out).map_err(|e| failed(e.to_string()))?;
        extracted.push(target);
    }
    Ok(extracted)
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}
