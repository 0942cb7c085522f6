use crate::config::ConversionConfig;
use crate::models::{ConversionKind, FileError, OutputFolder, UploadDescriptor};
use crate::services::archive::{ArchiveError, pack_output_folders};
use crate::services::cleanup::{CleanupGuard, REQUEST_DIR_PREFIX};
use crate::services::converter::{DocumentConverter, convert_one};
use crate::services::staging::stage_upload;
use crate::utils::validation::{ValidationError, validate_uploads};
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("No {label} were successfully converted.")]
    NoConversionsSucceeded {
        label: &'static str,
        errors: Vec<FileError>,
    },

    #[error("could not prepare working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("packaging failed: {0}")]
    Packaging(#[from] ArchiveError),

    #[error("packaging task failed: {0}")]
    Internal(String),
}

/// A finished batch. Dropping `cleanup` removes everything the request
/// wrote, archive included, so hold it until the archive has been sent.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub archive_path: PathBuf,
    /// Per-file failures in upload order
    pub errors: Vec<FileError>,
    pub converted: usize,
    pub cleanup: CleanupGuard,
}

/// validate -> stage all -> convert all -> package, for one conversion kind
pub struct ConversionPipeline {
    kind: ConversionKind,
    converter: Arc<dyn DocumentConverter>,
    max_files: usize,
    max_file_size: u64,
    timeout: Duration,
    concurrency: usize,
}

/// Keep output folder names unique within one request: `report`, `report_2`...
fn unique_stem(stem: &str, used: &mut HashSet<String>) -> String {
    if used.insert(stem.to_string()) {
        return stem.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}_{}", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

impl ConversionPipeline {
    pub fn new(converter: Arc<dyn DocumentConverter>, config: &ConversionConfig) -> Self {
        Self {
            kind: converter.kind(),
            converter,
            max_files: config.max_files,
            max_file_size: config.max_file_size as u64,
            timeout: config.conversion_timeout(),
            concurrency: config.max_concurrent_conversions.max(1),
        }
    }

    pub fn kind(&self) -> ConversionKind {
        self.kind
    }

    pub fn converter(&self) -> &Arc<dyn DocumentConverter> {
        &self.converter
    }

    pub fn validate(&self, uploads: &[UploadDescriptor]) -> Result<(), ValidationError> {
        validate_uploads(
            uploads,
            self.max_files,
            self.kind.allowed_content_types(),
            self.kind.allowed_extensions(),
            self.max_file_size,
        )
    }

    /// Run one batch inside a fresh `req-<uuid>` directory under `work_root`.
    ///
    /// Validation failures return before anything is written. Per-file save
    /// and convert failures are collected and the batch carries on. When no
    /// file converts, or packaging fails, whatever was written is cleaned up
    /// before the error is returned.
    pub async fn run(
        &self,
        uploads: Vec<UploadDescriptor>,
        work_root: &Path,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.validate(&uploads)?;

        let request_dir = work_root.join(format!("{}{}", REQUEST_DIR_PREFIX, Uuid::new_v4().simple()));
        let input_dir = request_dir.join("input");
        let output_root = request_dir.join("output");

        let mut cleanup = CleanupGuard::new(&request_dir);
        for dir in [&input_dir, &output_root] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| PipelineError::WorkDir {
                    path: dir.clone(),
                    source,
                })?;
        }

        let mut errors = Vec::new();

        // Stage all
        let mut staged_files = Vec::with_capacity(uploads.len());
        let mut used_stems = HashSet::new();
        for upload in uploads {
            let filename = upload.filename.clone();
            match stage_upload(upload, &input_dir, self.max_file_size).await {
                Ok(mut staged) => {
                    staged.stem = unique_stem(&staged.stem, &mut used_stems);
                    cleanup.track(&staged.path);
                    staged_files.push(staged);
                }
                Err(e) => {
                    warn!("[{}] Failed to save {}: {}", self.kind, filename, e);
                    errors.push(FileError::save(filename, e));
                }
            }
        }

        // Convert all, order preserved
        for staged in &staged_files {
            cleanup.track(output_root.join(&staged.stem));
        }
        let conversions: Vec<_> = staged_files
            .iter()
            .map(|staged| convert_one(self.converter.as_ref(), staged, &output_root, self.timeout))
            .collect();
        let results: Vec<_> = futures::stream::iter(conversions)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut folders: Vec<OutputFolder> = Vec::with_capacity(results.len());
        for (staged, result) in staged_files.iter().zip(results) {
            match result {
                Ok(folder) => folders.push(folder),
                Err(e) => {
                    warn!(
                        "[{}] Failed to convert {}: {}",
                        self.kind, staged.original_name, e
                    );
                    errors.push(FileError::convert(&staged.original_name, e));
                }
            }
        }

        if folders.is_empty() {
            error!(
                "[{}] No conversions succeeded ({} error(s))",
                self.kind,
                errors.len()
            );
            return Err(PipelineError::NoConversionsSucceeded {
                label: self.kind.source_label(),
                errors,
            });
        }

        // Package
        let converted = folders.len();
        let destination = request_dir.clone();
        let archive_path =
            tokio::task::spawn_blocking(move || pack_output_folders(&folders, &destination))
                .await
                .map_err(|e| PipelineError::Internal(e.to_string()))??;
        cleanup.track(&archive_path);

        info!(
            "[{}] Converted {} file(s), {} error(s)",
            self.kind,
            converted,
            errors.len()
        );

        Ok(PipelineOutcome {
            archive_path,
            errors,
            converted,
            cleanup,
        })
    }
}
