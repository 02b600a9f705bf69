//! Ingestion orchestration.
//!
//! Coordinates the write path: fingerprint → load → chunk → embed → index.
//! Parsing and chunking are CPU-bound and run on the blocking pool so an
//! upload never stalls concurrent chat requests.
//!
//! Re-ingesting identical bytes is safe: the fingerprint keys the index, and
//! the previous entries for it are replaced rather than duplicated.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::chunk;
use crate::config::ChunkingConfig;
use crate::error::RagError;
use crate::hash;
use crate::index::IndexManager;
use crate::loader;

/// Result of ingesting one file.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub status: &'static str,
    pub fingerprint: String,
    pub file_name: String,
    pub chunk_count: i64,
    /// The fingerprint was already indexed and has been replaced.
    pub replaced: bool,
}

/// A file that failed during a batch ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct FailedFile {
    pub path: String,
    pub code: &'static str,
    pub message: String,
}

/// Result of ingesting a directory tree or a list of paths.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub ingested: Vec<IngestReport>,
    pub failed: Vec<FailedFile>,
    /// Files skipped for an unsupported extension.
    pub skipped: usize,
}

pub struct Ingestor {
    index: Arc<IndexManager>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    pub fn new(index: Arc<IndexManager>, chunking: ChunkingConfig) -> Self {
        Self { index, chunking }
    }

    /// Ingest one file's bytes under its declared name.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for empty input or an unsupported extension
    /// - [`RagError::Load`] when the file parses to no text
    /// - whatever [`IndexManager::add`] returns
    pub async fn ingest_bytes(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<IngestReport, RagError> {
        let file_name = base_name(file_name);
        if bytes.is_empty() {
            return Err(RagError::InvalidInput(format!("{} is empty", file_name)));
        }
        if !loader::is_supported(&file_name) {
            return Err(RagError::InvalidInput(format!(
                "unsupported file type: {} (supported: {})",
                file_name,
                loader::SUPPORTED_EXTENSIONS.join(", ")
            )));
        }

        let fingerprint = hash::fingerprint(&bytes);
        let replaced = self.index.get_file(&fingerprint).await?.is_some();

        let chunking = self.chunking.clone();
        let parse_name = file_name.clone();
        let parse_fp = fingerprint.clone();
        let chunks = tokio::task::spawn_blocking(move || {
            let docs = loader::try_load_bytes(&bytes, &parse_name, &parse_fp)?;
            if docs.is_empty() {
                return Err(RagError::Load {
                    file_name: parse_name,
                    message: "no extractable text".into(),
                });
            }
            Ok(chunk::split(&docs, &chunking))
        })
        .await
        .map_err(|e| RagError::Load {
            file_name: file_name.clone(),
            message: format!("parser task failed: {}", e),
        })??;

        let record = self.index.add(&fingerprint, &file_name, chunks).await?;

        Ok(IngestReport {
            status: "success",
            fingerprint: record.fingerprint,
            file_name: record.file_name,
            chunk_count: record.chunk_count,
            replaced,
        })
    }

    /// Ingest a file from disk.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, RagError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| RagError::Load {
            file_name: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.ingest_bytes(bytes, &path.to_string_lossy()).await
    }

    /// Ingest every supported file under `path` (recursively for directories).
    ///
    /// One file's failure is recorded and does not stop the batch.
    pub async fn ingest_path(&self, path: &Path) -> BatchReport {
        let mut report = BatchReport::default();

        for file in collect_files(path) {
            if !loader::is_supported(&file.to_string_lossy()) {
                tracing::debug!(file = %file.display(), "skipping unsupported file");
                report.skipped += 1;
                continue;
            }
            match self.ingest_file(&file).await {
                Ok(done) => report.ingested.push(done),
                Err(e) => {
                    tracing::error!(file = %file.display(), error = %e, "ingestion failed");
                    report.failed.push(FailedFile {
                        path: file.display().to_string(),
                        code: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            path = %path.display(),
            ingested = report.ingested.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "batch ingestion complete"
        );
        report
    }
}

fn collect_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!(error = %err, "walk error");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Last path component of a declared file name.
fn base_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name_strips_directories() {
        assert_eq!(base_name("/tmp/uploads/policy.pdf"), "policy.pdf");
        assert_eq!(base_name("notes.md"), "notes.md");
    }

    #[test]
    fn test_collect_files_sorted_and_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub").join("c.md"), "c").unwrap();

        let names: Vec<String> = collect_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.md"]);
    }
}
