//! File → [`Document`] conversion.
//!
//! Dispatches on the lowercase file extension:
//!
//! | Extension | Kind | Units |
//! |-----------|------|-------|
//! | `.pdf` | [`DocumentKind::Pdf`] | one per non-empty page |
//! | `.docx` | [`DocumentKind::Structured`] | one |
//! | `.txt`, `.md` | [`DocumentKind::Text`] | one |
//!
//! Unsupported extensions produce no documents and a warning. Parse failures
//! are reported as [`RagError::Load`] by [`try_load_bytes`]; [`load`] and
//! [`load_bytes`] log them and return an empty sequence so that one bad file
//! never aborts a batch.

use chrono::Utc;
use std::path::Path;

use crate::error::RagError;
use crate::extract;
use crate::hash;
use crate::models::{Document, DocumentKind};

/// Extensions accepted by the loader, lowercase, without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md"];

/// Lowercase extension of `file_name`, if any.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(file_name: &str) -> bool {
    extension_of(file_name)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Read and parse the file at `path`. Never fails; see module docs.
pub fn load(path: &Path) -> Vec<Document> {
    let file_name = display_name(path);
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(file = %path.display(), error = %e, "failed to read file");
            return Vec::new();
        }
    };
    let fingerprint = hash::fingerprint(&bytes);
    load_bytes(&bytes, &file_name, &fingerprint)
}

/// Parse in-memory bytes. Never fails; see module docs.
pub fn load_bytes(bytes: &[u8], file_name: &str, fingerprint: &str) -> Vec<Document> {
    match try_load_bytes(bytes, file_name, fingerprint) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::error!(file = file_name, error = %e, "failed to parse file");
            Vec::new()
        }
    }
}

/// Parse in-memory bytes, surfacing parse failures as [`RagError::Load`].
///
/// Unsupported extensions are not an error: they yield `Ok(vec![])`.
pub fn try_load_bytes(
    bytes: &[u8],
    file_name: &str,
    fingerprint: &str,
) -> Result<Vec<Document>, RagError> {
    let load_err = |message: String| RagError::Load {
        file_name: file_name.to_string(),
        message,
    };

    let ext = extension_of(file_name).unwrap_or_default();
    let units: Vec<(DocumentKind, String)> = match ext.as_str() {
        "pdf" => extract::extract_pdf_pages(bytes)
            .map_err(|e| load_err(e.to_string()))?
            .into_iter()
            .enumerate()
            .map(|(i, text)| (DocumentKind::Pdf { page: i as u32 + 1 }, text))
            .collect(),
        "docx" => {
            let text = extract::extract_docx(bytes).map_err(|e| load_err(e.to_string()))?;
            vec![(DocumentKind::Structured, text)]
        }
        "txt" | "md" => vec![(
            DocumentKind::Text,
            String::from_utf8_lossy(bytes).into_owned(),
        )],
        _ => {
            tracing::warn!(file = file_name, extension = %ext, "unsupported file type, skipping");
            return Ok(Vec::new());
        }
    };

    let ingested_at = Utc::now();
    let docs = units
        .into_iter()
        .enumerate()
        .filter(|(_, (_, text))| !text.trim().is_empty())
        .map(|(offset, (kind, text))| Document {
            text,
            kind,
            file_name: file_name.to_string(),
            fingerprint: fingerprint.to_string(),
            ingested_at,
            origin_offset: offset,
        })
        .collect::<Vec<_>>();

    tracing::debug!(file = file_name, units = docs.len(), "loaded document");
    Ok(docs)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
