//! Core data models used throughout the service.
//!
//! These types represent the documents, chunks, ledger rows, conversation
//! turns, and retrieved passages that flow through the ingestion and query
//! pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a [`Document`]'s text was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentKind {
    /// One page of a PDF (1-based page number).
    Pdf { page: u32 },
    /// Plain text or markdown read as-is.
    Text,
    /// Text pulled out of a structured (OOXML word) document.
    Structured,
}

impl DocumentKind {
    pub fn page(&self) -> Option<u32> {
        match self {
            DocumentKind::Pdf { page } => Some(*page),
            DocumentKind::Text | DocumentKind::Structured => None,
        }
    }
}

/// A raw text unit produced by the loader. Immutable once created.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub kind: DocumentKind,
    pub file_name: String,
    pub fingerprint: String,
    pub ingested_at: DateTime<Utc>,
    /// Position of this unit within its source file (page index for PDFs).
    pub origin_offset: usize,
}

/// A bounded slice of a [`Document`], the unit stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub fingerprint: String,
    pub file_name: String,
    /// Contiguous per fingerprint, starting at 0.
    pub chunk_index: i64,
    /// Offset of the first character within the source document, in chars.
    pub start_index: i64,
    /// The source document's `origin_offset`.
    pub origin_offset: i64,
    pub page: Option<u32>,
    pub text: String,
}

/// Ledger row: one per distinct content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRecord {
    pub fingerprint: String,
    pub file_name: String,
    pub upload_time: DateTime<Utc>,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }
}

/// A passage returned by similarity search for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub file_name: String,
    pub fingerprint: String,
    /// 0-based position in the ranked result list.
    pub rank: usize,
    pub score: f32,
}

/// Bibliography entry; `index` matches the `[i]` marker in the answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub index: usize,
    pub file_name: String,
    pub content_preview: String,
}
