//! Storage abstraction for the vector index and its file ledger.
//!
//! The [`IndexStore`] trait holds two collections that must stay in step:
//!
//! - **entries**: one row per chunk, carrying the chunk text, provenance,
//!   and embedding vector, tagged with the source file's fingerprint.
//! - **files**: the ledger, one [`FileRecord`] per distinct fingerprint.
//!
//! Every write that touches both collections is a single atomic unit in
//! each backend, so a reader never observes a ledger row whose entries are
//! missing or entries whose ledger row is gone.
//!
//! Backends:
//!
//! | Type | Persistence | Used by |
//! |------|-------------|---------|
//! | [`SqliteStore`] | SQLite file (WAL) | CLI and server |
//! | [`InMemoryStore`] | process memory | tests, ephemeral runs |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, FileRecord};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A chunk paired with its embedding, ready to be written.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A stored entry scored against a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryHit {
    pub id: String,
    pub fingerprint: String,
    pub file_name: String,
    pub chunk_index: i64,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Abstract storage backend for the index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_file`](IndexStore::replace_file) | Atomically swap a fingerprint's entries and upsert its ledger row |
/// | [`delete_file`](IndexStore::delete_file) | Remove a fingerprint's entries and ledger row together |
/// | [`get_file`](IndexStore::get_file) | Look up one ledger row |
/// | [`list_files`](IndexStore::list_files) | All ledger rows, most recent upload first |
/// | [`vector_search`](IndexStore::vector_search) | Cosine similarity search over all entries |
/// | [`entry_count`](IndexStore::entry_count) | Count entries, optionally for one fingerprint |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Delete every entry for `record.fingerprint`, insert `entries` in
    /// batches of `batch_size`, then upsert `record`. All or nothing.
    async fn replace_file(
        &self,
        record: &FileRecord,
        entries: &[IndexEntry],
        batch_size: usize,
    ) -> Result<()>;

    /// Returns `false` when the fingerprint was not in the ledger.
    async fn delete_file(&self, fingerprint: &str) -> Result<bool>;

    async fn get_file(&self, fingerprint: &str) -> Result<Option<FileRecord>>;

    /// Ordered by upload time descending, then fingerprint.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    /// Up to `limit` entries by descending similarity. Equal scores keep
    /// insertion order.
    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<EntryHit>>;

    async fn entry_count(&self, fingerprint: Option<&str>) -> Result<i64>;
}

/// Sort hits by descending score, stable over insertion order, and keep `limit`.
pub(crate) fn rank_hits(mut hits: Vec<EntryHit>, limit: usize) -> Vec<EntryHit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
