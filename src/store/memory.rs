//! In-memory [`IndexStore`] implementation for tests and ephemeral runs.
//!
//! Both collections live behind one `std::sync::RwLock`, so every
//! multi-step write is atomic with respect to readers. Vector search is
//! brute-force cosine similarity over all stored entries.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::FileRecord;

use super::{rank_hits, EntryHit, IndexEntry, IndexStore};

#[derive(Default)]
struct Inner {
    files: HashMap<String, FileRecord>,
    /// Insertion order is search tie-break order.
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn replace_file(
        &self,
        record: &FileRecord,
        entries: &[IndexEntry],
        batch_size: usize,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .retain(|e| e.chunk.fingerprint != record.fingerprint);
        for batch in entries.chunks(batch_size.max(1)) {
            inner.entries.extend_from_slice(batch);
        }
        inner
            .files
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn delete_file(&self, fingerprint: &str) -> Result<bool> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner
            .entries
            .retain(|e| e.chunk.fingerprint != fingerprint);
        Ok(inner.files.remove(fingerprint).is_some())
    }

    async fn get_file(&self, fingerprint: &str) -> Result<Option<FileRecord>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.files.get(fingerprint).cloned())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let mut files: Vec<FileRecord> = inner.files.values().cloned().collect();
        files.sort_by(|a, b| {
            b.upload_time
                .cmp(&a.upload_time)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(files)
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<EntryHit>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let hits = inner
            .entries
            .iter()
            .map(|entry| {
                let chunk = &entry.chunk;
                EntryHit {
                    id: chunk.id.clone(),
                    fingerprint: chunk.fingerprint.clone(),
                    file_name: chunk.file_name.clone(),
                    chunk_index: chunk.chunk_index,
                    text: chunk.text.clone(),
                    score: cosine_similarity(query_vec, &entry.embedding),
                }
            })
            .collect();
        Ok(rank_hits(hits, limit))
    }

    async fn entry_count(&self, fingerprint: Option<&str>) -> Result<i64> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let count = match fingerprint {
            Some(fp) => inner
                .entries
                .iter()
                .filter(|e| e.chunk.fingerprint == fp)
                .count(),
            None => inner.entries.len(),
        };
        Ok(count as i64)
    }
}
