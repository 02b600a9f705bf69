//! Vector index manager.
//!
//! [`IndexManager`] owns an [`IndexStore`] and an [`Embedder`] and exposes
//! the fingerprint-keyed operations the rest of the service uses:
//!
//! | Method | Effect |
//! |--------|--------|
//! | [`add`](IndexManager::add) | Embed chunks, then swap them in for their fingerprint and upsert the ledger row |
//! | [`delete`](IndexManager::delete) | Remove a fingerprint's entries and ledger row |
//! | [`list_files`](IndexManager::list_files) | Ledger rows, most recent first |
//! | [`retrieve`](IndexManager::retrieve) | Embed a query and return the top-k passages above a threshold |
//!
//! # Atomicity
//!
//! `add` embeds every chunk before touching the store, then hands the
//! delete/insert/upsert sequence to the store as one atomic unit. An
//! embedding failure leaves the index untouched; a write failure rolls back
//! to the previous entries and ledger row for that fingerprint.
//!
//! # Concurrency
//!
//! Writes are serialized per fingerprint through a keyed map of async
//! mutexes. Different fingerprints proceed concurrently; reads take no lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use chrono::Utc;

use crate::embedding::{embed_query, Embedder};
use crate::error::RagError;
use crate::models::{Chunk, FileRecord, RetrievedPassage};
use crate::store::{IndexEntry, IndexStore};

pub struct IndexManager {
    store: Arc<dyn IndexStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IndexManager {
    /// `batch_size` bounds the number of entries written per insert statement.
    pub fn new(store: Arc<dyn IndexStore>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            store,
            embedder,
            batch_size: batch_size.max(1),
            key_locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    fn lock_for(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds a handle to it.
    fn release_lock(&self, fingerprint: &str) {
        self.key_locks
            .remove_if(fingerprint, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Index `chunks` under `fingerprint`, replacing anything previously
    /// stored for it. Returns the new ledger row.
    ///
    /// Every chunk must carry `fingerprint`.
    pub async fn add(
        &self,
        fingerprint: &str,
        file_name: &str,
        chunks: Vec<Chunk>,
    ) -> Result<FileRecord, RagError> {
        if let Some(stray) = chunks.iter().find(|c| c.fingerprint != fingerprint) {
            return Err(RagError::InvalidInput(format!(
                "chunk {} belongs to {}, not {}",
                stray.id, stray.fingerprint, fingerprint
            )));
        }

        let lock = self.lock_for(fingerprint);
        let result = {
            let _guard = lock.lock().await;
            self.add_locked(fingerprint, file_name, chunks).await
        };
        drop(lock);
        self.release_lock(fingerprint);
        result
    }

    async fn add_locked(
        &self,
        fingerprint: &str,
        file_name: &str,
        chunks: Vec<Chunk>,
    ) -> Result<FileRecord, RagError> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed(&texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(RagError::Embedding(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                vectors.len()
            )));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let record = FileRecord {
            fingerprint: fingerprint.to_string(),
            file_name: file_name.to_string(),
            upload_time: Utc::now(),
            chunk_count: entries.len() as i64,
        };

        self.store
            .replace_file(&record, &entries, self.batch_size)
            .await
            .map_err(|e| RagError::IndexWrite(format!("{:#}", e)))?;

        tracing::info!(
            fingerprint,
            file = file_name,
            chunks = record.chunk_count,
            "indexed file"
        );
        Ok(record)
    }

    /// Remove every entry and the ledger row for `fingerprint`.
    ///
    /// Returns `false` if the fingerprint was unknown.
    pub async fn delete(&self, fingerprint: &str) -> Result<bool, RagError> {
        let lock = self.lock_for(fingerprint);
        let result = {
            let _guard = lock.lock().await;
            self.store
                .delete_file(fingerprint)
                .await
                .map_err(|e| RagError::IndexWrite(format!("{:#}", e)))
        };
        drop(lock);
        self.release_lock(fingerprint);

        if let Ok(true) = result {
            tracing::info!(fingerprint, "deleted file");
        }
        result
    }

    pub async fn get_file(&self, fingerprint: &str) -> Result<Option<FileRecord>, RagError> {
        self.store
            .get_file(fingerprint)
            .await
            .map_err(|e| RagError::Retrieval(format!("{:#}", e)))
    }

    pub async fn list_files(&self) -> Result<Vec<FileRecord>, RagError> {
        self.store
            .list_files()
            .await
            .map_err(|e| RagError::Retrieval(format!("{:#}", e)))
    }

    /// Return up to `k` passages most similar to `query`, best first.
    ///
    /// Passages scoring below `score_threshold` are excluded. Equal scores
    /// keep insertion order.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievedPassage>, RagError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let hits = self
            .store
            .vector_search(&query_vec, k)
            .await
            .map_err(|e| RagError::Retrieval(format!("{:#}", e)))?;

        let passages: Vec<RetrievedPassage> = hits
            .into_iter()
            .filter(|hit| score_threshold.map_or(true, |t| hit.score >= t))
            .enumerate()
            .map(|(rank, hit)| RetrievedPassage {
                text: hit.text,
                file_name: hit.file_name,
                fingerprint: hit.fingerprint,
                rank,
                score: hit.score,
            })
            .collect();

        tracing::debug!(k, returned = passages.len(), "retrieved passages");
        Ok(passages)
    }
}
