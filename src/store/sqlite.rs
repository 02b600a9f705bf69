//! SQLite-backed [`IndexStore`] implementation.
//!
//! Schema (created by [`crate::migrate::run_migrations`]):
//!
//! - `files(fingerprint PK, file_name, upload_time, chunk_count)` is the ledger.
//!   `upload_time` is Unix milliseconds.
//! - `entries(seq, id, fingerprint, file_name, chunk_index, start_index,
//!   origin_offset, page, text, embedding)` holds one row per chunk. `seq` is an
//!   autoincrement column; vector search breaks score ties by it.
//!
//! [`replace_file`](IndexStore::replace_file) runs delete, batched insert,
//! and ledger upsert inside one transaction. A failure at any step rolls
//! back to the previous state of that fingerprint.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::FileRecord;

use super::{rank_hits, EntryHit, IndexEntry, IndexStore};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    FileRecord {
        fingerprint: row.get("fingerprint"),
        file_name: row.get("file_name"),
        upload_time: millis_to_utc(row.get("upload_time")),
        chunk_count: row.get("chunk_count"),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn replace_file(
        &self,
        record: &FileRecord,
        entries: &[IndexEntry],
        batch_size: usize,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entries WHERE fingerprint = ?")
            .bind(&record.fingerprint)
            .execute(&mut *tx)
            .await
            .context("delete previous entries")?;

        for (batch_no, batch) in entries.chunks(batch_size.max(1)).enumerate() {
            let blobs: Vec<Vec<u8>> = batch.iter().map(|e| vec_to_blob(&e.embedding)).collect();

            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO entries (id, fingerprint, file_name, chunk_index, start_index, origin_offset, page, text, embedding) ",
            );
            qb.push_values(batch.iter().zip(blobs.iter()), |mut b, (entry, blob)| {
                let chunk = &entry.chunk;
                b.push_bind(&chunk.id)
                    .push_bind(&chunk.fingerprint)
                    .push_bind(&chunk.file_name)
                    .push_bind(chunk.chunk_index)
                    .push_bind(chunk.start_index)
                    .push_bind(chunk.origin_offset)
                    .push_bind(chunk.page.map(i64::from))
                    .push_bind(&chunk.text)
                    .push_bind(blob);
            });
            qb.build()
                .execute(&mut *tx)
                .await
                .with_context(|| format!("insert batch {}", batch_no))?;
        }

        sqlx::query(
            r#"
            INSERT INTO files (fingerprint, file_name, upload_time, chunk_count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                file_name = excluded.file_name,
                upload_time = excluded.upload_time,
                chunk_count = excluded.chunk_count
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.file_name)
        .bind(record.upload_time.timestamp_millis())
        .bind(record.chunk_count)
        .execute(&mut *tx)
        .await
        .context("upsert ledger row")?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_file(&self, fingerprint: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM entries WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM files WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(removed > 0)
    }

    async fn get_file(&self, fingerprint: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT fingerprint, file_name, upload_time, chunk_count FROM files WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT fingerprint, file_name, upload_time, chunk_count
            FROM files
            ORDER BY upload_time DESC, fingerprint ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn vector_search(&self, query_vec: &[f32], limit: usize) -> Result<Vec<EntryHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, fingerprint, file_name, chunk_index, text, embedding
            FROM entries
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let hits: Vec<EntryHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                EntryHit {
                    id: row.get("id"),
                    fingerprint: row.get("fingerprint"),
                    file_name: row.get("file_name"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank_hits(hits, limit))
    }

    async fn entry_count(&self, fingerprint: Option<&str>) -> Result<i64> {
        let count: i64 = match fingerprint {
            Some(fp) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE fingerprint = ?")
                    .bind(fp)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM entries")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }
}
