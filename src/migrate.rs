use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Ledger: one row per distinct content fingerprint
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            fingerprint TEXT PRIMARY KEY,
            file_name TEXT NOT NULL,
            upload_time INTEGER NOT NULL,
            chunk_count INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector index entries
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            fingerprint TEXT NOT NULL,
            file_name TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_index INTEGER NOT NULL,
            origin_offset INTEGER NOT NULL,
            page INTEGER,
            text TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_fingerprint ON entries(fingerprint)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_upload_time ON files(upload_time DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
