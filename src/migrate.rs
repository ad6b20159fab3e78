//! Schema creation. Every statement is idempotent, so `run_migrations`
//! runs on every start.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indexes (
            name TEXT PRIMARY KEY,
            embedding_model TEXT NOT NULL,
            quality_threshold REAL NOT NULL,
            created_at INTEGER NOT NULL,
            last_reindex_at INTEGER,
            last_reindex_failures INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            source TEXT NOT NULL,
            format TEXT NOT NULL,
            category TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            body TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            failed_stage TEXT,
            failure_cause TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            index_name TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            char_len INTEGER NOT NULL,
            overlap_chars INTEGER NOT NULL DEFAULT 0,
            hash TEXT NOT NULL,
            category TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            quality_score REAL,
            quality_reasons_json TEXT NOT NULL DEFAULT '[]',
            quality_pinned INTEGER NOT NULL DEFAULT 0,
            embedding_model TEXT,
            state TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_id, ordinal),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            index_name TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS saved_queries (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            query TEXT NOT NULL,
            index_name TEXT NOT NULL,
            filter_json TEXT NOT NULL DEFAULT '{}',
            result_limit INTEGER NOT NULL,
            notes TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                index_name UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_index ON chunks(index_name, state)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(index_name, source)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_index ON chunk_vectors(index_name)")
        .execute(pool)
        .await?;

    Ok(())
}
