//! SQLite-backed [`Store`] implementation.
//!
//! Chunks live in `chunks`, their lexical entries in the FTS5 table
//! `chunks_fts`, and their vectors as little-endian f32 BLOBs in
//! `chunk_vectors`. Every multi-table write runs in one transaction, so a
//! chunk and its vector and lexical entry appear and disappear together.
//!
//! Any sqlx failure surfaces as [`EngineError::IndexDegraded`]. Lexical
//! search uses FTS5 BM25 ranking; vector search is brute-force cosine
//! similarity over the matching rows.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};

use knowledge_engine_core::embedding::{blob_to_vec, cosine_similarity, tokenize, vec_to_blob};
use knowledge_engine_core::error::{EngineError, EngineResult};
use knowledge_engine_core::models::{
    now_ts, Chunk, ChunkPatch, Document, DocumentFormat, DocumentStatus, IndexConfig,
    IndexRecord, IndexStats, SavedQuery, StageFailure,
};
use knowledge_engine_core::query::{
    ChunkFilter, ChunkPage, ChunkQuery, ExactField, Predicate, RangeField, SortDirection,
    SortField,
};
use knowledge_engine_core::store::{
    sample_label, snippet, ChunkCandidate, ChunkWrite, Store, VectorSample,
};

const SNIPPET_CHARS: usize = 240;
const STORE_NAME: &str = "sqlite";

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.index_name, c.ordinal, c.text, c.char_len, \
     c.overlap_chars, c.hash, c.category, c.tags_json, c.quality_score, c.quality_reasons_json, \
     c.quality_pinned, c.embedding_model, c.state, c.created_at, c.updated_at";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> EngineError {
    EngineError::degraded(STORE_NAME, e.to_string())
}

fn to_json(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

fn from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn row_to_chunk(row: &SqliteRow, embedding: Option<Vec<f32>>) -> EngineResult<Chunk> {
    let state: String = row.get("state");
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        index: row.get("index_name"),
        ordinal: row.get("ordinal"),
        text: row.get("text"),
        char_len: row.get("char_len"),
        overlap_chars: row.get("overlap_chars"),
        hash: row.get("hash"),
        category: row.get("category"),
        tags: from_json(&row.get::<String, _>("tags_json")),
        quality_score: row.get("quality_score"),
        quality_reasons: from_json(&row.get::<String, _>("quality_reasons_json")),
        quality_pinned: row.get("quality_pinned"),
        embedding,
        embedding_model: row.get("embedding_model"),
        state: state.parse()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_document(row: &SqliteRow) -> EngineResult<Document> {
    let format: String = row.get("format");
    let status: String = row.get("status");
    let failed_stage: Option<String> = row.get("failed_stage");
    let failure = match failed_stage {
        Some(stage) => Some(StageFailure {
            stage: stage.parse()?,
            cause: row
                .get::<Option<String>, _>("failure_cause")
                .unwrap_or_default(),
        }),
        None => None,
    };
    Ok(Document {
        id: row.get("id"),
        index: row.get("index_name"),
        source: row.get("source"),
        format: format.parse::<DocumentFormat>()?,
        category: row.get("category"),
        tags: from_json(&row.get::<String, _>("tags_json")),
        body: row.get("body"),
        content_hash: row.get("content_hash"),
        created_at: row.get("created_at"),
        status: status.parse()?,
        failure,
    })
}

fn row_to_index(row: &SqliteRow) -> IndexRecord {
    IndexRecord {
        config: IndexConfig {
            name: row.get("name"),
            embedding_model: row.get("embedding_model"),
            quality_threshold: row.get("quality_threshold"),
        },
        created_at: row.get("created_at"),
        last_reindex_at: row.get("last_reindex_at"),
        last_reindex_failures: row.get::<i64, _>("last_reindex_failures").max(0) as u64,
    }
}

fn row_to_saved_query(row: &SqliteRow) -> EngineResult<SavedQuery> {
    let filter_json: String = row.get("filter_json");
    Ok(SavedQuery {
        id: row.get("id"),
        name: row.get("name"),
        query: row.get("query"),
        index: row.get("index_name"),
        filter: ChunkFilter::from_json(&filter_json)?,
        limit: row.get::<i64, _>("result_limit").max(0) as usize,
        notes: row.get("notes"),
        created_at: row.get("created_at"),
    })
}

fn row_to_candidate(row: &SqliteRow, raw_score: f64) -> ChunkCandidate {
    let text: String = row.get("text");
    ChunkCandidate {
        chunk_id: row.get("id"),
        document_id: row.get("document_id"),
        ordinal: row.get("ordinal"),
        raw_score,
        snippet: snippet(&text, SNIPPET_CHARS),
        category: row.get("category"),
        quality_score: row.get("quality_score"),
    }
}

/// Append the filter's predicates as `AND` clauses over alias `c`.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ChunkFilter) {
    for predicate in filter.predicates() {
        match predicate {
            Predicate::Exact { field, value } => {
                match field {
                    ExactField::Category => qb.push(" AND c.category = ").push_bind(value),
                    ExactField::DocumentId => qb.push(" AND c.document_id = ").push_bind(value),
                    ExactField::Tag => qb
                        .push(" AND EXISTS (SELECT 1 FROM json_each(c.tags_json) WHERE json_each.value = ")
                        .push_bind(value)
                        .push(")"),
                };
            }
            Predicate::Range { field, min, max } => {
                let column = match field {
                    RangeField::QualityScore => "c.quality_score",
                };
                qb.push(format!(" AND {} IS NOT NULL", column));
                if let Some(min) = min {
                    qb.push(format!(" AND {} >= ", column)).push_bind(min);
                }
                if let Some(max) = max {
                    qb.push(format!(" AND {} <= ", column)).push_bind(max);
                }
            }
        }
    }
}

fn order_clause(field: SortField, direction: SortDirection) -> String {
    let dir = match direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    let primary = match field {
        SortField::Ordinal => format!("c.document_id {dir}, c.ordinal {dir}"),
        SortField::QualityScore => format!("c.quality_score {dir}"),
        SortField::CreatedAt => format!("c.created_at {dir}"),
        SortField::UpdatedAt => format!("c.updated_at {dir}"),
        SortField::Length => format!("c.char_len {dir}"),
        SortField::Category => format!("c.category {dir}"),
    };
    format!(" ORDER BY {}, c.id ASC", primary)
}

/// FTS5 MATCH expression: every token quoted, joined with OR.
fn fts_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = tokenize(query).collect();
    terms.sort();
    terms.dedup();
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn rank(mut candidates: Vec<ChunkCandidate>, limit: usize) -> Vec<ChunkCandidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    candidates
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_index(&self, config: &IndexConfig) -> EngineResult<IndexRecord> {
        config.validate()?;
        sqlx::query(
            r#"
            INSERT INTO indexes (name, embedding_model, quality_threshold, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                embedding_model = excluded.embedding_model,
                quality_threshold = excluded.quality_threshold
            "#,
        )
        .bind(&config.name)
        .bind(&config.embedding_model)
        .bind(config.quality_threshold)
        .bind(now_ts())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.get_index(&config.name)
            .await?
            .ok_or_else(|| EngineError::internal(&config.name, "index vanished after upsert"))
    }

    async fn get_index(&self, name: &str) -> EngineResult<Option<IndexRecord>> {
        let row = sqlx::query("SELECT * FROM indexes WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(row_to_index))
    }

    async fn list_indexes(&self) -> EngineResult<Vec<IndexRecord>> {
        let rows = sqlx::query("SELECT * FROM indexes ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(row_to_index).collect())
    }

    async fn record_reindex(&self, name: &str, at: i64, failures: u64) -> EngineResult<()> {
        sqlx::query(
            "UPDATE indexes SET last_reindex_at = ?, last_reindex_failures = ? WHERE name = ?",
        )
        .bind(at)
        .bind(failures as i64)
        .bind(name)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn insert_document(&self, doc: &Document) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, index_name, source, format, category, tags_json, body,
                                   content_hash, created_at, status, failed_stage, failure_cause)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.index)
        .bind(&doc.source)
        .bind(doc.format.as_str())
        .bind(&doc.category)
        .bind(to_json(&doc.tags))
        .bind(&doc.body)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .bind(doc.status.as_str())
        .bind(doc.failure.as_ref().map(|f| f.stage.as_str()))
        .bind(doc.failure.as_ref().map(|f| f.cause.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> EngineResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn find_document_by_source(
        &self,
        index: &str,
        source: &str,
    ) -> EngineResult<Option<Document>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM documents
            WHERE index_name = ? AND source = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(index)
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn set_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        failure: Option<&StageFailure>,
    ) -> EngineResult<()> {
        sqlx::query(
            "UPDATE documents SET status = ?, failed_stage = ?, failure_cause = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(failure.map(|f| f.stage.as_str()))
        .bind(failure.map(|f| f.cause.as_str()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            "DELETE FROM chunks_fts WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(deleted > 0)
    }

    async fn insert_chunks(&self, chunks: &[Chunk]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        for chunk in chunks {
            let doc_exists: bool =
                sqlx::query_scalar("SELECT COUNT(*) > 0 FROM documents WHERE id = ?")
                    .bind(&chunk.document_id)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if !doc_exists {
                return Err(EngineError::invalid_document(
                    &chunk.document_id,
                    "chunk references a missing document",
                ));
            }

            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, index_name, ordinal, text, char_len,
                                    overlap_chars, hash, category, tags_json, quality_score,
                                    quality_reasons_json, quality_pinned, embedding_model, state,
                                    created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.index)
            .bind(chunk.ordinal)
            .bind(&chunk.text)
            .bind(chunk.char_len)
            .bind(chunk.overlap_chars)
            .bind(&chunk.hash)
            .bind(&chunk.category)
            .bind(to_json(&chunk.tags))
            .bind(chunk.quality_score)
            .bind(to_json(&chunk.quality_reasons))
            .bind(chunk.quality_pinned)
            .bind(&chunk.embedding_model)
            .bind(chunk.state.as_str())
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, index_name, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.index)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

            if let Some(vec) = &chunk.embedding {
                sqlx::query(
                    "INSERT INTO chunk_vectors (chunk_id, index_name, dims, embedding) VALUES (?, ?, ?, ?)",
                )
                .bind(&chunk.id)
                .bind(&chunk.index)
                .bind(vec.len() as i64)
                .bind(vec_to_blob(vec))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> EngineResult<Option<Chunk>> {
        let sql = format!(
            "SELECT {}, v.embedding FROM chunks c LEFT JOIN chunk_vectors v ON v.chunk_id = c.id WHERE c.id = ?",
            CHUNK_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let blob: Option<Vec<u8>> = row.get("embedding");
                row_to_chunk(&row, blob.map(|b| blob_to_vec(&b))).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list_chunks(&self, index: &str, query: &ChunkQuery) -> EngineResult<ChunkPage> {
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM chunks c WHERE c.index_name = ");
        count_qb.push_bind(index);
        push_filter(&mut count_qb, &query.filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM chunks c WHERE c.index_name = ",
            CHUNK_COLUMNS
        ));
        qb.push_bind(index);
        push_filter(&mut qb, &query.filter);
        qb.push(order_clause(query.sort.field, query.sort.direction));
        qb.push(" LIMIT ")
            .push_bind(query.page.limit as i64)
            .push(" OFFSET ")
            .push_bind(query.page.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        let items = rows
            .iter()
            .map(|r| row_to_chunk(r, None))
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(ChunkPage {
            items,
            total: total.max(0) as u64,
            offset: query.page.offset,
            limit: query.page.limit,
        })
    }

    async fn chunks_for_index(&self, index: &str) -> EngineResult<Vec<Chunk>> {
        let sql = format!(
            "SELECT {} FROM chunks c WHERE c.index_name = ? ORDER BY c.document_id ASC, c.ordinal ASC",
            CHUNK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(index)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(|r| row_to_chunk(r, None)).collect()
    }

    async fn chunk_ids(&self, index: &str) -> EngineResult<Vec<String>> {
        sqlx::query_scalar(
            "SELECT id FROM chunks WHERE index_name = ? ORDER BY document_id ASC, ordinal ASC",
        )
        .bind(index)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn patch_chunk(
        &self,
        id: &str,
        patch: &ChunkPatch,
        at: i64,
    ) -> EngineResult<Option<Chunk>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE chunks SET updated_at = ");
        qb.push_bind(at);
        if let Some(tags) = &patch.tags {
            qb.push(", tags_json = ").push_bind(to_json(tags));
        }
        if let Some(category) = &patch.category {
            qb.push(", category = ").push_bind(category.clone());
        }
        if let Some(score) = patch.quality_score {
            qb.push(", quality_score = ")
                .push_bind(score)
                .push(", quality_reasons_json = ")
                .push_bind(to_json(&["manual override".to_string()]))
                .push(", quality_pinned = 1");
        }
        qb.push(" WHERE id = ").push_bind(id);

        let updated = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        if updated == 0 {
            return Ok(None);
        }
        self.get_chunk(id).await
    }

    async fn write_chunk_result(&self, write: &ChunkWrite) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE chunks SET embedding_model = ");
        qb.push_bind(write.embedding_model.clone())
            .push(", state = ")
            .push_bind(write.state.as_str())
            .push(", updated_at = ")
            .push_bind(write.updated_at);
        if let Some(verdict) = &write.verdict {
            qb.push(", quality_score = ")
                .push_bind(verdict.score)
                .push(", quality_reasons_json = ")
                .push_bind(to_json(&verdict.reasons))
                .push(", quality_pinned = 0");
        }
        qb.push(" WHERE id = ").push_bind(write.chunk_id.clone());

        let updated = qb
            .build()
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        if updated == 0 {
            tx.rollback().await.map_err(db_err)?;
            return Ok(false);
        }

        match &write.embedding {
            Some(vec) => {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, index_name, dims, embedding)
                    SELECT id, index_name, ?, ? FROM chunks WHERE id = ?
                    ON CONFLICT(chunk_id) DO UPDATE SET
                        dims = excluded.dims,
                        embedding = excluded.embedding
                    "#,
                )
                .bind(vec.len() as i64)
                .bind(vec_to_blob(vec))
                .bind(&write.chunk_id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            }
            None => {
                sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
                    .bind(&write.chunk_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn delete_chunk(&self, id: &str) -> EngineResult<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let deleted = sqlx::query("DELETE FROM chunks WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        tx.commit().await.map_err(db_err)?;
        Ok(deleted > 0)
    }

    async fn commit_document(&self, document_id: &str) -> EngineResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("UPDATE chunks SET state = 'indexed' WHERE document_id = ? AND state = 'pending'")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query(
            "UPDATE documents SET status = 'stored', failed_stage = NULL, failure_cause = NULL WHERE id = ?",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn promote_document(&self, document_id: &str) -> EngineResult<bool> {
        let promoted = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'stored', failed_stage = NULL, failure_cause = NULL
            WHERE id = ?
              AND status = 'failed'
              AND failed_stage = 'embedding'
              AND NOT EXISTS (
                  SELECT 1 FROM chunks WHERE document_id = ? AND state != 'indexed'
              )
            "#,
        )
        .bind(document_id)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?
        .rows_affected();
        Ok(promoted > 0)
    }

    async fn clear_index(&self, index: &str) -> EngineResult<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE index_name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM chunks_fts WHERE index_name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let removed = sqlx::query("DELETE FROM chunks WHERE index_name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        sqlx::query("DELETE FROM documents WHERE index_name = ?")
            .bind(index)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    async fn index_stats(&self, index: &str) -> EngineResult<IndexStats> {
        let docs = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                   MAX(created_at) AS newest
            FROM documents WHERE index_name = ?
            "#,
        )
        .bind(index)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let chunks = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   SUM(CASE WHEN state = 'indexed' THEN 1 ELSE 0 END) AS indexed,
                   SUM(CASE WHEN state = 'unembedded' THEN 1 ELSE 0 END) AS unembedded,
                   COUNT(quality_score) AS scored,
                   AVG(quality_score) AS average_quality,
                   MAX(updated_at) AS newest
            FROM chunks WHERE index_name = ?
            "#,
        )
        .bind(index)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        let embedded: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE index_name = ?")
                .bind(index)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        let last_reindex_at: Option<i64> =
            sqlx::query_scalar("SELECT last_reindex_at FROM indexes WHERE name = ?")
                .bind(index)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?
                .flatten();

        let count = |row: &SqliteRow, col: &str| -> u64 {
            row.get::<Option<i64>, _>(col).unwrap_or(0).max(0) as u64
        };
        let newest_doc: Option<i64> = docs.get("newest");
        let newest_chunk: Option<i64> = chunks.get("newest");

        Ok(IndexStats {
            index: index.to_string(),
            document_count: count(&docs, "total"),
            failed_document_count: count(&docs, "failed"),
            chunk_count: count(&chunks, "total"),
            indexed_count: count(&chunks, "indexed"),
            unembedded_count: count(&chunks, "unembedded"),
            embedded_count: embedded.max(0) as u64,
            scored_count: count(&chunks, "scored"),
            average_quality: chunks.get("average_quality"),
            last_updated_at: newest_doc.max(newest_chunk),
            last_reindex_at,
        })
    }

    async fn lexical_search(
        &self,
        index: &str,
        query: &str,
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.document_id, c.ordinal, c.text, c.category, c.quality_score,
                   bm25(chunks_fts) AS bm25_rank
            FROM chunks_fts
            JOIN chunks c ON c.id = chunks_fts.chunk_id
            WHERE chunks_fts MATCH "#,
        );
        qb.push_bind(match_expr)
            .push(" AND c.index_name = ")
            .push_bind(index)
            .push(" AND c.state = 'indexed'");
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY bm25_rank ASC, c.id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        Ok(rows
            .iter()
            .map(|row| {
                let bm25: f64 = row.get("bm25_rank");
                row_to_candidate(row, -bm25)
            })
            .collect())
    }

    async fn vector_search(
        &self,
        index: &str,
        query_vec: &[f32],
        limit: usize,
        filter: &ChunkFilter,
    ) -> EngineResult<Vec<ChunkCandidate>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT c.id, c.document_id, c.ordinal, c.text, c.category, c.quality_score,
                   v.embedding
            FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            WHERE c.index_name = "#,
        );
        qb.push_bind(index).push(" AND c.state = 'indexed'");
        push_filter(&mut qb, filter);

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        let candidates = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                row_to_candidate(row, similarity)
            })
            .collect();
        Ok(rank(candidates, limit))
    }

    async fn vector_count(&self, index: &str) -> EngineResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            WHERE c.index_name = ? AND c.state = 'indexed'
            "#,
        )
        .bind(index)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count.max(0) as u64)
    }

    async fn sample_vectors(&self, index: &str, limit: usize) -> EngineResult<Vec<VectorSample>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.category, v.embedding
            FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            WHERE c.index_name = ? AND c.state = 'indexed'
            ORDER BY c.id ASC
            LIMIT ?
            "#,
        )
        .bind(index)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .iter()
            .map(|row| {
                let category: Option<String> = row.get("category");
                let blob: Vec<u8> = row.get("embedding");
                VectorSample {
                    chunk_id: row.get("id"),
                    label: sample_label(category.as_deref()),
                    vector: blob_to_vec(&blob),
                }
            })
            .collect())
    }

    async fn insert_saved_query(&self, query: &SavedQuery) -> EngineResult<()> {
        let filter_json = serde_json::to_string(&query.filter)
            .map_err(|e| EngineError::internal(&query.id, e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO saved_queries (id, name, query, index_name, filter_json, result_limit,
                                       notes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&query.id)
        .bind(&query.name)
        .bind(&query.query)
        .bind(&query.index)
        .bind(filter_json)
        .bind(query.limit as i64)
        .bind(&query.notes)
        .bind(query.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(EngineError::Query(
                format!("a saved query named '{}' already exists", query.name),
            )),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_saved_query(&self, id_or_name: &str) -> EngineResult<Option<SavedQuery>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM saved_queries
            WHERE id = ? OR name = ?
            ORDER BY CASE WHEN id = ? THEN 0 ELSE 1 END
            LIMIT 1
            "#,
        )
        .bind(id_or_name)
        .bind(id_or_name)
        .bind(id_or_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(row_to_saved_query).transpose()
    }

    async fn list_saved_queries(&self, index: Option<&str>) -> EngineResult<Vec<SavedQuery>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM saved_queries");
        if let Some(index) = index {
            qb.push(" WHERE index_name = ").push_bind(index);
        }
        qb.push(" ORDER BY name ASC");
        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(row_to_saved_query).collect()
    }

    async fn delete_saved_query(&self, id: &str) -> EngineResult<bool> {
        let deleted = sqlx::query("DELETE FROM saved_queries WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fts_query_quotes_terms() {
        assert_eq!(
            fts_query("Reset PASSWORD reset").as_deref(),
            Some("\"password\" OR \"reset\"")
        );
        assert_eq!(fts_query("  ?? "), None);
    }

    #[test]
    fn test_order_clause_breaks_ties_on_id() {
        let clause = order_clause(SortField::QualityScore, SortDirection::Desc);
        assert_eq!(clause, " ORDER BY c.quality_score DESC, c.id ASC");
        let clause = order_clause(SortField::Ordinal, SortDirection::Asc);
        assert!(clause.starts_with(" ORDER BY c.document_id ASC, c.ordinal ASC"));
    }
}
