//! Vector Store Client (§4.6) — Postgres + pgvector over a pooled
//! connection. No dedicated pgvector crate is fabricated here: the `<=>`
//! cosine-distance operator is issued as raw SQL, hand-written for this
//! dialect rather than routed through a query-builder abstraction.

use chrono::Utc;
use deadpool_postgres::{Config as PgPoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use thiserror::Error;
use tokio_postgres::{types::Json, NoTls};
use uuid::Uuid;

use super::types::{Chunk, KnowledgeDocument, SearchHit, SearchOptions};

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("connection pool error: {0}")]
    Pool(String),
    #[error("query error: {0}")]
    Query(String),
}

pub struct VectorStore {
    pool: Pool,
}

impl VectorStore {
    pub async fn connect(connection_string: &str) -> Result<Self, VectorStoreError> {
        let mut config = PgPoolConfig::new();
        config.url = Some(connection_string.to_string());
        config.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| VectorStoreError::Pool(e.to_string()))?;
        Ok(Self { pool })
    }

    /// `search(query, {limit, threshold, sourceTypes?})` — caller has already
    /// embedded `query_vector`; this issues the cosine-distance query and
    /// joins back to the parent document.
    pub async fn search(
        &self,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let client = self.pool.get().await.map_err(|e| VectorStoreError::Pool(e.to_string()))?;
        let vector_literal = vector_to_sql(query_vector);

        let mut sql = String::from(
            "SELECT c.id, c.document_id, d.title, d.source_url, d.source_type, c.chunk_text, \
             1 - (c.vector <=> $1::vector) AS similarity \
             FROM chunks c JOIN knowledge_documents d ON d.id = c.document_id \
             WHERE 1 - (c.vector <=> $1::vector) > $2",
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            vec![&vector_literal, &options.threshold];

        if let Some(types) = &options.source_types {
            sql.push_str(" AND d.source_type = ANY($3)");
            params.push(types);
        }
        sql.push_str(" ORDER BY similarity DESC LIMIT $");
        sql.push_str(&(params.len() + 1).to_string());
        let limit = options.limit as i64;
        params.push(&limit);

        let rows = client
            .query(sql.as_str(), &params)
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| SearchHit {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                document_title: row.get("title"),
                document_url: row.get("source_url"),
                source_type: row.get("source_type"),
                text: row.get("chunk_text"),
                similarity: row.get::<_, f64>("similarity") as f32,
            })
            .collect())
    }

    /// `hybridSearch` — vector score (weight 0.7) plus a constant keyword
    /// boost (weight 0.3) when the chunk text contains the raw query
    /// substring (§4.5 and Open Question (b): no BM25-like weighting).
    pub async fn hybrid_search(
        &self,
        query: &str,
        query_vector: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        const VECTOR_WEIGHT: f32 = 0.7;
        const KEYWORD_WEIGHT: f32 = 0.3;

        let mut hits = self.search(query_vector, &SearchOptions { threshold: 0.0, ..options.clone() }).await?;
        let needle = query.to_lowercase();
        for hit in hits.iter_mut() {
            let keyword_boost = if hit.text.to_lowercase().contains(&needle) { 1.0 } else { 0.0 };
            hit.similarity = VECTOR_WEIGHT * hit.similarity + KEYWORD_WEIGHT * keyword_boost;
        }
        hits.retain(|h| h.similarity > options.threshold);
        hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(options.limit);
        Ok(hits)
    }

    /// `findSimilarDocuments` — the document's centroid (average of its
    /// chunk vectors), searched across other documents' chunks.
    pub async fn find_similar_documents(
        &self,
        document_id: Uuid,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let client = self.pool.get().await.map_err(|e| VectorStoreError::Pool(e.to_string()))?;
        let rows = client
            .query("SELECT vector FROM chunks WHERE document_id = $1", &[&document_id])
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let vectors: Vec<Vec<f32>> = rows.iter().map(|r| r.get::<_, Vec<f32>>("vector")).collect();
        let centroid = centroid_of(&vectors);

        let mut hits = self.search(&centroid, options).await?;
        hits.retain(|h| h.document_id != document_id);
        Ok(hits)
    }

    /// Transactional re-ingest: deletes the existing source's chunks (if
    /// any), inserts the document and the fresh chunk set, all in one
    /// transaction (§4.6, §8 re-ingest invariant).
    pub async fn ingest_document(
        &self,
        document: &KnowledgeDocument,
        chunks: &[Chunk],
    ) -> Result<(), VectorStoreError> {
        let mut client = self.pool.get().await.map_err(|e| VectorStoreError::Pool(e.to_string()))?;
        let tx = client.transaction().await.map_err(|e| VectorStoreError::Query(e.to_string()))?;

        tx.execute(
            "INSERT INTO knowledge_documents (id, source_url, source_type, title, content, metadata, last_indexed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (source_url) DO UPDATE SET \
               title = EXCLUDED.title, content = EXCLUDED.content, metadata = EXCLUDED.metadata, \
               last_indexed_at = EXCLUDED.last_indexed_at \
             RETURNING id",
            &[
                &document.id,
                &document.source_url,
                &document.source_type,
                &document.title,
                &document.content,
                &Json(&document.metadata),
                &Utc::now(),
            ],
        )
        .await
        .map_err(|e| VectorStoreError::Query(e.to_string()))?;

        tx.execute("DELETE FROM chunks WHERE document_id = $1", &[&document.id])
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;

        for chunk in chunks {
            let vector_literal = vector_to_sql(&chunk.vector);
            tx.execute(
                "INSERT INTO chunks (id, document_id, chunk_index, chunk_text, start_offset, end_offset, \
                 character_count, vector, embedding_model) VALUES ($1, $2, $3, $4, $5, $6, $7, $8::vector, $9)",
                &[
                    &chunk.id,
                    &chunk.document_id,
                    &(chunk.chunk_index as i32),
                    &chunk.text,
                    &(chunk.start_offset as i32),
                    &(chunk.end_offset as i32),
                    &(chunk.character_count as i32),
                    &vector_literal,
                    &chunk.embedding_model,
                ],
            )
            .await
            .map_err(|e| VectorStoreError::Query(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| VectorStoreError::Query(e.to_string()))?;
        Ok(())
    }
}

fn vector_to_sql(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// Pure cosine similarity, used wherever a similarity must be computed
/// in-process rather than delegated to pgvector (e.g. grounding's
/// `sourceRelevance` signal, tests).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for i in 0..a.len() {
        dot += a[i] as f64 * b[i] as f64;
        norm_a += (a[i] as f64).powi(2);
        norm_b += (b[i] as f64).powi(2);
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dot / denom) as f32
    }
}

fn centroid_of(vectors: &[Vec<f32>]) -> Vec<f32> {
    let dim = vectors[0].len();
    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        for (i, x) in v.iter().enumerate() {
            sum[i] += x;
        }
    }
    let n = vectors.len() as f32;
    sum.iter().map(|x| x / n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_literal_formats_as_pgvector_array_syntax() {
        assert_eq!(vector_to_sql(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
    }

    #[test]
    fn centroid_is_elementwise_mean() {
        let vectors = vec![vec![1.0, 1.0], vec![3.0, 5.0]];
        assert_eq!(centroid_of(&vectors), vec![2.0, 3.0]);
    }

    #[test]
    fn cosine_similarity_is_symmetric_and_bounded() {
        let a = vec![1.0, 0.0, 0.3];
        let b = vec![0.2, 0.9, -0.1];
        let sim_ab = cosine_similarity(&a, &b);
        let sim_ba = cosine_similarity(&b, &a);
        assert!((sim_ab - sim_ba).abs() < 1e-6);
        assert!(sim_ab >= -1.0 && sim_ab <= 1.0);
    }

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }
}
