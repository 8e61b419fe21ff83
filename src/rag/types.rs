//! RAG data model (§3 `KnowledgeDocument`, `Chunk`) — exported to TypeScript
//! via ts-rs for the mobile client the same way the rest of this crate's
//! wire types are.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../shared/generated/rag/KnowledgeDocument.ts")]
pub struct KnowledgeDocument {
    #[ts(type = "string")]
    pub id: Uuid,
    pub source_url: String,
    pub source_type: String,
    pub title: String,
    #[ts(skip)]
    pub content: String,
    #[ts(type = "Record<string, unknown>")]
    pub metadata: serde_json::Value,
    pub last_indexed_at: DateTime<Utc>,
}

/// A document chunk with its embedding vector. `vector` is not exported to
/// TypeScript; the mobile client never needs raw embeddings.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../shared/generated/rag/Chunk.ts")]
pub struct Chunk {
    #[ts(type = "string")]
    pub id: Uuid,
    #[ts(type = "string")]
    pub document_id: Uuid,
    pub chunk_index: u32,
    pub text: String,
    pub start_offset: u32,
    pub end_offset: u32,
    pub character_count: u32,
    #[ts(skip)]
    pub vector: Vec<f32>,
    pub embedding_model: String,
}

/// A chunk joined back to its parent document for title/url/source-type display.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../shared/generated/rag/SearchHit.ts")]
pub struct SearchHit {
    #[ts(type = "string")]
    pub chunk_id: Uuid,
    #[ts(type = "string")]
    pub document_id: Uuid,
    pub document_title: String,
    pub document_url: String,
    pub source_type: String,
    pub text: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../shared/generated/rag/Citation.ts")]
pub struct Citation {
    pub marker: u32,
    #[ts(type = "string")]
    pub document_id: Uuid,
    pub title: String,
    pub url: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../../shared/generated/rag/GroundingResult.ts")]
pub struct GroundingResult {
    pub is_grounded: bool,
    pub confidence: f32,
    pub word_overlap: f32,
    pub sentence_coverage: f32,
    pub source_relevance: f32,
    pub factual_consistency: f32,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: usize,
    pub threshold: f32,
    pub source_types: Option<Vec<String>>,
}
