//! Retrieval-Augmented Generation: chunking + embedding (§4.5), vector store
//! (§4.6), citation + grounding (§4.7), and knowledge refresh (§4.8).

pub mod chunking;
pub mod citation;
pub mod embedding;
pub mod grounding;
pub mod refresh;
pub mod types;
pub mod vector_store;

pub use chunking::{chunk_document, RawChunk};
pub use citation::{build_citations, inject_markers};
pub use embedding::{embed_all, EmbeddingError, EmbeddingProvider, HashEmbeddingProvider};
pub use grounding::validate_grounding;
pub use refresh::{FetchedDocument, GithubRepositoryFetcher, RefreshError, RefreshLoop, RepositoryFetcher};
pub use types::{Chunk, Citation, GroundingResult, KnowledgeDocument, SearchHit, SearchOptions};
pub use vector_store::{VectorStore, VectorStoreError};
