pub mod chunking;
pub mod completion;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod models;
pub mod pipeline;
pub mod relay;
pub mod staging;
pub mod stores;
pub mod traits;

pub use chunking::{build_chunks, chunk_text, ChunkingConfig};
pub use completion::{
    truncate_context, OpenRouterClient, DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL,
    MAX_CONTEXT_CHARS,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, RandomEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{CompletionError, IngestError, PipelineError, SearchError};
pub use extractor::{extract_text, DocumentExtractor, TextExtractor};
pub use index::{provision, IndexHandle, IndexPhase, ReadinessPolicy};
pub use models::{
    DocumentChunk, DocumentFingerprint, DocumentKind, IndexDescription, IndexRecord, IndexSpec,
    IngestSummary, IngestionOptions, Metric, QueryMatch, RecordMetadata, Upload,
};
pub use pipeline::RagPipeline;
pub use relay::{error_frames, relay_frames, RelayFrame};
pub use staging::{StagedFile, StagingArea};
pub use stores::{PineconeControl, PineconeIndex};
pub use traits::{ChatModel, CompletionStream, IndexControlPlane, VectorIndex};
