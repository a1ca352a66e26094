use crate::error::IngestError;
use crate::models::{DocumentChunk, DocumentFingerprint, IngestionOptions};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 1_000 }
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
        }
    }
}

/// Splits `text` into consecutive slices of at most `chunk_size` characters.
///
/// Slices never overlap and always land on char boundaries, so concatenating
/// them yields the input again.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<Vec<&str>, IngestError> {
    if config.chunk_size == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(text.len() / config.chunk_size + 1);
    let mut start = 0;
    let mut count = 0;

    for (offset, _) in text.char_indices() {
        if count == config.chunk_size {
            chunks.push(&text[start..offset]);
            start = offset;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        chunks.push(&text[start..]);
    }

    Ok(chunks)
}

pub fn build_chunks(
    document: &DocumentFingerprint,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<DocumentChunk>, IngestError> {
    let chunks = chunk_text(text, config)?
        .into_iter()
        .enumerate()
        .map(|(index, piece)| {
            let chunk_index = index as u64;
            DocumentChunk {
                chunk_id: make_chunk_id(&document.checksum, chunk_index),
                document_id: document.document_id.clone(),
                source_name: document.source_name.clone(),
                chunk_index,
                text: piece.to_string(),
            }
        })
        .collect();

    Ok(chunks)
}

/// Record ids are keyed on content, so re-uploading the same bytes
/// overwrites the previous records instead of duplicating them.
fn make_chunk_id(checksum: &str, index: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(checksum.as_bytes());
    hasher.update(index.to_le_bytes());
    format!("{:x}", hasher.finalize())
}
