use crate::chunking::{build_chunks, ChunkingConfig};
use crate::completion::{truncate_context, MAX_CONTEXT_CHARS};
use crate::embeddings::Embedder;
use crate::extractor::TextExtractor;
use crate::index::IndexHandle;
use crate::staging::StagingArea;
use crate::traits::{ChatModel, CompletionStream, VectorIndex};
use crate::{
    DocumentFingerprint, DocumentKind, IndexRecord, IngestError, IngestSummary, IngestionOptions,
    PipelineError, QueryMatch, SearchError, Upload,
};
use chrono::Utc;
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Wires extraction, chunking, embedding, the vector index and the chat model
/// together for one upload or one question at a time.
pub struct RagPipeline {
    index: IndexHandle,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    chat: Arc<dyn ChatModel>,
    staging: StagingArea,
    options: IngestionOptions,
}

impl RagPipeline {
    pub fn new(
        index: IndexHandle,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        chat: Arc<dyn ChatModel>,
        staging: StagingArea,
        options: IngestionOptions,
    ) -> Self {
        Self {
            index,
            extractor,
            embedder,
            chat,
            staging,
            options,
        }
    }

    pub fn index(&self) -> &IndexHandle {
        &self.index
    }

    pub fn ensure_ready(&self) -> Result<Arc<dyn VectorIndex>, PipelineError> {
        Ok(self.index.get()?)
    }

    pub async fn ingest(&self, upload: Upload) -> Result<IngestSummary, PipelineError> {
        let index = self.ensure_ready()?;
        let kind = DocumentKind::from_media_type(&upload.media_type)?;

        let staged = self.staging.stage(&upload.bytes).await?;
        let fingerprint = DocumentFingerprint {
            document_id: staged.checksum().to_string(),
            source_name: upload.file_name.unwrap_or_else(|| "upload".to_string()),
            kind,
            checksum: staged.checksum().to_string(),
            ingested_at: Utc::now(),
        };

        let extractor = Arc::clone(&self.extractor);
        let path = staged.path().to_path_buf();
        let text = tokio::task::spawn_blocking(move || extractor.extract_text(&path, kind))
            .await
            .map_err(|error| IngestError::Task(error.to_string()))??;

        let chunks = build_chunks(&fingerprint, &text, ChunkingConfig::from(&self.options))?;
        if chunks.is_empty() {
            warn!(
                document_id = %fingerprint.document_id,
                source = %fingerprint.source_name,
                "document produced no text"
            );
        }

        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let values = self.embedder.embed(&chunk.text).await?;
            records.push(IndexRecord::from_chunk(chunk, values));
        }

        self.upsert(index.as_ref(), &records).await?;

        info!(
            document_id = %fingerprint.document_id,
            source = %fingerprint.source_name,
            kind = ?fingerprint.kind,
            chunk_count = chunks.len(),
            ingested_at = %fingerprint.ingested_at.to_rfc3339(),
            "document indexed"
        );

        Ok(IngestSummary {
            document_id: fingerprint.document_id,
            kind: fingerprint.kind,
            chunk_count: chunks.len(),
            ingested_at: fingerprint.ingested_at,
        })
    }

    async fn upsert(&self, index: &dyn VectorIndex, records: &[IndexRecord]) -> Result<(), SearchError> {
        let batch_size = self.options.upsert_batch_size.max(1);
        let in_flight = self.options.max_upserts_in_flight.max(1);

        futures::stream::iter(records.chunks(batch_size).map(Ok::<_, SearchError>))
            .try_for_each_concurrent(in_flight, |batch| index.upsert_records(batch))
            .await
    }

    /// Embeds the question and joins the text of the best matches into a bounded context.
    pub async fn retrieve_context(&self, message: &str) -> Result<String, PipelineError> {
        let index = self.ensure_ready()?;
        let vector = self.embedder.embed(message).await?;
        let matches = index.query(&vector, self.options.top_k, true).await?;
        debug!(match_count = matches.len(), "retrieved context");
        Ok(assemble_context(&matches))
    }

    pub async fn answer(&self, message: &str) -> Result<String, PipelineError> {
        validate_message(message)?;
        let context = self.retrieve_context(message).await?;
        Ok(self.chat.complete(&context, message).await?)
    }

    pub async fn answer_stream(&self, message: &str) -> Result<CompletionStream, PipelineError> {
        validate_message(message)?;
        let context = self.retrieve_context(message).await?;
        Ok(self.chat.stream(&context, message).await?)
    }
}

fn validate_message(message: &str) -> Result<(), PipelineError> {
    if message.trim().is_empty() {
        return Err(PipelineError::InvalidRequest("message is empty".to_string()));
    }
    Ok(())
}

pub fn assemble_context(matches: &[QueryMatch]) -> String {
    let joined = matches
        .iter()
        .filter_map(|hit| hit.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");
    truncate_context(&joined, MAX_CONTEXT_CHARS).to_string()
}
