use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("office document parse error: {0}")]
    Ooxml(String),

    #[error("document has no extractable text: {0}")]
    EmptyDocument(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("extraction task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store not available yet: {0}")]
    NotReady(String),

    #[error("index {name} was not ready after {waited_secs}s")]
    ProvisionTimeout { name: String, waited_secs: u64 },
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion api returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("completion response had no message content")]
    MissingContent,
}

/// Request-scoped failure surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn is_not_ready(&self) -> bool {
        matches!(self, PipelineError::Search(SearchError::NotReady(_)))
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Ingest(IngestError::UnsupportedFormat(_)) | PipelineError::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_errors_are_classified_for_the_http_layer() {
        let not_ready = PipelineError::from(SearchError::NotReady("vector index is provisioning".into()));
        assert!(not_ready.is_not_ready());
        assert!(!not_ready.is_client_error());

        let unsupported = PipelineError::from(IngestError::UnsupportedFormat("text/plain".into()));
        assert!(unsupported.is_client_error());

        let timeout = PipelineError::from(SearchError::ProvisionTimeout {
            name: "rag-index".into(),
            waited_secs: 300,
        });
        assert!(!timeout.is_not_ready());
        assert!(!timeout.is_client_error());
        assert_eq!(timeout.to_string(), "index rag-index was not ready after 300s");
    }
}
