use crate::{
    CompletionError, IndexDescription, IndexRecord, IndexSpec, QueryMatch, SearchError,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;

/// Raw body chunks of a streaming completion, exactly as the upstream sent them.
pub type CompletionStream = BoxStream<'static, Result<Bytes, CompletionError>>;

/// Data-plane operations on a ready collection.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert_records(&self, records: &[IndexRecord]) -> Result<(), SearchError>;

    /// Matches ordered by descending similarity, at most `top_k` of them.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, SearchError>;
}

/// Control-plane operations used while provisioning a collection.
#[async_trait]
pub trait IndexControlPlane: Send + Sync {
    async fn list_indexes(&self) -> Result<Vec<String>, SearchError>;

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), SearchError>;

    async fn describe_index(&self, name: &str) -> Result<IndexDescription, SearchError>;

    fn connect(&self, description: &IndexDescription) -> Result<Arc<dyn VectorIndex>, SearchError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, context: &str, message: &str) -> Result<String, CompletionError>;

    async fn stream(&self, context: &str, message: &str) -> Result<CompletionStream, CompletionError>;
}
