use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_XLS: &str = "application/vnd.ms-excel";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_DOC: &str = "application/msword";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Pdf,
    Spreadsheet,
    WordProcessing,
}

impl DocumentKind {
    /// Resolves a declared media type, ignoring case and parameters such as `charset`.
    pub fn from_media_type(media_type: &str) -> Result<Self, IngestError> {
        let essence = media_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            MIME_PDF => Ok(Self::Pdf),
            MIME_XLSX | MIME_XLS => Ok(Self::Spreadsheet),
            MIME_DOCX | MIME_DOC => Ok(Self::WordProcessing),
            _ => Err(IngestError::UnsupportedFormat(media_type.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub source_name: String,
    pub kind: DocumentKind,
    pub checksum: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub source_name: String,
    pub chunk_index: u64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    pub text: String,
    pub document_id: String,
    pub source_name: String,
    pub chunk_index: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: RecordMetadata,
}

impl IndexRecord {
    pub fn from_chunk(chunk: &DocumentChunk, values: Vec<f32>) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            values,
            metadata: RecordMetadata {
                text: chunk.text.clone(),
                document_id: chunk.document_id.clone(),
                source_name: chunk.source_name.clone(),
                chunk_index: chunk.chunk_index,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    Euclidean,
    Dotproduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dotproduct => "dotproduct",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            "dotproduct" => Ok(Metric::Dotproduct),
            other => Err(format!(
                "unknown metric `{other}`; expected cosine, euclidean or dotproduct"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: Metric,
    pub cloud: String,
    pub region: String,
}

impl IndexSpec {
    pub fn serverless(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            metric: Metric::Cosine,
            cloud: "aws".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDescription {
    pub name: String,
    pub host: String,
    pub ready: bool,
}

/// Raw upload handed to the pipeline by the HTTP layer.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub media_type: String,
    pub bytes: bytes::Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub document_id: String,
    pub kind: DocumentKind,
    pub chunk_count: usize,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IngestionOptions {
    pub chunk_size: usize,
    pub top_k: usize,
    pub upsert_batch_size: usize,
    pub max_upserts_in_flight: usize,
}

impl Default for IngestionOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            top_k: 5,
            upsert_batch_size: 100,
            max_upserts_in_flight: 4,
        }
    }
}
