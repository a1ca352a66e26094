use anyhow::Context;
use clap::{Parser, ValueEnum};
use docrelay_core::completion::{DEFAULT_COMPLETION_MODEL, DEFAULT_COMPLETION_URL};
use docrelay_core::stores::pinecone::DEFAULT_CONTROL_URL;
use docrelay_core::{
    CharacterNgramEmbedder, Embedder, HttpEmbedder, IndexSpec, IngestionOptions, Metric,
    RandomEmbedder, ReadinessPolicy, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Uniform noise; placeholder until a real model is configured.
    Random,
    /// Hashed character trigrams, computed locally.
    Ngram,
    /// OpenAI-compatible embeddings endpoint.
    Http,
}

#[derive(Clone, Parser)]
#[command(name = "docrelay", version, about = "Index uploaded documents and answer questions over them")]
pub struct Config {
    /// Interface to listen on
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Pinecone API key
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: String,

    /// Pinecone control-plane base URL
    #[arg(long, env = "PINECONE_CONTROL_URL", default_value = DEFAULT_CONTROL_URL)]
    pub pinecone_control_url: String,

    /// Vector index name, created at startup if missing
    #[arg(long, env = "INDEX_NAME", default_value = "rag-index")]
    pub index_name: String,

    #[arg(long, env = "INDEX_CLOUD", default_value = "aws")]
    pub index_cloud: String,

    #[arg(long, env = "INDEX_REGION", default_value = "us-east-1")]
    pub index_region: String,

    /// Similarity metric used when the index is created
    #[arg(long, env = "INDEX_METRIC", default_value_t = Metric::Cosine)]
    pub index_metric: Metric,

    /// Vector dimension; must match the index and the embedder
    #[arg(long, env = "EMBEDDING_DIMENSION", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    pub embedding_dimension: usize,

    /// Chat-completion API key (OpenRouter by default)
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub openrouter_api_key: String,

    /// Chat-completion base URL
    #[arg(long, env = "COMPLETION_URL", default_value = DEFAULT_COMPLETION_URL)]
    pub completion_url: String,

    #[arg(long, env = "COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    pub completion_model: String,

    #[arg(long, env = "EMBEDDER", value_enum, default_value_t = EmbedderKind::Random)]
    pub embedder: EmbedderKind,

    /// Base URL of the embeddings API (http embedder only)
    #[arg(long, env = "EMBEDDING_URL")]
    pub embedding_url: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true)]
    pub embedding_api_key: Option<String>,

    /// Directory where uploads are staged during processing
    #[arg(long, env = "STAGING_DIR", default_value = "uploads")]
    pub staging_dir: PathBuf,

    /// Characters per chunk
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1_000)]
    pub chunk_size: usize,

    /// Matches retrieved per question
    #[arg(long, env = "TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// Give up on the index becoming ready after this many seconds
    #[arg(long, env = "PROVISION_TIMEOUT_SECS", default_value_t = 300)]
    pub provision_timeout_secs: u64,

    /// Timeout for every outbound request except streamed completions
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 25 * 1024 * 1024)]
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            name: self.index_name.clone(),
            dimension: self.embedding_dimension,
            metric: self.index_metric,
            cloud: self.index_cloud.clone(),
            region: self.index_region.clone(),
        }
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(self.provision_timeout_secs),
            ..ReadinessPolicy::default()
        }
    }

    pub fn ingestion_options(&self) -> IngestionOptions {
        IngestionOptions {
            chunk_size: self.chunk_size,
            top_k: self.top_k,
            ..IngestionOptions::default()
        }
    }

    pub fn build_embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        let dimensions = self.embedding_dimension;
        let embedder: Arc<dyn Embedder> = match self.embedder {
            EmbedderKind::Random => Arc::new(RandomEmbedder { dimensions }),
            EmbedderKind::Ngram => Arc::new(CharacterNgramEmbedder { dimensions }),
            EmbedderKind::Http => {
                let url = self
                    .embedding_url
                    .clone()
                    .context("--embedding-url is required for the http embedder")?;
                let model = self
                    .embedding_model
                    .clone()
                    .context("--embedding-model is required for the http embedder")?;
                Arc::new(HttpEmbedder::new(
                    url,
                    model,
                    self.embedding_api_key.clone(),
                    dimensions,
                    self.request_timeout(),
                )?)
            }
        };
        Ok(embedder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "docrelay",
            "--pinecone-api-key",
            "pc-key",
            "--openrouter-api-key",
            "or-key",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = parse(&[]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.embedding_dimension, 1024);
        assert_eq!(config.chunk_size, 1_000);
        assert_eq!(config.top_k, 5);
        assert_eq!(config.embedder, EmbedderKind::Random);
        assert_eq!(config.index_spec().metric, Metric::Cosine);
        assert_eq!(config.index_spec().region, "us-east-1");
        assert_eq!(config.readiness_policy().poll_interval, Duration::from_secs(2));
        assert_eq!(config.readiness_policy().timeout, Duration::from_secs(300));
    }

    #[test]
    fn http_embedder_requires_url_and_model() {
        let config = parse(&["--embedder", "http"]);
        assert!(config.build_embedder().is_err());

        let config = parse(&[
            "--embedder",
            "http",
            "--embedding-url",
            "http://localhost:8080/v1",
            "--embedding-model",
            "bge-large",
            "--embedding-dimension",
            "8",
        ]);
        assert_eq!(config.build_embedder().unwrap().dimensions(), 8);
    }

    #[test]
    fn index_metric_is_configurable() {
        let config = parse(&["--index-metric", "dotproduct"]);
        assert_eq!(config.index_spec().metric, Metric::Dotproduct);

        let rejected = Config::try_parse_from([
            "docrelay",
            "--pinecone-api-key",
            "pc-key",
            "--openrouter-api-key",
            "or-key",
            "--index-metric",
            "manhattan",
        ]);
        assert!(rejected.is_err());
    }

    #[test]
    fn ngram_embedder_uses_configured_dimension() {
        let config = parse(&["--embedder", "ngram", "--embedding-dimension", "64"]);
        assert_eq!(config.build_embedder().unwrap().dimensions(), 64);
    }
}
