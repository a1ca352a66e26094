use crate::traits::{IndexControlPlane, VectorIndex};
use crate::{IndexDescription, IndexRecord, IndexSpec, QueryMatch, SearchError};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";
const BACKEND: &str = "pinecone";

fn backend_error(details: impl Into<String>) -> SearchError {
    SearchError::BackendResponse {
        backend: BACKEND.to_string(),
        details: details.into(),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(backend_error(format!("{status}: {body}")))
}

/// Control-plane client: lists, creates and describes indexes.
pub struct PineconeControl {
    endpoint: String,
    api_key: String,
    client: Client,
    dimension: usize,
}

impl PineconeControl {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::builder().timeout(timeout).build()?,
            dimension,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

fn parse_description(value: &Value) -> Result<IndexDescription, SearchError> {
    let name = value
        .pointer("/name")
        .and_then(Value::as_str)
        .ok_or_else(|| backend_error("index description has no name"))?;

    Ok(IndexDescription {
        name: name.to_string(),
        host: value
            .pointer("/host")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        ready: value
            .pointer("/status/ready")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

#[async_trait]
impl IndexControlPlane for PineconeControl {
    async fn list_indexes(&self) -> Result<Vec<String>, SearchError> {
        let response = self
            .authorized(self.client.get(format!("{}/indexes", self.endpoint)))
            .send()
            .await?;
        let parsed: Value = check_status(response).await?.json().await?;

        Ok(parsed
            .pointer("/indexes")
            .and_then(Value::as_array)
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|index| index.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), SearchError> {
        let response = self
            .authorized(self.client.post(format!("{}/indexes", self.endpoint)))
            .json(&json!({
                "name": spec.name,
                "dimension": spec.dimension,
                "metric": spec.metric,
                "spec": {
                    "serverless": {
                        "cloud": spec.cloud,
                        "region": spec.region,
                    }
                }
            }))
            .send()
            .await?;

        // Another process created it between our list and create calls.
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }

        check_status(response).await?;
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> Result<IndexDescription, SearchError> {
        let response = self
            .authorized(self.client.get(format!("{}/indexes/{}", self.endpoint, name)))
            .send()
            .await?;
        let parsed: Value = check_status(response).await?.json().await?;
        parse_description(&parsed)
    }

    fn connect(&self, description: &IndexDescription) -> Result<Arc<dyn VectorIndex>, SearchError> {
        if description.host.is_empty() {
            return Err(backend_error(format!(
                "index {} has no data-plane host",
                description.name
            )));
        }

        Ok(Arc::new(PineconeIndex {
            host: data_plane_url(&description.host),
            api_key: self.api_key.clone(),
            client: self.client.clone(),
            dimension: self.dimension,
        }))
    }
}

fn data_plane_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Data-plane client bound to one index host.
pub struct PineconeIndex {
    host: String,
    api_key: String,
    client: Client,
    dimension: usize,
}

impl PineconeIndex {
    pub fn new(
        host: &str,
        api_key: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            host: data_plane_url(host),
            api_key: api_key.into(),
            client: Client::builder().timeout(timeout).build()?,
            dimension,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    fn check_dimension(&self, actual: usize) -> Result<(), SearchError> {
        if actual != self.dimension {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert_records(&self, records: &[IndexRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }

        let vectors = records
            .iter()
            .map(|record| {
                self.check_dimension(record.values.len())?;
                Ok(json!({
                    "id": record.id,
                    "values": record.values,
                    "metadata": record.metadata,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let response = self
            .post("/vectors/upsert")
            .json(&json!({ "vectors": vectors }))
            .send()
            .await?;
        let parsed: Value = check_status(response).await?.json().await?;

        let upserted = parsed.pointer("/upsertedCount").and_then(Value::as_u64);
        if upserted.is_some_and(|count| count as usize != records.len()) {
            return Err(backend_error(format!(
                "upserted {} of {} records",
                upserted.unwrap_or_default(),
                records.len()
            )));
        }

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, SearchError> {
        self.check_dimension(vector.len())?;

        let response = self
            .post("/query")
            .json(&json!({
                "vector": vector,
                "topK": top_k,
                "includeMetadata": include_metadata,
                "includeValues": false,
            }))
            .send()
            .await?;
        let parsed: Value = check_status(response).await?.json().await?;
        Ok(parse_matches(&parsed, top_k))
    }
}

fn parse_matches(parsed: &Value, top_k: usize) -> Vec<QueryMatch> {
    let mut matches: Vec<QueryMatch> = parsed
        .pointer("/matches")
        .and_then(Value::as_array)
        .map(|hits| {
            hits.iter()
                .map(|hit| QueryMatch {
                    id: hit
                        .pointer("/id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    score: hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32,
                    text: hit
                        .pointer("/metadata/text")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();

    matches.sort_by(|left, right| right.score.total_cmp(&left.score));
    matches.truncate(top_k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_are_sorted_and_truncated() {
        let payload = json!({
            "matches": [
                { "id": "a", "score": 0.2, "metadata": { "text": "low" } },
                { "id": "b", "score": 0.9, "metadata": { "text": "high" } },
                { "id": "c", "score": 0.5 },
            ]
        });

        let matches = parse_matches(&payload, 2);
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "b");
        assert_eq!(matches[0].text.as_deref(), Some("high"));
        assert_eq!(matches[1].id, "c");
        assert_eq!(matches[1].text, None);
    }

    #[test]
    fn description_reads_ready_flag_and_host() {
        let payload = json!({
            "name": "docs",
            "host": "docs-abc.svc.pinecone.io",
            "status": { "ready": true, "state": "Ready" }
        });
        let description = parse_description(&payload).unwrap();
        assert_eq!(description.host, "docs-abc.svc.pinecone.io");
        assert!(description.ready);

        let pending = parse_description(&json!({ "name": "docs", "status": {} })).unwrap();
        assert!(!pending.ready);
    }

    #[test]
    fn bare_hosts_get_https_scheme() {
        assert_eq!(data_plane_url("docs.svc.io"), "https://docs.svc.io");
        assert_eq!(data_plane_url("http://127.0.0.1:9000/"), "http://127.0.0.1:9000");
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected_before_sending() {
        let index = PineconeIndex::new("http://127.0.0.1:9", "key", 4, Duration::from_secs(1)).unwrap();
        let error = index.query(&[0.0, 1.0], 5, true).await.unwrap_err();
        assert!(matches!(
            error,
            SearchError::DimensionMismatch { expected: 4, actual: 2 }
        ));
    }
}
