use crate::traits::{ChatModel, CompletionStream};
use crate::CompletionError;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub const DEFAULT_COMPLETION_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_COMPLETION_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";

/// Upper bound on context characters forwarded to the model.
pub const MAX_CONTEXT_CHARS: usize = 10_000;

pub const SYSTEM_PROMPT: &str = "You are an assistant answering questions about uploaded documents. \
Answer only from the provided context. If the context does not contain enough information to answer, \
say so explicitly instead of guessing.";

/// Returns the first `max_chars` characters of `text`.
pub fn truncate_context(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => &text[..offset],
        None => text,
    }
}

pub fn completion_messages(context: &str, message: &str) -> Value {
    let context = truncate_context(context, MAX_CONTEXT_CHARS);
    json!([
        { "role": "system", "content": SYSTEM_PROMPT },
        { "role": "user", "content": format!("{context}\n\nUser: {message}") },
    ])
}

/// OpenAI-compatible `chat/completions` client (OpenRouter by default).
pub struct OpenRouterClient {
    endpoint: String,
    api_key: String,
    model: String,
    client: Client,
    stream_client: Client,
}

impl OpenRouterClient {
    /// `timeout` bounds blocking calls; streaming calls only get a connect timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CompletionError> {
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: Client::builder().timeout(timeout).build()?,
            stream_client: Client::builder().connect_timeout(timeout).build()?,
        })
    }

    fn request_body(&self, context: &str, message: &str, stream: bool) -> Value {
        json!({
            "model": self.model,
            "messages": completion_messages(context, message),
            "stream": stream,
        })
    }

    async fn send(
        &self,
        client: &Client,
        body: &Value,
    ) -> Result<reqwest::Response, CompletionError> {
        let response = client
            .post(format!("{}/chat/completions", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Upstream { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenRouterClient {
    async fn complete(&self, context: &str, message: &str) -> Result<String, CompletionError> {
        let body = self.request_body(context, message, false);
        let parsed: Value = self.send(&self.client, &body).await?.json().await?;
        first_choice_content(&parsed)
    }

    async fn stream(&self, context: &str, message: &str) -> Result<CompletionStream, CompletionError> {
        let body = self.request_body(context, message, true);
        let response = self.send(&self.stream_client, &body).await?;
        Ok(Box::pin(response.bytes_stream().map_err(CompletionError::from)))
    }
}

fn first_choice_content(parsed: &Value) -> Result<String, CompletionError> {
    parsed
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(CompletionError::MissingContent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_truncated_by_characters() {
        let context = "é".repeat(MAX_CONTEXT_CHARS + 50);
        let truncated = truncate_context(&context, MAX_CONTEXT_CHARS);
        assert_eq!(truncated.chars().count(), MAX_CONTEXT_CHARS);
        assert_eq!(truncate_context("short", MAX_CONTEXT_CHARS), "short");
    }

    #[test]
    fn messages_carry_system_instruction_and_bounded_context() {
        let context = "x".repeat(25_000);
        let messages = completion_messages(&context, "what is x?");

        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"]
            .as_str()
            .unwrap()
            .contains("Answer only from the provided context"));

        let user = messages[1]["content"].as_str().unwrap();
        assert!(user.ends_with("\n\nUser: what is x?"));
        assert_eq!(user.chars().filter(|ch| *ch == 'x').count(), MAX_CONTEXT_CHARS + 1);
    }

    #[test]
    fn first_choice_content_is_extracted() {
        let payload = json!({ "choices": [ { "message": { "role": "assistant", "content": "42" } } ] });
        assert_eq!(first_choice_content(&payload).unwrap(), "42");

        let empty = json!({ "choices": [] });
        assert!(matches!(
            first_choice_content(&empty),
            Err(CompletionError::MissingContent)
        ));
    }
}
