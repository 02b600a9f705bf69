//! Chat-completion backends.
//!
//! The [`ChatModel`] trait is the seam between the pipeline and whatever
//! serves completions. Implementations:
//!
//! | Provider | Type | Endpoint | Stream framing |
//! |----------|------|----------|----------------|
//! | `openai` | [`OpenAiChatModel`] | `POST {url}/chat/completions` | SSE `data:` lines, `[DONE]` terminator |
//! | `ollama` | [`OllamaChatModel`] | `POST {url}/api/chat` | newline-delimited JSON |
//! | `disabled` | [`DisabledChatModel`] | none | none |
//!
//! `openai` covers every OpenAI-compatible server, including DashScope's
//! compatible mode (`https://dashscope.aliyuncs.com/compatible-mode/v1`).
//!
//! Streaming responses are read with `bytes_stream()` and re-framed into
//! lines on raw bytes, so multi-byte characters split across network chunks
//! are decoded intact.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::RagError;
use crate::http::{endpoint, send_with_retry};
use crate::models::ConversationTurn;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Incremental answer text. Ends after the last token; an `Err` item ends it early.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, RagError>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the full reply to `messages`.
    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, RagError>;

    /// Return the reply as a stream of text fragments.
    async fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, RagError>;
}

fn wire_messages(messages: &[ConversationTurn]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.text }))
        .collect()
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, RagError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| RagError::Configuration(e.to_string()))
}

/// Split a response body into text lines as it arrives.
fn body_lines(response: reqwest::Response) -> impl Stream<Item = Result<String, RagError>> + Send {
    async_stream::try_stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| RagError::Generation(format!("stream read failed: {}", e)))?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                yield String::from_utf8_lossy(&line).trim().to_string();
            }
        }

        if !buffer.is_empty() {
            yield String::from_utf8_lossy(&buffer).trim().to_string();
        }
    }
}

// ============ Disabled ============

pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _messages: &[ConversationTurn]) -> Result<String, RagError> {
        Err(disabled())
    }

    async fn stream(&self, _messages: &[ConversationTurn]) -> Result<TokenStream, RagError> {
        Err(disabled())
    }
}

fn disabled() -> RagError {
    RagError::Configuration("llm provider is disabled. Set [llm] provider in config.".into())
}

// ============ OpenAI-compatible ============

pub struct OpenAiChatModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, RagError> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("llm.model required for openai provider".into())
        })?;
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            RagError::Configuration(format!(
                "{} environment variable not set",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string()),
            api_key,
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send(
        &self,
        messages: &[ConversationTurn],
        stream: bool,
    ) -> Result<reqwest::Response, RagError> {
        let url = endpoint(&self.url, "chat/completions");
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "temperature": self.temperature,
            "stream": stream,
        });

        send_with_retry("chat completions", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await
        .map_err(RagError::Generation)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, RagError> {
        let response = self.send(messages, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response body: {}", e)))?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RagError::Generation("response has no message content".into()))
    }

    async fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, RagError> {
        let response = self.send(messages, true).await?;
        Ok(Box::pin(sse_tokens(body_lines(response))))
    }
}

fn sse_tokens(
    lines: impl Stream<Item = Result<String, RagError>> + Send,
) -> impl Stream<Item = Result<String, RagError>> + Send {
    async_stream::try_stream! {
        futures::pin_mut!(lines);
        while let Some(line) = lines.next().await {
            match parse_sse_line(&line?)? {
                SseLine::Token(token) => yield token,
                SseLine::Done => break,
                SseLine::Skip => {}
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, RagError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| RagError::Generation(format!("malformed stream event: {}", e)))?;
    if let Some(message) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(RagError::Generation(message.to_string()));
    }
    match json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(token) if !token.is_empty() => Ok(SseLine::Token(token.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

// ============ Ollama ============

pub struct OllamaChatModel {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self, RagError> {
        let model = config.model.clone().ok_or_else(|| {
            RagError::Configuration("llm.model required for ollama provider".into())
        })?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string()),
            model,
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    async fn send(
        &self,
        messages: &[ConversationTurn],
        stream: bool,
    ) -> Result<reqwest::Response, RagError> {
        let url = endpoint(&self.url, "api/chat");
        let body = serde_json::json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": stream,
            "options": { "temperature": self.temperature },
        });

        send_with_retry("ollama chat", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .map_err(RagError::Generation)
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, RagError> {
        let response = self.send(messages, false).await?;
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::Generation(format!("invalid response body: {}", e)))?;

        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| RagError::Generation("response has no message content".into()))
    }

    async fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, RagError> {
        let response = self.send(messages, true).await?;
        Ok(Box::pin(ndjson_tokens(body_lines(response))))
    }
}

fn ndjson_tokens(
    lines: impl Stream<Item = Result<String, RagError>> + Send,
) -> impl Stream<Item = Result<String, RagError>> + Send {
    async_stream::try_stream! {
        futures::pin_mut!(lines);
        while let Some(line) = lines.next().await {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (token, done) = parse_ndjson_line(&line)?;
            if !token.is_empty() {
                yield token;
            }
            if done {
                break;
            }
        }
    }
}

/// Returns `(content, done)` for one Ollama stream line.
fn parse_ndjson_line(line: &str) -> Result<(String, bool), RagError> {
    let json: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| RagError::Generation(format!("malformed stream line: {}", e)))?;
    if let Some(message) = json.get("error").and_then(|m| m.as_str()) {
        return Err(RagError::Generation(message.to_string()));
    }
    let token = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let done = json.get("done").and_then(|d| d.as_bool()).unwrap_or(false);
    Ok((token, done))
}

/// Create the [`ChatModel`] named by `llm.provider`.
pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>, RagError> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChatModel)),
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChatModel::new(config)?)),
        other => Err(RagError::Configuration(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_sse_token() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Token("Hel".into()));
    }

    #[test]
    fn test_sse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Skip);
        let role_only = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role_only).unwrap(), SseLine::Skip);
    }

    #[test]
    fn test_sse_error_event() {
        let line = r#"data: {"error":{"message":"quota exceeded"}}"#;
        let err = parse_sse_line(line).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_ndjson_line() {
        let (token, done) =
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(token, "Hi");
        assert!(!done);

        let (token, done) = parse_ndjson_line(r#"{"done":true}"#).unwrap();
        assert!(token.is_empty());
        assert!(done);
    }

    #[test]
    fn test_wire_messages_roles() {
        let msgs = wire_messages(&[
            ConversationTurn::system("be brief"),
            ConversationTurn::user("hi"),
        ]);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[1]["content"], "hi");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }

    #[tokio::test]
    async fn test_sse_tokens_stop_at_done() {
        let lines = futures::stream::iter(
            [
                r#"data: {"choices":[{"delta":{"content":"Ref"}}]}"#,
                "",
                r#"data: {"choices":[{"delta":{"content":"unds"}}]}"#,
                "data: [DONE]",
                r#"data: {"choices":[{"delta":{"content":"ignored"}}]}"#,
            ]
            .into_iter()
            .map(|l| Ok::<_, RagError>(l.to_string())),
        );
        let tokens: Vec<String> = sse_tokens(lines)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["Ref", "unds"]);
    }

    #[tokio::test]
    async fn test_ndjson_tokens_stop_at_done() {
        let lines = futures::stream::iter(
            [
                r#"{"message":{"content":"A"},"done":false}"#,
                r#"{"message":{"content":"B"},"done":true}"#,
                r#"{"message":{"content":"C"},"done":false}"#,
            ]
            .into_iter()
            .map(|l| Ok::<_, RagError>(l.to_string())),
        );
        let tokens: Vec<String> = ndjson_tokens(lines)
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(tokens, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_disabled_model_is_configuration_error() {
        let err = DisabledChatModel
            .complete(&[ConversationTurn::user("hi")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }

    #[test]
    fn test_unknown_provider() {
        let config = LlmConfig {
            provider: "anthropic".into(),
            ..LlmConfig::default()
        };
        assert!(create_chat_model(&config).is_err());
    }
}
