//! Deterministic model doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rag_harness::app::App;
use rag_harness::config::Config;
use rag_harness::context::NO_CONTEXT_SENTINEL;
use rag_harness::embedding::Embedder;
use rag_harness::error::RagError;
use rag_harness::llm::{ChatModel, TokenStream};
use rag_harness::models::ConversationTurn;
use rag_harness::store::{IndexStore, InMemoryStore};

const KEYWORDS: [&str; 4] = ["refund", "international", "shipping", "warranty"];

/// One dimension per keyword plus a small constant bias, L2-normalized.
pub struct KeywordEmbedder;

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = KEYWORDS
        .iter()
        .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
        .collect();
    v.push(0.1);
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Embedder whose endpoint is never reachable.
pub struct UnreachableEmbedder;

#[async_trait]
impl Embedder for UnreachableEmbedder {
    fn model_name(&self) -> &str {
        "unreachable"
    }
    fn dims(&self) -> usize {
        KEYWORDS.len() + 1
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::Embedding("connection refused".into()))
    }
}

/// Scripted chat model.
///
/// Rewrite requests are answered with `"<follow-up> (<first user question>)"`.
/// Answer requests reply `"I don't know."` when the context is the empty
/// sentinel, otherwise `"Based on [1]: <question>"`.
#[derive(Default)]
pub struct FakeModel {
    pub fail_rewrite: bool,
    pub fail_generate: bool,
    pub break_stream: bool,
    pub answer_delay: Option<Duration>,
    pub calls: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl FakeModel {
    pub fn answer_requests(&self) -> Vec<Vec<ConversationTurn>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !is_rewrite(m))
            .cloned()
            .collect()
    }

    pub fn rewrite_requests(&self) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| is_rewrite(m)).count()
    }

    fn answer_for(&self, messages: &[ConversationTurn]) -> String {
        let system = &messages[0].text;
        if system.contains(NO_CONTEXT_SENTINEL) {
            return "I don't know.".to_string();
        }
        let question = messages.last().map(|m| m.text.as_str()).unwrap_or_default();
        format!("Based on [1]: {}", question)
    }
}

fn is_rewrite(messages: &[ConversationTurn]) -> bool {
    messages
        .last()
        .map(|m| m.text.contains("Follow-up question:"))
        .unwrap_or(false)
}

fn rewrite_reply(request: &str) -> String {
    let follow_up = request
        .lines()
        .find_map(|l| l.strip_prefix("Follow-up question: "))
        .unwrap_or_default();
    let first = request
        .lines()
        .find_map(|l| l.strip_prefix("User: "))
        .unwrap_or_default();
    format!("{} ({})", follow_up, first)
}

#[async_trait]
impl ChatModel for FakeModel {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, RagError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if is_rewrite(messages) {
            if self.fail_rewrite {
                return Err(RagError::Generation("rewrite backend down".into()));
            }
            return Ok(rewrite_reply(&messages[1].text));
        }
        if let Some(delay) = self.answer_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_generate {
            return Err(RagError::Generation("429 rate limited".into()));
        }
        Ok(self.answer_for(messages))
    }

    async fn stream(&self, messages: &[ConversationTurn]) -> Result<TokenStream, RagError> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if self.fail_generate {
            return Err(RagError::Generation("429 rate limited".into()));
        }
        let answer = self.answer_for(messages);
        let mut items: Vec<Result<String, RagError>> = answer
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        if self.break_stream {
            items.truncate(1);
            items.push(Err(RagError::Generation("connection reset".into())));
        }
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Service wired to an in-memory index and the given model.
pub fn app_with(config: Config, model: Arc<FakeModel>) -> App {
    app_with_embedder(config, Arc::new(KeywordEmbedder), model)
}

pub fn app_with_embedder(
    config: Config,
    embedder: Arc<dyn Embedder>,
    model: Arc<FakeModel>,
) -> App {
    let store: Arc<dyn IndexStore> = Arc::new(InMemoryStore::new());
    App::from_parts(config, store, embedder, model).unwrap()
}

pub const REFUND_DOC: &str = "Refund policy: refunds are accepted within 30 days of delivery.\n\n\
International orders may be refunded within 60 days.";
