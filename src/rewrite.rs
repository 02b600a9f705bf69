//! History-aware question rewriting.
//!
//! A follow-up such as "And for international orders?" cannot be retrieved
//! on its own. [`QueryRewriter::rewrite`] asks the chat model to restate it
//! as a self-contained question using the session history. With no history
//! the question is already standalone and the model is not called.

use std::sync::Arc;

use crate::error::RagError;
use crate::llm::ChatModel;
use crate::models::{ConversationTurn, Role};

const REWRITE_INSTRUCTIONS: &str = "Given the conversation history and a follow-up question, \
rewrite the follow-up as a standalone question that can be understood without the history. \
Carry over the topics and constraints from the history that the follow-up refers to. \
Do not answer the question. If it is already standalone, return it unchanged. \
Reply with the question only.";

pub struct QueryRewriter {
    model: Arc<dyn ChatModel>,
}

impl QueryRewriter {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Return a standalone form of `question` given `history`.
    ///
    /// # Errors
    ///
    /// [`RagError::Generation`] if the model fails or replies with nothing.
    pub async fn rewrite(
        &self,
        question: &str,
        history: &[ConversationTurn],
    ) -> Result<String, RagError> {
        if history.is_empty() {
            return Ok(question.to_string());
        }

        let messages = vec![
            ConversationTurn::system(REWRITE_INSTRUCTIONS),
            ConversationTurn::user(render_request(question, history)),
        ];
        let reply = self.model.complete(&messages).await?;
        let standalone = clean_reply(&reply);
        if standalone.is_empty() {
            return Err(RagError::Generation(
                "rewriter returned an empty question".into(),
            ));
        }

        tracing::debug!(original = question, standalone = %standalone, "rewrote question");
        Ok(standalone)
    }
}

fn render_request(question: &str, history: &[ConversationTurn]) -> String {
    let mut out = String::from("Conversation history:\n");
    for turn in history {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        out.push_str(&format!("{}: {}\n", speaker, turn.text));
    }
    out.push_str(&format!("\nFollow-up question: {}\nStandalone question:", question));
    out
}

/// Strip whitespace, a leading label, and wrapping quotes from the model's reply.
fn clean_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    let unlabeled = trimmed
        .strip_prefix("Standalone question:")
        .unwrap_or(trimmed)
        .trim();
    unlabeled
        .trim_matches(|c| c == '"' || c == '\u{201c}' || c == '\u{201d}')
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenStream;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: String,
        calls: Mutex<Vec<Vec<ConversationTurn>>>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }
        async fn complete(&self, messages: &[ConversationTurn]) -> Result<String, RagError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(self.reply.clone())
        }
        async fn stream(&self, _messages: &[ConversationTurn]) -> Result<TokenStream, RagError> {
            Err(RagError::Generation("not used".into()))
        }
    }

    fn model(reply: &str) -> Arc<ScriptedModel> {
        Arc::new(ScriptedModel {
            reply: reply.to_string(),
            calls: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_no_history_skips_model() {
        let m = model("unused");
        let rewriter = QueryRewriter::new(m.clone());
        let out = rewriter.rewrite("What is the refund policy?", &[]).await.unwrap();
        assert_eq!(out, "What is the refund policy?");
        assert!(m.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_sent_and_reply_cleaned() {
        let m = model("  \"What is the refund policy for international orders?\"\n");
        let rewriter = QueryRewriter::new(m.clone());
        let history = vec![
            ConversationTurn::user("What is the refund policy?"),
            ConversationTurn::assistant("Refunds within 30 days."),
        ];
        let out = rewriter
            .rewrite("And for international orders?", &history)
            .await
            .unwrap();
        assert_eq!(out, "What is the refund policy for international orders?");

        let calls = m.calls.lock().unwrap();
        let prompt = &calls[0][1].text;
        assert!(prompt.contains("User: What is the refund policy?"));
        assert!(prompt.contains("Follow-up question: And for international orders?"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_error() {
        let rewriter = QueryRewriter::new(model("   "));
        let err = rewriter
            .rewrite("And?", &[ConversationTurn::user("hi")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "generation_error");
    }

    #[test]
    fn test_clean_reply_strips_label() {
        assert_eq!(clean_reply("Standalone question: Why?"), "Why?");
    }
}
