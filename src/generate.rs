//! Answer generation.
//!
//! Builds the prompt (system instructions with the assembled context,
//! then the session history, then the standalone question) and runs it
//! through the [`ChatModel`], either to completion or as a token stream.

use std::sync::Arc;

use crate::context::AssembledContext;
use crate::error::RagError;
use crate::llm::{ChatModel, TokenStream};
use crate::models::ConversationTurn;

const BASE_INSTRUCTIONS: &str = "You are a professional enterprise assistant. Answer the user's \
question using the context below. If the answer is not in the context, say honestly that you \
do not know instead of making one up. Format the answer in Markdown and keep it concise and \
professional.";

const CITATION_INSTRUCTIONS: &str = "Each context passage starts with a marker such as [1]. \
When a statement relies on a passage, cite it inline with the same marker.";

pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    citations: bool,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>, citations: bool) -> Self {
        Self { model, citations }
    }

    pub fn build_messages(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ConversationTurn],
    ) -> Vec<ConversationTurn> {
        let mut system = String::from(BASE_INSTRUCTIONS);
        if self.citations && !context.empty {
            system.push_str("\n\n");
            system.push_str(CITATION_INSTRUCTIONS);
        }
        system.push_str("\n\nContext:\n");
        system.push_str(&context.text);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ConversationTurn::system(system));
        messages.extend(history.iter().cloned());
        messages.push(ConversationTurn::user(question));
        messages
    }

    pub async fn generate(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ConversationTurn],
    ) -> Result<String, RagError> {
        let messages = self.build_messages(question, context, history);
        let answer = self.model.complete(&messages).await?;
        if answer.trim().is_empty() {
            return Err(RagError::Generation("model returned an empty answer".into()));
        }
        Ok(answer)
    }

    pub async fn generate_stream(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ConversationTurn],
    ) -> Result<TokenStream, RagError> {
        let messages = self.build_messages(question, context, history);
        self.model.stream(&messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{assemble, NO_CONTEXT_SENTINEL};
    use crate::llm::DisabledChatModel;
    use crate::models::{RetrievedPassage, Role};

    fn generator(citations: bool) -> AnswerGenerator {
        AnswerGenerator::new(Arc::new(DisabledChatModel), citations)
    }

    #[test]
    fn test_message_order() {
        let ctx = assemble(
            &[RetrievedPassage {
                text: "Refunds within 30 days.".into(),
                file_name: "policy.pdf".into(),
                fingerprint: "fp".into(),
                rank: 0,
                score: 0.9,
            }],
            true,
        );
        let history = vec![
            ConversationTurn::user("hi"),
            ConversationTurn::assistant("hello"),
        ];
        let msgs = generator(true).build_messages("refund?", &ctx, &history);

        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].text.contains("[1] (source: policy.pdf)"));
        assert!(msgs[0].text.contains("cite it inline"));
        assert_eq!(msgs[1].text, "hi");
        assert_eq!(msgs[3].role, Role::User);
        assert_eq!(msgs[3].text, "refund?");
    }

    #[test]
    fn test_sentinel_context_skips_citation_instructions() {
        let ctx = assemble(&[], true);
        let msgs = generator(true).build_messages("anything?", &ctx, &[]);
        assert!(msgs[0].text.contains(NO_CONTEXT_SENTINEL));
        assert!(!msgs[0].text.contains("cite it inline"));
        assert!(msgs[0].text.contains("do not know"));
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let ctx = assemble(&[], false);
        let err = generator(false).generate("q", &ctx, &[]).await.unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
