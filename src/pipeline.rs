//! Conversational retrieval pipeline.
//!
//! One chat turn walks a fixed list of stages, each a function from the
//! turn's context to its next context:
//!
//! ```text
//! AwaitingInput → Rewriting → Retrieving → Assembling → Generating → UpdatingMemory → Done
//!                                                                                  ↘ Error (from any stage)
//! ```
//!
//! | Stage | Reads | Produces |
//! |-------|-------|----------|
//! | `AwaitingInput` | session id, question | session history |
//! | `Rewriting` | history, question | standalone question (or explicit fallback to the raw question) |
//! | `Retrieving` | standalone question | ranked passages (possibly none) |
//! | `Assembling` | passages | context text and ordered sources |
//! | `Generating` | history, raw question, context | answer |
//! | `UpdatingMemory` | question, answer | user + assistant turns appended together |
//!
//! A rewrite failure is absorbed; the raw question is used instead. Every
//! other failure stops the walk in `Error` with a [`PipelineError`] naming
//! the stage, and the session history is left untouched. The memory write
//! is the last stage and does not suspend, so a timeout can never land
//! between the answer and its memory update.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

use crate::config::RetrievalConfig;
use crate::context::{self, AssembledContext};
use crate::error::RagError;
use crate::generate::AnswerGenerator;
use crate::index::IndexManager;
use crate::llm::{ChatModel, TokenStream};
use crate::memory::SessionStore;
use crate::models::{ConversationTurn, RetrievedPassage, SourceRef};
use crate::rewrite::QueryRewriter;

/// Where a chat turn is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    AwaitingInput,
    Rewriting,
    Retrieving,
    Assembling,
    Generating,
    UpdatingMemory,
    Done,
    Error,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::AwaitingInput => "awaiting_input",
            PipelineState::Rewriting => "rewriting",
            PipelineState::Retrieving => "retrieving",
            PipelineState::Assembling => "assembling",
            PipelineState::Generating => "generating",
            PipelineState::UpdatingMemory => "updating_memory",
            PipelineState::Done => "done",
            PipelineState::Error => "error",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => PipelineState::AwaitingInput,
            1 => PipelineState::Rewriting,
            2 => PipelineState::Retrieving,
            3 => PipelineState::Assembling,
            4 => PipelineState::Generating,
            5 => PipelineState::UpdatingMemory,
            6 => PipelineState::Done,
            _ => PipelineState::Error,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages of a blocking chat turn, in execution order.
const STAGES: [PipelineState; 6] = [
    PipelineState::AwaitingInput,
    PipelineState::Rewriting,
    PipelineState::Retrieving,
    PipelineState::Assembling,
    PipelineState::Generating,
    PipelineState::UpdatingMemory,
];

/// A failed chat turn: the stage it stopped in and why.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: PipelineState,
    #[source]
    pub source: RagError,
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        self.source.kind()
    }
}

/// Outcome of the rewriting stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Rewrite {
    Standalone(String),
    /// The rewriter failed; retrieval uses the raw question.
    Fallback(String),
}

impl Rewrite {
    pub fn question(&self) -> &str {
        match self {
            Rewrite::Standalone(q) => q,
            Rewrite::Fallback(q) => q,
        }
    }
}

/// A completed chat turn.
#[derive(Debug, Clone)]
pub struct ChatAnswer {
    pub answer: String,
    pub standalone_question: String,
    pub rewrite_fell_back: bool,
    /// `sources[i - 1]` is the passage cited as `[i]`.
    pub sources: Vec<SourceRef>,
}

/// A streaming chat turn. Memory is updated only once `tokens` has been
/// drained to the end without error.
pub struct ChatStream {
    pub standalone_question: String,
    pub sources: Vec<SourceRef>,
    pub tokens: TokenStream,
}

/// Per-turn state threaded through the stages.
struct TurnContext {
    session_id: String,
    question: String,
    history: Vec<ConversationTurn>,
    rewrite: Option<Rewrite>,
    passages: Vec<RetrievedPassage>,
    context: Option<AssembledContext>,
    answer: Option<String>,
}

impl TurnContext {
    fn new(session_id: &str, question: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            question: question.to_string(),
            history: Vec::new(),
            rewrite: None,
            passages: Vec::new(),
            context: None,
            answer: None,
        }
    }

    fn standalone(&self) -> &str {
        self.rewrite
            .as_ref()
            .map(Rewrite::question)
            .unwrap_or(&self.question)
    }
}

pub struct ChatPipeline {
    index: Arc<IndexManager>,
    memory: Arc<SessionStore>,
    rewriter: QueryRewriter,
    generator: AnswerGenerator,
    top_k: usize,
    score_threshold: Option<f32>,
    citations: bool,
}

impl ChatPipeline {
    /// The rewriter and the generator share `model`.
    pub fn new(
        index: Arc<IndexManager>,
        memory: Arc<SessionStore>,
        model: Arc<dyn ChatModel>,
        retrieval: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            memory,
            rewriter: QueryRewriter::new(model.clone()),
            generator: AnswerGenerator::new(model, retrieval.citations),
            top_k: retrieval.top_k,
            score_threshold: retrieval.score_threshold,
            citations: retrieval.citations,
        }
    }

    /// Run one chat turn to completion.
    pub async fn chat(&self, session_id: &str, question: &str) -> Result<ChatAnswer, PipelineError> {
        let progress = AtomicU8::new(PipelineState::AwaitingInput as u8);
        self.run(session_id, question, &progress).await
    }

    /// Run one chat turn, giving up after `limit`.
    ///
    /// A timeout is reported as [`RagError::Timeout`] in the stage that was
    /// running; the session history is not modified.
    pub async fn chat_with_timeout(
        &self,
        session_id: &str,
        question: &str,
        limit: Duration,
    ) -> Result<ChatAnswer, PipelineError> {
        let progress = AtomicU8::new(PipelineState::AwaitingInput as u8);
        match tokio::time::timeout(limit, self.run(session_id, question, &progress)).await {
            Ok(result) => result,
            Err(_) => {
                let stage = PipelineState::from_u8(progress.load(Ordering::SeqCst));
                tracing::warn!(session = session_id, %stage, "chat turn timed out");
                Err(PipelineError {
                    stage,
                    source: RagError::Timeout(limit.as_secs()),
                })
            }
        }
    }

    async fn run(
        &self,
        session_id: &str,
        question: &str,
        progress: &AtomicU8,
    ) -> Result<ChatAnswer, PipelineError> {
        let mut ctx = TurnContext::new(session_id, question);

        for stage in STAGES {
            progress.store(stage as u8, Ordering::SeqCst);
            tracing::debug!(session = session_id, %stage, "entering stage");
            ctx = match self.run_stage(stage, ctx).await {
                Ok(next) => next,
                Err(source) => {
                    progress.store(PipelineState::Error as u8, Ordering::SeqCst);
                    tracing::error!(session = session_id, %stage, error = %source, "chat turn failed");
                    return Err(PipelineError { stage, source });
                }
            };
        }
        progress.store(PipelineState::Done as u8, Ordering::SeqCst);

        let rewrite_fell_back = matches!(ctx.rewrite, Some(Rewrite::Fallback(_)));
        let standalone_question = ctx.standalone().to_string();
        let sources = ctx.context.map(|c| c.sources).unwrap_or_default();
        let answer = ctx.answer.unwrap_or_default();

        tracing::info!(
            session = session_id,
            sources = sources.len(),
            rewrite_fell_back,
            "chat turn complete"
        );
        Ok(ChatAnswer {
            answer,
            standalone_question,
            rewrite_fell_back,
            sources,
        })
    }

    async fn run_stage(
        &self,
        stage: PipelineState,
        mut ctx: TurnContext,
    ) -> Result<TurnContext, RagError> {
        match stage {
            PipelineState::AwaitingInput => {
                validate_input(&ctx.session_id, &ctx.question)?;
                ctx.history = self.memory.history(&ctx.session_id);
            }
            PipelineState::Rewriting => {
                ctx.rewrite = Some(self.rewrite(&ctx.question, &ctx.history).await);
            }
            PipelineState::Retrieving => {
                ctx.passages = self
                    .index
                    .retrieve(ctx.standalone(), self.top_k, self.score_threshold)
                    .await?;
            }
            PipelineState::Assembling => {
                ctx.context = Some(context::assemble(&ctx.passages, self.citations));
            }
            PipelineState::Generating => {
                let context = assembled(&ctx)?;
                let answer = self
                    .generator
                    .generate(&ctx.question, context, &ctx.history)
                    .await?;
                ctx.answer = Some(answer);
            }
            PipelineState::UpdatingMemory => {
                let answer = ctx.answer.as_deref().ok_or_else(|| {
                    RagError::Generation("no answer produced before memory update".into())
                })?;
                self.memory
                    .append_exchange(&ctx.session_id, &ctx.question, answer);
            }
            PipelineState::Done | PipelineState::Error => {}
        }
        Ok(ctx)
    }

    async fn rewrite(&self, question: &str, history: &[ConversationTurn]) -> Rewrite {
        match self.rewriter.rewrite(question, history).await {
            Ok(standalone) => Rewrite::Standalone(standalone),
            Err(e) => {
                tracing::warn!(error = %e, "question rewrite failed, using the raw question");
                Rewrite::Fallback(question.to_string())
            }
        }
    }

    /// Run the stages up to assembling, then stream the answer.
    ///
    /// Dropping the returned stream before it ends abandons the turn: no
    /// memory is written. The upstream request is not guaranteed to stop
    /// immediately.
    pub async fn chat_stream(
        &self,
        session_id: &str,
        question: &str,
    ) -> Result<ChatStream, PipelineError> {
        let fail = |stage: PipelineState| move |source: RagError| PipelineError { stage, source };

        let mut ctx = TurnContext::new(session_id, question);
        for stage in &STAGES[..4] {
            ctx = self.run_stage(*stage, ctx).await.map_err(fail(*stage))?;
        }

        let context = assembled(&ctx).map_err(fail(PipelineState::Generating))?;
        let tokens = self
            .generator
            .generate_stream(&ctx.question, context, &ctx.history)
            .await
            .map_err(fail(PipelineState::Generating))?;

        let standalone_question = ctx.standalone().to_string();
        let sources = context.sources.clone();
        let tokens = remember_when_drained(
            tokens,
            self.memory.clone(),
            ctx.session_id.clone(),
            ctx.question.clone(),
        );

        Ok(ChatStream {
            standalone_question,
            sources,
            tokens: Box::pin(tokens),
        })
    }
}

fn assembled(ctx: &TurnContext) -> Result<&AssembledContext, RagError> {
    ctx.context
        .as_ref()
        .ok_or_else(|| RagError::Retrieval("context was not assembled".into()))
}

fn validate_input(session_id: &str, question: &str) -> Result<(), RagError> {
    if session_id.trim().is_empty() {
        return Err(RagError::InvalidInput("session_id must not be empty".into()));
    }
    if question.trim().is_empty() {
        return Err(RagError::InvalidInput("query must not be empty".into()));
    }
    Ok(())
}

/// Pass tokens through; append the exchange to memory after a clean end.
fn remember_when_drained(
    mut tokens: TokenStream,
    memory: Arc<SessionStore>,
    session_id: String,
    question: String,
) -> impl futures::Stream<Item = Result<String, RagError>> + Send {
    async_stream::try_stream! {
        let mut answer = String::new();
        while let Some(token) = tokens.next().await {
            let token = token?;
            answer.push_str(&token);
            yield token;
        }
        if answer.trim().is_empty() {
            Err::<(), _>(RagError::Generation("model returned an empty answer".into()))?;
        }
        memory.append_exchange(&session_id, &question, &answer);
        tracing::info!(session = %session_id, "streamed chat turn complete");
    }
}
