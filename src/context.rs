//! Context assembly with provenance.
//!
//! Turns ranked passages into the context block handed to the generator and
//! the ordered source list returned to callers. Passages with identical text
//! are collapsed (first occurrence wins) and rank order is preserved. In
//! citation mode each surviving passage is prefixed with a 1-based `[i]`
//! marker; `sources[i - 1]` is the file that marker refers to.
//!
//! An empty result never produces an empty context: [`NO_CONTEXT_SENTINEL`]
//! is used instead so the generator can tell "nothing found" apart from
//! genuine content.

use std::collections::HashSet;

use crate::models::{RetrievedPassage, SourceRef};

/// Context text used when retrieval found nothing usable.
pub const NO_CONTEXT_SENTINEL: &str = "[NO RELEVANT CONTEXT FOUND] The knowledge base contains no \
passages relevant to this question. Tell the user you do not know, or suggest adding documents \
that cover it.";

const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<SourceRef>,
    /// True when [`NO_CONTEXT_SENTINEL`] was substituted.
    pub empty: bool,
}

pub fn assemble(passages: &[RetrievedPassage], citations: bool) -> AssembledContext {
    let mut seen: HashSet<&str> = HashSet::new();
    let unique: Vec<&RetrievedPassage> = passages
        .iter()
        .filter(|p| seen.insert(p.text.as_str()))
        .collect();

    if unique.is_empty() {
        return AssembledContext {
            text: NO_CONTEXT_SENTINEL.to_string(),
            sources: Vec::new(),
            empty: true,
        };
    }

    let mut blocks = Vec::with_capacity(unique.len());
    let mut sources = Vec::with_capacity(unique.len());
    for (i, passage) in unique.iter().enumerate() {
        let index = i + 1;
        if citations {
            blocks.push(format!("[{}] (source: {})\n{}", index, passage.file_name, passage.text));
        } else {
            blocks.push(passage.text.clone());
        }
        sources.push(SourceRef {
            index,
            file_name: passage.file_name.clone(),
            content_preview: preview(&passage.text),
        });
    }

    AssembledContext {
        text: blocks.join("\n\n"),
        sources,
        empty: false,
    }
}

fn preview(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut)
}
