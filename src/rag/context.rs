//! Context assembly for grounded answers

use serde::{Deserialize, Serialize};

use crate::types::QueryMatch;

/// Assembled context for the answer prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Numbered passages, one per included match
    pub text: String,
    /// Number of matches included
    pub document_count: usize,
    /// Sources in inclusion order
    pub sources: Vec<String>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.document_count == 0
    }
}

/// Builds the context block from ranked matches
pub struct ContextBuilder {
    max_chars: usize,
}

impl ContextBuilder {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Include whole matches in rank order until the character budget is hit
    ///
    /// Matches without `text` metadata carry nothing to ground on and are
    /// skipped. Later passages are never cut in half; only the first usable
    /// passage is shortened when it alone exceeds the budget, so any match
    /// with text yields a non-empty context.
    pub fn build(&self, matches: &[QueryMatch]) -> AssembledContext {
        let mut parts = Vec::new();
        let mut sources = Vec::new();
        let mut used = 0;

        for m in matches {
            let Some(text) = m.text().map(str::trim).filter(|t| !t.is_empty()) else {
                continue;
            };

            let prefix = format!("[{}] ({}) ", parts.len() + 1, m.source());
            let mut passage = format!("{}{}", prefix, text);
            let mut cost = passage.chars().count();
            if used + cost > self.max_chars {
                if !parts.is_empty() {
                    break;
                }
                let room = self.max_chars.saturating_sub(prefix.chars().count()).max(1);
                passage = format!("{}{}", prefix, truncate_chars(text, room));
                cost = passage.chars().count();
            }

            used += cost;
            sources.push(m.source().to_string());
            parts.push(passage);
        }

        AssembledContext {
            text: parts.join("\n\n"),
            document_count: parts.len(),
            sources,
        }
    }

    /// User message combining context and question
    pub fn augment_prompt(&self, question: &str, context: &AssembledContext) -> String {
        format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer using only the context above and cite sources by number.",
            context.text, question
        )
    }
}

/// At most `max` characters of `text`, cut on a char boundary
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
