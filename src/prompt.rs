//! # Prompt assembly
//!
//! Merges retrieved note chunks, the conversation so far and the new user turn
//! into a single prompt with three sections, always in this order:
//!
//! ```text
//! <instructions>
//!
//! Notes:
//! <chunk 1>
//!
//! <chunk 2>
//!
//! Conversation History:
//! User: ...
//! Assistant: ...
//!
//! My Input:
//! <user turn>
//! ```
//!
//! Only user and assistant messages make it into the history section. The
//! history is never trimmed, so a long chat produces a long prompt; the token
//! count is logged and a warning is emitted when it exceeds the model's budget.

use tiktoken_rs::cl100k_base;

use crate::error::{Error, Result};
use crate::retriever::RetrievedChunk;
use crate::session::ChatMessage;
use crate::template::PromptTemplate;

pub struct PromptAssembler<'a> {
    template: &'a PromptTemplate,
}

impl<'a> PromptAssembler<'a> {
    pub fn new(template: &'a PromptTemplate) -> Self {
        Self { template }
    }

    /// Render the prompt for `user_input`.
    pub fn assemble(
        &self,
        user_input: &str,
        chunks: &[RetrievedChunk],
        history: &[ChatMessage],
    ) -> String {
        let context = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let history_text = history
            .iter()
            .filter(|m| m.role.is_conversational())
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{instructions}\n\n{notes_heading}\n{context}\n\n{history_heading}\n{history_text}\n\n{input_heading}\n{user_input}\n",
            instructions = self.template.instructions,
            notes_heading = self.template.notes_heading,
            history_heading = self.template.history_heading,
            input_heading = self.template.input_heading,
        )
    }
}

/// Number of cl100k tokens in `text`.
pub fn count_tokens(text: &str) -> Result<usize> {
    let bpe = cl100k_base().map_err(|e| Error::Tokenizer(e.to_string()))?;
    Ok(bpe.encode_with_special_tokens(text).len())
}

/// Log the prompt size and warn when it is over `budget`. Never trims.
pub fn check_budget(prompt: &str, budget: usize) -> Result<usize> {
    let tokens = count_tokens(prompt)?;
    if tokens > budget {
        tracing::warn!("Prompt is {tokens} tokens, above the {budget} token context budget");
    } else {
        tracing::debug!("Prompt is {tokens} tokens");
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn chunk(text: &str) -> RetrievedChunk {
        RetrievedChunk {
            id: 0,
            text: text.to_string(),
            start: 0,
            end: text.len(),
            distance: 0.0,
        }
    }

    #[test]
    fn test_sections_appear_in_order() {
        let template = PromptTemplate::default();
        let prompt = PromptAssembler::new(&template).assemble(
            "what is IAM?",
            &[chunk("IAM manages identities."), chunk("Roles are assumed.")],
            &[ChatMessage::user("hi"), ChatMessage::assistant("hello")],
        );

        let notes = prompt.find("Notes:").unwrap();
        let history = prompt.find("Conversation History:").unwrap();
        let input = prompt.find("My Input:").unwrap();
        assert!(notes < history && history < input);
        assert!(prompt.contains("IAM manages identities.\n\nRoles are assumed."));
        assert!(prompt.contains("User: hi\nAssistant: hello"));
        assert!(prompt.ends_with("My Input:\nwhat is IAM?\n"));
    }

    #[test]
    fn test_non_conversational_roles_are_excluded() {
        let template = PromptTemplate::default();
        let history = vec![
            ChatMessage::new(Role::System, "secret system note"),
            ChatMessage::user("question"),
        ];
        let prompt = PromptAssembler::new(&template).assemble("next", &[], &history);
        assert!(!prompt.contains("secret system note"));
        assert!(prompt.contains("User: question"));
    }

    #[test]
    fn test_history_is_not_trimmed() {
        let template = PromptTemplate::default();
        let history: Vec<ChatMessage> = (0..500)
            .map(|i| ChatMessage::user(format!("message number {i}")))
            .collect();
        let prompt = PromptAssembler::new(&template).assemble("q", &[], &history);
        assert!(prompt.contains("message number 0"));
        assert!(prompt.contains("message number 499"));
    }

    #[test]
    fn test_budget_check_counts_tokens() {
        let tokens = check_budget("hello world", 1).unwrap();
        assert!(tokens >= 2);
    }
}
