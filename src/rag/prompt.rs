//! Prompt assembly.
//!
//! One template, two renderings: a structured message sequence or a single
//! flattened string. The choice is configuration; the semantics (system
//! instructions, passthrough messages, context, question) are identical.

use serde::{Deserialize, Serialize};

use crate::llm::ChatMessage;
use super::context_builder::Passage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    /// One user message holding the whole prompt.
    Flatten,
    /// System message, passthrough messages, then the templated user turn.
    Messages,
}

impl Default for PromptMode {
    fn default() -> Self {
        PromptMode::Messages
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// System instructions.
    pub system: String,
    /// User turn; `{context}` and `{question}` are substituted.
    pub user: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system: "You are an assistant that answers strictly from the provided context. \
                     If the context does not contain the answer, say so. \
                     Cite the passage you used by repeating its line `ARTICLE ID: <id>` \
                     at the end of your answer."
                .to_string(),
            user: "Context:\n{context}\n\nQuestion: {question}".to_string(),
        }
    }
}

impl PromptTemplate {
    /// Render the user turn with context and question substituted.
    pub fn render_user(&self, question: &str, passages: &[Passage]) -> String {
        self.user
            .replace("{context}", &render_context(passages))
            .replace("{question}", question)
    }
}

/// Render passages with their ids visible, so the model can cite them.
pub fn render_context(passages: &[Passage]) -> String {
    let mut context = String::new();
    for passage in passages {
        context.push_str(&format!("ARTICLE ID: {}\n{}\n\n", passage.id, passage.text));
    }
    context.trim_end().to_string()
}

/// Build the final generation input.
///
/// `passthrough` carries caller-supplied conversation turns verbatim; the
/// templated user turn always comes last.
pub fn build(
    mode: PromptMode,
    template: &PromptTemplate,
    question: &str,
    passages: &[Passage],
    passthrough: &[ChatMessage],
) -> Vec<ChatMessage> {
    let user = template.render_user(question, passages);

    match mode {
        PromptMode::Messages => {
            let mut messages = Vec::with_capacity(passthrough.len() + 2);
            messages.push(ChatMessage::new("system", template.system.clone()));
            messages.extend(passthrough.iter().cloned());
            messages.push(ChatMessage::new("user", user));
            messages
        }
        PromptMode::Flatten => {
            let mut parts = vec![template.system.clone()];
            parts.extend(passthrough.iter().map(|m| m.content.clone()));
            parts.push(user);
            vec![ChatMessage::new("user", parts.join("\n\n"))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passages() -> Vec<Passage> {
        vec![
            Passage {
                id: "p1".to_string(),
                text: "cats are mammals".to_string(),
                score: 0.9,
            },
            Passage {
                id: "p2".to_string(),
                text: "dogs are mammals".to_string(),
                score: 0.8,
            },
        ]
    }

    #[test]
    fn context_rendering_exposes_ids() {
        let rendered = render_context(&passages());
        assert!(rendered.contains("ARTICLE ID: p1"));
        assert!(rendered.contains("cats are mammals"));
        assert!(rendered.contains("ARTICLE ID: p2"));
    }

    #[test]
    fn message_mode_puts_system_first_and_user_last() {
        let messages = build(
            PromptMode::Messages,
            &PromptTemplate::default(),
            "are cats mammals?",
            &passages(),
            &[ChatMessage::new("assistant", "earlier turn")],
        );

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "earlier turn");
        assert_eq!(messages[2].role, "user");
        assert!(messages[2].content.contains("are cats mammals?"));
        assert!(messages[2].content.contains("ARTICLE ID: p1"));
    }

    #[test]
    fn flatten_mode_is_a_single_message_with_same_content() {
        let flattened = build(
            PromptMode::Flatten,
            &PromptTemplate::default(),
            "are cats mammals?",
            &passages(),
            &[],
        );

        assert_eq!(flattened.len(), 1);
        assert_eq!(flattened[0].role, "user");
        assert!(flattened[0].content.contains("are cats mammals?"));
        assert!(flattened[0].content.contains("ARTICLE ID: p2"));
    }

    #[test]
    fn empty_context_renders_empty() {
        assert_eq!(render_context(&[]), "");
    }
}
