//! Conversation memory: the ordered turns of one session.

use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking.
    User,
    /// The router's answer.
    Assistant,
}

impl Role {
    /// Get the role name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    /// A user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// An assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Append-only sequence of turns.
///
/// The single exception to append-only is [`ConversationMemory::replace_last_assistant`],
/// used when a reviewer edits an answer that was already recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    turns: Vec<Turn>,
}

impl ConversationMemory {
    /// Empty memory for a new session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// All turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recent turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Text of the most recent assistant turn anywhere in the history.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.text.as_str())
    }

    /// Replace the text of the trailing turn if it is an assistant turn,
    /// otherwise append a new assistant turn.
    ///
    /// Only the trailing turn is eligible: an assistant turn followed by a
    /// user turn belongs to an earlier exchange and is never rewritten.
    pub fn replace_last_assistant(&mut self, text: impl Into<String>) {
        match self.turns.last_mut() {
            Some(turn) if turn.role == Role::Assistant => turn.text = text.into(),
            _ => self.turns.push(Turn::assistant(text)),
        }
    }

    /// Render the history as `role: text` lines for prompting.
    pub fn transcript(&self) -> String {
        self.turns
            .iter()
            .map(|t| format!("{}: {}", t.role, t.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_new_memory_is_empty() {
        let memory = ConversationMemory::new();
        assert!(memory.is_empty());
        assert!(memory.last().is_none());
        assert!(memory.last_assistant_text().is_none());
    }

    #[test]
    fn test_push_preserves_order() {
        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("q1"));
        memory.push(Turn::assistant("a1"));
        assert_eq!(memory.turns(), &[Turn::user("q1"), Turn::assistant("a1")]);
    }

    #[test]
    fn test_replace_trailing_assistant_turn() {
        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("q1"));
        memory.push(Turn::assistant("draft"));
        memory.replace_last_assistant("edited");

        assert_eq!(memory.len(), 2);
        assert_eq!(memory.last(), Some(&Turn::assistant("edited")));
    }

    #[test]
    fn test_replace_appends_after_pending_user_turn() {
        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("q1"));
        memory.push(Turn::assistant("a1"));
        memory.push(Turn::user("q2"));
        memory.replace_last_assistant("a2 edited");

        assert_eq!(
            memory.turns(),
            &[
                Turn::user("q1"),
                Turn::assistant("a1"),
                Turn::user("q2"),
                Turn::assistant("a2 edited"),
            ]
        );
    }

    #[test]
    fn test_transcript_format() {
        let mut memory = ConversationMemory::new();
        memory.push(Turn::user("When is the exam?"));
        memory.push(Turn::assistant("Friday."));
        assert_eq!(memory.transcript(), "user: When is the exam?\nassistant: Friday.");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Turn::assistant("x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","text":"x"}"#);
    }
}
