//! Conversation types: roles, turns, and the ordered history.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The author of a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuthorRole {
    System,
    User,
    Assistant,
}

impl AuthorRole {
    /// Canonical lowercase token used in prompts.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorRole::System => "system",
            AuthorRole::User => "user",
            AuthorRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for AuthorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: AuthorRole,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: AuthorRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Ordered, append-only sequence of turns. Insertion order is turn order.
///
/// Owned by the caller. The core reads it to build a prompt and appends one
/// assistant turn after a completed blocking generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(AuthorRole::System, content));
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(AuthorRole::User, content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(ConversationTurn::new(AuthorRole::Assistant, content));
    }

    /// Content of the most recent user turn, used for log context.
    pub fn last_user_message(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == AuthorRole::User)
            .map(|turn| turn.content.as_str())
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<ConversationTurn>> for ConversationHistory {
    fn from(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }
}

impl<'a> IntoIterator for &'a ConversationHistory {
    type Item = &'a ConversationTurn;
    type IntoIter = std::slice::Iter<'a, ConversationTurn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
