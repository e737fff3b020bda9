//! Conversation windowing: keeps the transport payload bounded by carrying
//! the system prompt plus only the last `N` user/assistant turn pairs,
//! instead of the whole run history.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// An append-only run history with a bounded view onto it.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    system_prompt: Option<Turn>,
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Conversation {
            system_prompt: Some(Turn {
                role: Role::System,
                content: system_prompt.into(),
            }),
            turns: Vec::new(),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The bounded transport view: the system prompt (if any), followed by
    /// the last `window_pairs` user/assistant pairs in original order. A
    /// trailing unpaired turn (e.g. a just-pushed user message awaiting a
    /// reply) is always kept.
    pub fn windowed(&self, window_pairs: usize) -> Vec<Turn> {
        let max_turns = window_pairs.saturating_mul(2);
        let start = self.turns.len().saturating_sub(max_turns);
        let mut windowed: Vec<Turn> = Vec::new();
        if let Some(system) = &self.system_prompt {
            windowed.push(system.clone());
        }
        windowed.extend(self.turns[start..].iter().cloned());
        windowed
    }
}
