//! Conversation history for a build.
//!
//! The log is append-only. Only the slice replayed to the model is bounded;
//! the stored turns are never truncated.

use serde::{Deserialize, Serialize};

use pagewright_types::conversation::{ConversationTurn, TurnRole};
use pagewright_types::llm::{ContentBlock, Message, MessageRole};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    turns: Vec<ConversationTurn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ConversationTurn>) -> Self {
        Self { turns }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `k` turns.
    pub fn window(&self, k: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    /// Model messages for the last `k` turns.
    ///
    /// The model requires a leading user message and alternating roles, so
    /// leading assistant turns are dropped and consecutive same-role turns
    /// are merged.
    pub fn to_messages(&self, k: usize) -> Vec<Message> {
        let mut messages: Vec<Message> = Vec::new();

        let window = self.window(k);
        let first_user = window
            .iter()
            .position(|t| t.role == TurnRole::User)
            .unwrap_or(window.len());

        for turn in &window[first_user..] {
            if turn.content.is_empty() {
                continue;
            }
            let role = match turn.role {
                TurnRole::User => MessageRole::User,
                TurnRole::Assistant => MessageRole::Assistant,
            };
            match messages.last_mut() {
                Some(last) if last.role == role => {
                    last.content.push(ContentBlock::Text {
                        text: turn.content.clone(),
                    });
                }
                _ => messages.push(Message {
                    role,
                    content: vec![ContentBlock::Text {
                        text: turn.content.clone(),
                    }],
                }),
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(n: usize) -> ConversationHistory {
        let mut h = ConversationHistory::new();
        for i in 0..n {
            if i % 2 == 0 {
                h.append(ConversationTurn::user(format!("u{i}")));
            } else {
                h.append(ConversationTurn::assistant(format!("a{i}")));
            }
        }
        h
    }

    #[test]
    fn test_window_bounds_only_the_slice() {
        let h = history(50);
        assert_eq!(h.window(40).len(), 40);
        assert_eq!(h.window(40)[0].content, "u10");
        assert_eq!(h.len(), 50);
        assert_eq!(h.window(100).len(), 50);
    }

    #[test]
    fn test_messages_start_with_user() {
        let h = history(5);
        // Window of 4 starts at "a1", which is dropped.
        let messages = h.to_messages(4);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].text(), "u2");
    }

    #[test]
    fn test_consecutive_turns_are_merged() {
        let mut h = ConversationHistory::new();
        h.append(ConversationTurn::user("first"));
        h.append(ConversationTurn::user("second"));
        h.append(ConversationTurn::assistant("reply"));
        let messages = h.to_messages(40);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content.len(), 2);
        assert_eq!(messages[1].role, MessageRole::Assistant);
    }

    #[test]
    fn test_empty_history_has_no_messages() {
        assert!(ConversationHistory::new().to_messages(40).is_empty());
        assert!(ConversationHistory::new().window(40).is_empty());
    }
}
