//! Conversation history used as follow-up context.

use crate::intent::QuerySpecification;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully answered question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub question: String,
    pub specification: QuerySpecification,
    pub answer: String,
    pub answered_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        question: impl Into<String>,
        specification: QuerySpecification,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            specification,
            answer: answer.into(),
            answered_at: Utc::now(),
        }
    }
}

/// Append-only history. Turns are pushed only once a question has
/// completed, so readers never observe a partial turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Most recent `window` turns, oldest first
    pub fn recent(&self, window: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    pub fn last_specification(&self) -> Option<&QuerySpecification> {
        self.turns.last().map(|t| &t.specification)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::IntentKind;

    #[test]
    fn test_recent_window() {
        let mut conversation = Conversation::new();
        for i in 0..7 {
            conversation.push(ConversationTurn::new(
                format!("q{}", i),
                QuerySpecification::new(IntentKind::Aggregate),
                "a",
            ));
        }
        let recent = conversation.recent(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].question, "q2");
        assert_eq!(conversation.recent(50).len(), 7);
    }

    #[test]
    fn test_last_specification() {
        let mut conversation = Conversation::new();
        assert!(conversation.last_specification().is_none());
        conversation.push(ConversationTurn::new(
            "total revenue",
            QuerySpecification::new(IntentKind::Trend),
            "a",
        ));
        assert_eq!(
            conversation.last_specification().map(|s| s.intent),
            Some(IntentKind::Trend)
        );
    }
}
