//! Append-only conversation history.

use proto::{Message, Role};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered messages of one conversation. The only mutation is append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHistory {
    id: Uuid,
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
        }
    }

    /// Starts a conversation with a user message.
    pub fn with_user(content: impl Into<String>) -> Self {
        let mut history = Self::new();
        history.push(Message::user(content));
        history
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Returns `true` when the history already opens with a system message.
    pub fn has_system_prompt(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == Role::System)
    }

    /// Tool-result messages answering `call_id`.
    pub fn results_for<'a>(&'a self, call_id: &'a str) -> impl Iterator<Item = &'a Message> {
        self.messages
            .iter()
            .filter(move |m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl Extend<Message> for ConversationHistory {
    fn extend<I: IntoIterator<Item = Message>>(&mut self, iter: I) {
        self.messages.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_keep_order() {
        let mut history = ConversationHistory::with_user("hi");
        history.push(Message::assistant("hello"));
        history.extend([Message::user("again")]);

        let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);
        assert!(!history.has_system_prompt());
        assert_eq!(history.last().map(|m| m.content.as_str()), Some("again"));
    }

    #[test]
    fn results_are_found_by_call_id() {
        let mut history = ConversationHistory::new();
        history.push(Message::system("sys"));
        history.push(Message::tool_result("c1", "t", "one"));
        history.push(Message::tool_result("c2", "t", "two"));

        assert!(history.has_system_prompt());
        let found: Vec<&str> = history.results_for("c2").map(|m| m.content.as_str()).collect();
        assert_eq!(found, ["two"]);
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(ConversationHistory::new().id(), ConversationHistory::new().id());
    }
}
