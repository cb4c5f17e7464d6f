//! Conversation memory: the agent's ordered message log.
//!
//! Memory is append-only from the agent's point of view: messages are never
//! reordered, deduplicated or edited. The order is the model's context window.

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::{Message, MessageContent, MessageToolCall, Role};

/// Role-specific extras for [`Memory::append`].
///
/// `tool_calls` applies to assistant messages, `tool_call_id` and `name` to
/// tool replies. Fields that do not apply to the role are ignored.
#[derive(Debug, Clone, Default)]
pub struct ToolReply {
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
    pub tool_calls: Vec<MessageToolCall>,
}

impl ToolReply {
    /// Extras for a tool-role reply to `tool_call_id` from tool `name`.
    pub fn new(tool_call_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            tool_calls: Vec::new(),
        }
    }

    /// Extras for an assistant message proposing `tool_calls`.
    pub fn calls(tool_calls: Vec<MessageToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::default()
        }
    }
}

/// An ordered sequence of messages owned by exactly one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    messages: Vec<Message>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an already-built message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a message given its role name.
    ///
    /// Fails with [`MemoryError::UnsupportedRole`] for an unknown role, in which
    /// case memory is left untouched.
    pub fn append(
        &mut self,
        role: &str,
        content: impl Into<MessageContent>,
        base64_image: Option<String>,
        extra: ToolReply,
    ) -> Result<(), MemoryError> {
        let role: Role = role.parse()?;
        let mut message = match role {
            Role::User => Message::user(content),
            Role::System => Message::system(content),
            Role::Assistant => Message::assistant_with_tool_calls(content, extra.tool_calls),
            Role::Tool => Message::tool_result(
                extra.tool_call_id.unwrap_or_default(),
                extra.name.unwrap_or_default(),
                content,
            ),
        };
        message.base64_image = base64_image;
        self.push(message);
        Ok(())
    }

    /// The most recent `n` messages, oldest first.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
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

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_insertion_order() {
        let mut memory = Memory::new();
        memory.append("system", "be brief", None, ToolReply::default()).unwrap();
        memory.append("user", "first", None, ToolReply::default()).unwrap();
        memory.append("assistant", "second", None, ToolReply::default()).unwrap();
        memory
            .append("tool", "third", None, ToolReply::new("call_1", "echo"))
            .unwrap();

        let texts: Vec<String> = memory.messages().iter().map(|m| m.text().into_owned()).collect();
        assert_eq!(texts, vec!["be brief", "first", "second", "third"]);
        assert_eq!(memory.messages()[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn unknown_role_leaves_memory_untouched() {
        let mut memory = Memory::new();
        memory.append("user", "hello", None, ToolReply::default()).unwrap();

        let err = memory
            .append("moderator", "nope", None, ToolReply::default())
            .unwrap_err();
        assert_eq!(err, MemoryError::UnsupportedRole("moderator".into()));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn recent_returns_tail_in_order() {
        let mut memory = Memory::new();
        for i in 0..5 {
            memory.push(Message::user(format!("m{i}")));
        }
        let tail: Vec<String> = memory.recent(2).iter().map(|m| m.text().into_owned()).collect();
        assert_eq!(tail, vec!["m3", "m4"]);
        assert_eq!(memory.recent(10).len(), 5);
        assert_eq!(memory.len(), 5);
    }

    #[test]
    fn append_keeps_image_and_tool_calls() {
        let mut memory = Memory::new();
        let call = MessageToolCall {
            id: "c1".into(),
            name: "terminate".into(),
            arguments: "{}".into(),
        };
        memory
            .append("assistant", "", Some("aGk=".into()), ToolReply::calls(vec![call.clone()]))
            .unwrap();
        let last = memory.last().unwrap();
        assert_eq!(last.tool_calls, vec![call]);
        assert_eq!(last.base64_image.as_deref(), Some("aGk="));
    }
}
