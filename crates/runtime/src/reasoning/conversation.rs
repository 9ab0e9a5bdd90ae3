//! Reasoning transcript
//!
//! An ordered list of [`AgentMessage`]s exchanged between the moderation
//! instruction, the submitted content, the model and the tools.

use serde::{Deserialize, Serialize};

use super::inference::ToolCallRequest;

/// Role of a message in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: MessageRole,
    /// May be empty for an assistant message that only requests tools.
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool results: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl AgentMessage {
    fn plain(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(MessageRole::Assistant, content)
    }

    /// Assistant turn that requests tools. Any accompanying text is kept.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(MessageRole::Assistant, content)
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(MessageRole::Tool, content)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<AgentMessage>,
}

impl Transcript {
    /// Seed a transcript with the instruction and the content under review.
    pub fn seeded(instruction: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            messages: vec![AgentMessage::system(instruction), AgentMessage::user(content)],
        }
    }

    pub fn push(&mut self, message: AgentMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[AgentMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::Tool)
            .count()
    }

    /// Serialize to the OpenAI chat completions `messages` array.
    pub fn to_chat_messages(&self) -> Vec<serde_json::Value> {
        self.messages
            .iter()
            .map(|msg| {
                let mut obj = serde_json::Map::new();
                obj.insert("role".into(), msg.role.as_str().into());

                if !msg.content.is_empty() || msg.role != MessageRole::Assistant {
                    obj.insert("content".into(), msg.content.clone().into());
                }

                if !msg.tool_calls.is_empty() {
                    let calls: Vec<serde_json::Value> = msg
                        .tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {
                                    "name": tc.name,
                                    "arguments": tc.arguments,
                                }
                            })
                        })
                        .collect();
                    obj.insert("tool_calls".into(), serde_json::Value::Array(calls));
                }

                if let Some(id) = &msg.tool_call_id {
                    obj.insert("tool_call_id".into(), id.clone().into());
                }

                serde_json::Value::Object(obj)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_transcript_has_instruction_then_content() {
        let t = Transcript::seeded("judge this", "hello");
        assert_eq!(t.len(), 2);
        assert_eq!(t.messages()[0].role, MessageRole::System);
        assert_eq!(t.messages()[1].content, "hello");
    }

    #[test]
    fn chat_messages_carry_tool_calls_and_results() {
        let mut t = Transcript::seeded("sys", "user");
        t.push(AgentMessage::assistant_tool_calls(
            "",
            vec![ToolCallRequest {
                id: "call_1".into(),
                name: "search_similar_cases".into(),
                arguments: r#"{"keyword":"casino"}"#.into(),
            }],
        ));
        t.push(AgentMessage::tool_result("call_1", "[]"));

        let msgs = t.to_chat_messages();
        assert_eq!(msgs.len(), 4);
        assert!(msgs[2].get("content").is_none());
        assert_eq!(msgs[2]["tool_calls"][0]["function"]["name"], "search_similar_cases");
        assert_eq!(msgs[3]["role"], "tool");
        assert_eq!(msgs[3]["tool_call_id"], "call_1");
        assert_eq!(t.tool_result_count(), 1);
    }
}
