use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn of a conversation, text only. The gateway accepts richer
/// content-block arrays on the wire; they are flattened through
/// [`extract_prompt_text`] before reaching the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Flatten a wire-format `messages` array into its joined text content.
///
/// Accepts plain-string content as well as OpenAI/Anthropic content-block
/// arrays (`{"type":"text","text":...}` objects or bare strings); non-text
/// blocks (images, audio) are skipped.
pub fn extract_prompt_text(messages: &[Value]) -> String {
    let mut parts: Vec<String> = Vec::new();
    for message in messages {
        match message.get("content") {
            Some(Value::String(s)) => parts.push(s.clone()),
            Some(Value::Array(items)) => {
                for item in items {
                    match item {
                        Value::String(s) => parts.push(s.clone()),
                        Value::Object(obj) => {
                            let text = obj
                                .get("text")
                                .or_else(|| obj.get("content"))
                                .and_then(|v| v.as_str());
                            if let Some(text) = text {
                                parts.push(text.to_string());
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }
    parts.join(" ").trim().to_string()
}

/// Parse a wire-format `messages` array into typed chat messages, flattening
/// content blocks to text. Messages without a recognizable role default to
/// `user`.
pub fn parse_messages(messages: &[Value]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.get("role").and_then(|r| r.as_str()) {
                Some("assistant") => Role::Assistant,
                Some("system") => Role::System,
                _ => Role::User,
            };
            let content = extract_prompt_text(std::slice::from_ref(m));
            ChatMessage { role, content }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_string_content() {
        let messages = vec![json!({"role": "user", "content": "hello world"})];
        assert_eq!(extract_prompt_text(&messages), "hello world");
    }

    #[test]
    fn extracts_content_blocks() {
        let messages = vec![json!({
            "role": "user",
            "content": [
                {"type": "text", "text": "part one"},
                {"type": "image_url", "image_url": {"url": "http://x/y.png"}},
                "part two",
            ],
        })];
        assert_eq!(extract_prompt_text(&messages), "part one part two");
    }

    #[test]
    fn joins_multiple_messages() {
        let messages = vec![
            json!({"role": "system", "content": "be brief"}),
            json!({"role": "user", "content": "hi"}),
        ];
        assert_eq!(extract_prompt_text(&messages), "be brief hi");
        let parsed = parse_messages(&messages);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].role, Role::System);
        assert_eq!(parsed[1].content, "hi");
    }
}
