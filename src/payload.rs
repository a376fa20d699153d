//! Chat payload builder

use crate::transcript::Message;
use serde::Serialize;

#[derive(Serialize)]
struct ChatPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata<'a>>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    tags: &'a [String],
}

/// Assembles the JSON text for one dispatch.
///
/// Blank message text and blank tags are dropped, matching what an empty
/// input box would mean.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    model: String,
    conversation_id: Option<String>,
    messages: Vec<Message>,
    tags: Vec<String>,
}

impl PayloadBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            conversation_id: None,
            messages: Vec::new(),
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.conversation_id = (!id.trim().is_empty()).then(|| id.trim().to_string());
        self
    }

    #[must_use]
    pub fn system(self, text: &str) -> Self {
        self.message(Message::system(text.trim()))
    }

    #[must_use]
    pub fn user(self, text: &str) -> Self {
        self.message(Message::user(text.trim()))
    }

    #[must_use]
    pub fn assistant(self, text: &str) -> Self {
        self.message(Message::assistant(text.trim()))
    }

    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        if !message.content().is_empty() {
            self.messages.push(message);
        }
        self
    }

    /// Comma-separated tag list, stored under `metadata.tags`
    #[must_use]
    pub fn tags(mut self, tags: &str) -> Self {
        self.tags.extend(
            tags.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from),
        );
        self
    }

    pub fn build(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&ChatPayload {
            conversation_id: self.conversation_id.as_deref(),
            model: &self.model,
            messages: &self.messages,
            metadata: (!self.tags.is_empty()).then_some(Metadata { tags: &self.tags }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaValidator;
    use serde_json::{json, Value};

    fn parsed(builder: &PayloadBuilder) -> Value {
        serde_json::from_str(&builder.build().unwrap()).unwrap()
    }

    #[test]
    fn test_minimal_payload() {
        let builder = PayloadBuilder::new("my-local-model").user("hi");
        assert_eq!(
            parsed(&builder),
            json!({
                "model": "my-local-model",
                "messages": [{ "role": "user", "content": "hi" }]
            })
        );
    }

    #[test]
    fn test_full_payload_passes_default_schema() {
        let builder = PayloadBuilder::new("m")
            .conversation_id(" conv-1 ")
            .system("be \"terse\"")
            .user("first")
            .user("   ")
            .user("second")
            .tags("rust, , sqlite ");

        assert_eq!(
            parsed(&builder),
            json!({
                "conversation_id": "conv-1",
                "model": "m",
                "messages": [
                    { "role": "system", "content": "be \"terse\"" },
                    { "role": "user", "content": "first" },
                    { "role": "user", "content": "second" }
                ],
                "metadata": { "tags": ["rust", "sqlite"] }
            })
        );

        SchemaValidator::new()
            .unwrap()
            .validate(&builder.build().unwrap())
            .unwrap();
    }

    #[test]
    fn test_blank_conversation_id_omitted() {
        let value = parsed(&PayloadBuilder::new("m").conversation_id("  "));
        assert!(value.get("conversation_id").is_none());
        assert_eq!(value["messages"], json!([]));
    }
}
