//! Transcript reconstruction
//!
//! Replays stored records into a flat message list: for each record, the
//! request's `messages[]` in order, then every assistant message found in
//! the response's `choices[]`. A broken record only loses its broken part.

use crate::db::DispatchRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Chat message as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role(), self.content())
    }
}

/// Which half of a record a problem was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordPart {
    Request,
    Response,
}

/// A portion of a record that could not be replayed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub sequence_id: i64,
    pub part: RecordPart,
    pub reason: String,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let part = match self.part {
            RecordPart::Request => "request",
            RecordPart::Response => "response",
        };
        write!(f, "record {} {part}: {}", self.sequence_id, self.reason)
    }
}

/// Reconstructed conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    pub messages: Vec<Message>,
    /// Skipped portions, in record order
    pub errors: Vec<RecordError>,
}

impl Transcript {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Rebuild the transcript from records already in timestamp order
pub fn reconstruct(records: &[DispatchRecord]) -> Transcript {
    let mut transcript = Transcript::default();
    for record in records {
        replay_request(record, &mut transcript);
        replay_response(record, &mut transcript);
    }
    transcript
}

fn replay_request(record: &DispatchRecord, transcript: &mut Transcript) {
    let mut note = |reason: String| {
        transcript.errors.push(RecordError {
            sequence_id: record.sequence_id,
            part: RecordPart::Request,
            reason,
        });
    };

    let root: Value = match serde_json::from_str(&record.request_payload) {
        Ok(root) => root,
        Err(e) => return note(format!("not valid JSON: {e}")),
    };
    let Some(messages) = root.get("messages").and_then(Value::as_array) else {
        return note("no `messages` array".to_string());
    };

    let mut decoded = Vec::with_capacity(messages.len());
    for (index, raw) in messages.iter().enumerate() {
        match Message::deserialize(raw) {
            Ok(message) => decoded.push(message),
            Err(e) => note(format!("messages[{index}] skipped: {e}")),
        }
    }
    transcript.messages.extend(decoded);
}

fn replay_response(record: &DispatchRecord, transcript: &mut Transcript) {
    let mut note = |reason: String| {
        transcript.errors.push(RecordError {
            sequence_id: record.sequence_id,
            part: RecordPart::Response,
            reason,
        });
    };

    let root: Value = match serde_json::from_str(&record.response_payload) {
        Ok(root) => root,
        Err(e) => return note(format!("not valid JSON: {e}")),
    };
    let Some(choices) = root.get("choices").and_then(Value::as_array) else {
        return note("no `choices` array".to_string());
    };

    let mut decoded = Vec::with_capacity(choices.len());
    for (index, choice) in choices.iter().enumerate() {
        let Some(raw) = choice.get("message") else {
            note(format!("choices[{index}] has no message"));
            continue;
        };
        match Message::deserialize(raw) {
            Ok(message @ Message::Assistant { .. }) => decoded.push(message),
            Ok(other) => note(format!(
                "choices[{index}] carries a {} message, expected assistant",
                other.role()
            )),
            Err(e) => note(format!("choices[{index}] skipped: {e}")),
        }
    }
    transcript.messages.extend(decoded);
}
