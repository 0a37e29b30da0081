//! Message classification for the worker's stream-json output
//!
//! Every framed line becomes a [`StreamEnvelope`]; only assistant turns are
//! decoded further, looking for an interactive question tool invocation.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::types::{Question, QuestionRequest};
use crate::error::{InterposeError, Result};

/// Tool name the worker uses for interactive questions
pub const QUESTION_TOOL_NAME: &str = "AskUserQuestion";

/// Kind of a stream envelope, from its `type` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    Assistant,
    User,
    System,
    Result,
    /// Well-formed envelope of a kind we do not interpret
    Other(String),
    /// Not a structured envelope at all
    Opaque,
}

impl EnvelopeKind {
    fn from_type(kind: &str) -> Self {
        match kind {
            "assistant" => Self::Assistant,
            "user" => Self::User,
            "system" => Self::System,
            "result" => Self::Result,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Assistant => "assistant",
            Self::User => "user",
            Self::System => "system",
            Self::Result => "result",
            Self::Other(kind) => kind,
            Self::Opaque => "opaque",
        }
    }
}

/// One line of worker output, decoded only as far as its kind.
///
/// The raw bytes are kept untouched for passthrough.
#[derive(Debug, Clone)]
pub struct StreamEnvelope {
    pub kind: EnvelopeKind,
    raw: Vec<u8>,
    message: Option<Value>,
}

impl StreamEnvelope {
    /// Original line bytes, exactly as framed
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }

    pub fn is_assistant_turn(&self) -> bool {
        self.kind == EnvelopeKind::Assistant
    }
}

#[derive(Deserialize)]
struct EnvelopeHead {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<Value>,
}

/// Classify a framed line. Never fails: anything that is not a JSON object
/// with a string `type` degrades to [`EnvelopeKind::Opaque`].
pub fn classify(line: Vec<u8>) -> StreamEnvelope {
    match serde_json::from_slice::<EnvelopeHead>(&line) {
        Ok(head) => StreamEnvelope {
            kind: EnvelopeKind::from_type(&head.kind),
            raw: line,
            message: head.message,
        },
        Err(e) => {
            trace!(error = %e, "Line is not a stream envelope");
            StreamEnvelope {
                kind: EnvelopeKind::Opaque,
                raw: line,
                message: None,
            }
        }
    }
}

/// Input of the question tool
#[derive(Deserialize)]
struct QuestionInput {
    questions: Vec<Question>,
}

/// Extract the question request carried by an assistant turn.
///
/// Returns `Ok(None)` for envelopes that are not assistant turns or carry no
/// question invocation. Only the first qualifying invocation is used. An
/// `Err` is a decode failure; callers treat it as "no question" and keep
/// forwarding the envelope.
pub fn extract_question_request(
    envelope: &StreamEnvelope,
    tool_name: &str,
) -> Result<Option<QuestionRequest>> {
    if !envelope.is_assistant_turn() {
        return Ok(None);
    }

    let message = envelope
        .message
        .as_ref()
        .ok_or_else(|| InterposeError::Decode("assistant turn without message".to_string()))?;

    let items = match message.get("content") {
        Some(Value::Array(items)) => items,
        // Plain text turns carry no tool invocations
        Some(Value::String(_)) | None => return Ok(None),
        Some(_) => {
            return Err(InterposeError::Decode(
                "assistant content is neither text nor a list".to_string(),
            ));
        }
    };

    let mut invocations = items.iter().filter(|item| {
        item.get("type").and_then(Value::as_str) == Some("tool_use")
            && item.get("name").and_then(Value::as_str) == Some(tool_name)
    });

    let Some(item) = invocations.next() else {
        return Ok(None);
    };

    let extra = invocations.count();
    if extra > 0 {
        debug!(extra, "Turn carries additional question invocations, acting on the first");
    }

    let request_id = item
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| InterposeError::Decode("question invocation without id".to_string()))?
        .to_string();

    let input = item
        .get("input")
        .cloned()
        .ok_or_else(|| InterposeError::Decode(format!("question {} has no input", request_id)))?;

    let input: QuestionInput = serde_json::from_value(input)
        .map_err(|e| InterposeError::Decode(format!("question {} input: {}", request_id, e)))?;

    if input.questions.is_empty() {
        return Err(InterposeError::Decode(format!(
            "question {} has no questions",
            request_id
        )));
    }
    if let Some(pos) = input.questions.iter().position(|q| q.options.is_empty()) {
        return Err(InterposeError::Decode(format!(
            "question {} #{} has no options",
            request_id,
            pos + 1
        )));
    }

    Ok(Some(QuestionRequest {
        request_id,
        questions: input.questions,
    }))
}
