//! Answer envelopes written back to the worker
//!
//! Two protocol revisions are in use and neither is self-describing in the
//! stream, so the shape is chosen by configuration:
//!
//! - `user_input_result`: `{"type":"user_input_result","answer":{"tool_use_id":..,"answers":{"q0":"1"}}}`
//! - tool result: a `user` turn with a `tool_result` block keyed by the
//!   invocation id, answers given by option label.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use tracing::debug;

use super::types::{AnswerSet, QuestionRequest};
use crate::config::AnswerFormat;
use crate::error::Result;

/// Serialized answer line, terminated with `\n` like the worker's own output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEnvelope {
    request_id: String,
    bytes: Vec<u8>,
}

#[derive(Serialize)]
struct UserInputResult<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    answer: UserInputAnswer<'a>,
}

#[derive(Serialize)]
struct UserInputAnswer<'a> {
    tool_use_id: &'a str,
    answers: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct UserTurn<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserTurnMessage<'a>,
}

#[derive(Serialize)]
struct UserTurnMessage<'a> {
    role: &'static str,
    content: Vec<ToolResultBlock<'a>>,
}

#[derive(Serialize)]
struct ToolResultBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    tool_use_id: &'a str,
    content: String,
}

impl AnswerEnvelope {
    pub fn build(format: AnswerFormat, request: &QuestionRequest, answers: &AnswerSet) -> Result<Self> {
        let mut bytes = match format {
            AnswerFormat::UserInputResult => serde_json::to_vec(&UserInputResult {
                kind: "user_input_result",
                answer: UserInputAnswer {
                    tool_use_id: &request.request_id,
                    answers: answers
                        .iter()
                        .map(|(ordinal, idx)| (AnswerSet::key(ordinal), idx.to_string()))
                        .collect(),
                },
            })?,
            AnswerFormat::ToolResult => serde_json::to_vec(&UserTurn {
                kind: "user",
                message: UserTurnMessage {
                    role: "user",
                    content: vec![ToolResultBlock {
                        kind: "tool_result",
                        tool_use_id: &request.request_id,
                        content: describe_answers(request, answers),
                    }],
                },
            })?,
        };
        bytes.push(b'\n');

        Ok(Self {
            request_id: request.request_id.clone(),
            bytes,
        })
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Full line including the terminator
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Line content without the terminator, as the framer would yield it
    pub fn line(&self) -> &[u8] {
        &self.bytes[..self.bytes.len() - 1]
    }
}

/// Tool result text naming the chosen label for each question
fn describe_answers(request: &QuestionRequest, answers: &AnswerSet) -> String {
    let pairs = request
        .questions
        .iter()
        .enumerate()
        .map(|(ordinal, q)| {
            let label = answers
                .get(ordinal)
                .and_then(|idx| q.options.get(idx))
                .or_else(|| q.options.first())
                .map(|o| o.label.as_str())
                .unwrap_or_default();
            format!("\"{}\"=\"{}\"", q.text, label)
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "User has answered your questions: {}. You can now continue with the user's answers in mind.",
        pairs
    )
}

/// Prefix every envelope of the given shape starts with
pub fn echo_marker(format: AnswerFormat) -> &'static [u8] {
    match format {
        AnswerFormat::UserInputResult => br#"{"type":"user_input_result""#,
        AnswerFormat::ToolResult => br#"{"type":"user""#,
    }
}

const MAX_PENDING_ECHOES: usize = 8;

/// Recognizes our own answers echoed back on a shared channel
#[derive(Debug)]
pub struct EchoGuard {
    marker: &'static [u8],
    pending: VecDeque<Vec<u8>>,
}

impl EchoGuard {
    pub fn new(format: AnswerFormat) -> Self {
        Self {
            marker: echo_marker(format),
            pending: VecDeque::new(),
        }
    }

    /// Remember an envelope before it is written
    pub fn record(&mut self, envelope: &AnswerEnvelope) {
        if self.pending.len() == MAX_PENDING_ECHOES {
            self.pending.pop_front();
            debug!("Echo guard full, forgetting oldest pending answer");
        }
        debug!(request_id = envelope.request_id(), "Expecting answer echo");
        self.pending.push_back(envelope.line().to_vec());
    }

    /// True if `line` is the echo of a recorded envelope. Each recorded
    /// envelope is matched at most once.
    pub fn is_echo(&mut self, line: &[u8]) -> bool {
        if !line.starts_with(self.marker) {
            return false;
        }
        match self.pending.iter().position(|p| p == line) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }
}
