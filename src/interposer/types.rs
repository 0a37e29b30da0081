//! Types for the interposer
//!
//! Question requests decoded from the worker stream, the answers chosen for
//! them, and the orchestrator's lifecycle state.

use serde::{Deserialize, Serialize};

use crate::error::{InterposeError, Result};

// ============================================================================
// Question Requests
// ============================================================================

/// An interactive question request embedded in an assistant turn.
///
/// Lives only between detection and answer dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRequest {
    /// Identifier of the originating tool invocation
    pub request_id: String,
    /// Questions in the order the worker asked them (never empty)
    pub questions: Vec<Question>,
}

/// A single question with its enumerated options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "question")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Never empty
    pub options: Vec<QuestionOption>,
    #[serde(rename = "multiSelect", default)]
    pub allow_multiple_select: bool,
}

/// Option for a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl QuestionRequest {
    /// Answer set selecting the first option of every question
    pub fn default_answers(&self) -> AnswerSet {
        AnswerSet {
            selections: vec![0; self.questions.len()],
        }
    }
}

// ============================================================================
// Answers
// ============================================================================

/// One selected option index per question, keyed by ordinal position.
///
/// Always holds exactly as many entries as the request it answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerSet {
    selections: Vec<usize>,
}

impl AnswerSet {
    /// Build an answer set for `request`, clamping every selection into the
    /// valid option range of its question. Missing or out-of-range entries
    /// fall back to the first option.
    pub fn for_request(request: &QuestionRequest, selections: &[usize]) -> Self {
        let selections = request
            .questions
            .iter()
            .enumerate()
            .map(|(i, q)| match selections.get(i) {
                Some(&idx) if idx < q.options.len() => idx,
                _ => 0,
            })
            .collect();
        Self { selections }
    }

    pub fn len(&self) -> usize {
        self.selections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Selected option index for the question at `ordinal`
    pub fn get(&self, ordinal: usize) -> Option<usize> {
        self.selections.get(ordinal).copied()
    }

    /// Stable question key used on the wire (`q0`, `q1`, ...)
    pub fn key(ordinal: usize) -> String {
        format!("q{}", ordinal)
    }

    /// Iterate `(ordinal, selected index)` pairs in question order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.selections.iter().copied().enumerate()
    }
}

// ============================================================================
// Orchestrator Lifecycle
// ============================================================================

/// State of the interposer for one worker invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterposerState {
    /// Worker not yet launched
    Idle,
    /// Forwarding worker output, no question outstanding
    Running,
    /// A resolve cycle is in flight; output keeps draining
    AwaitingAnswer,
    /// Worker output closed and exit status collected
    Terminated,
}

impl InterposerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::AwaitingAnswer => "awaiting_answer",
            Self::Terminated => "terminated",
        }
    }
}

/// Outcome of a complete interposed run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Worker exit status (-1 when killed by a signal)
    pub exit_code: i32,
    pub lines_forwarded: u64,
    pub questions_answered: u64,
    pub resolver_failures: u64,
    pub answer_write_failures: u64,
    /// Question requests ignored because another was still outstanding
    pub questions_rejected: u64,
    pub echoes_discarded: u64,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The worker's exit status as a result, for callers that treat a
    /// failed worker as an error
    pub fn exit_status(&self) -> Result<()> {
        if self.success() {
            Ok(())
        } else {
            Err(InterposeError::WorkerExit(self.exit_code))
        }
    }
}
