//! Question Interposer
//!
//! Sits between a caller and a long-running stream-json worker, answering
//! the worker's interactive questions by consulting a read-only resolver.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WORKER (spawned)                          │
//! │  • --output-format stream-json / --input-format stream-json  │
//! │  • --dangerously-skip-permissions                            │
//! └─────────────────────────────────────────────────────────────┘
//!            │ stdout (or shared pty)              ▲ stdin
//!            ▼                                     │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Interposer                                │
//! │  • LineFramer - bytes to lines (1 MiB frames)                │
//! │  • EchoGuard - drops our own answers echoed on a pty         │
//! │  • classify() - envelope kind, raw bytes kept                │
//! │  • extract_question_request() - AskUserQuestion detection    │
//! │  • AnswerEnvelope - user_input_result / tool_result          │
//! └─────────────────────────────────────────────────────────────┘
//!            │ transcript (stdout)                 │ resolve()
//!            ▼                                     ▼
//!        observer               ┌───────────────────────────────┐
//!                               │  RESOLVER (one shot)          │
//!                               │  • -p <rendered prompt>       │
//!                               │  • --allowedTools Read,Glob.. │
//!                               └───────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = InterposerConfig::load(None)?;
//! let interposer = Interposer::from_config(config)?;
//!
//! let summary = interposer.run("Refactor the parser", tokio::io::stdout()).await?;
//! std::process::exit(summary.exit_code);
//! ```

pub mod answer;
pub mod classify;
pub mod framer;
pub mod orchestrator;
pub mod resolver;
pub mod transport;
pub mod types;

pub use answer::{AnswerEnvelope, EchoGuard};
pub use classify::{EnvelopeKind, StreamEnvelope, classify, extract_question_request};
pub use framer::LineFramer;
pub use orchestrator::Interposer;
pub use resolver::{Resolution, Resolve, ResolverBridge, parse_selection, render_prompt};
pub use types::{AnswerSet, InterposerState, Question, QuestionOption, QuestionRequest, RunSummary};
