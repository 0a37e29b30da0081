// src/config/mod.rs
// Configuration for the worker, the resolver and the answer protocol

pub mod env;
pub mod file;

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{InterposeError, Result};
use crate::interposer::classify::QUESTION_TOOL_NAME;
use crate::interposer::framer::DEFAULT_MAX_FRAME_BYTES;

pub use file::FileConfig;

/// Default bound on one resolver invocation
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(120);

/// Tools the resolver may ever be granted. None of them can modify state.
pub const READ_ONLY_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "LS",
    "NotebookRead",
    "WebFetch",
    "WebSearch",
];

// ============================================================================
// Protocol Options
// ============================================================================

/// Shape of the answer envelope the worker's protocol revision expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AnswerFormat {
    /// Standalone `user_input_result` record with index answers
    #[default]
    UserInputResult,
    /// User turn carrying a `tool_result` block with label answers
    ToolResult,
}

impl AnswerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserInputResult => "user-input-result",
            Self::ToolResult => "tool-result",
        }
    }
}

impl FromStr for AnswerFormat {
    type Err = InterposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "user-input-result" => Ok(Self::UserInputResult),
            "tool-result" => Ok(Self::ToolResult),
            other => Err(InterposeError::Config(format!("unknown answer format '{}'", other))),
        }
    }
}

/// How the worker's input and output are connected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Independent stdin, stdout and stderr pipes
    #[default]
    Pipes,
    /// One pseudo-terminal shared by input and output (echoes input)
    Pty,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipes => "pipes",
            Self::Pty => "pty",
        }
    }

    /// Whether input and output travel over the same channel
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Pty)
    }
}

impl FromStr for TransportKind {
    type Err = InterposeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pipes" | "pipe" => Ok(Self::Pipes),
            "pty" => Ok(Self::Pty),
            other => Err(InterposeError::Config(format!("unknown transport '{}'", other))),
        }
    }
}

// ============================================================================
// Resolver Capabilities
// ============================================================================

/// Non-empty set of read-only tools granted to the resolver.
///
/// Construction rejects anything outside [`READ_ONLY_TOOLS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyTools(Vec<String>);

impl ReadOnlyTools {
    pub fn new<I, S>(tools: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut granted: Vec<String> = Vec::new();
        for tool in tools {
            let tool = tool.as_ref().trim();
            if tool.is_empty() {
                continue;
            }
            if !READ_ONLY_TOOLS.contains(&tool) {
                return Err(InterposeError::Config(format!(
                    "resolver tool '{}' is not read-only (allowed: {})",
                    tool,
                    READ_ONLY_TOOLS.join(", ")
                )));
            }
            if !granted.iter().any(|t| t == tool) {
                granted.push(tool.to_string());
            }
        }

        if granted.is_empty() {
            return Err(InterposeError::Config(
                "resolver tool set must not be empty".to_string(),
            ));
        }
        Ok(Self(granted))
    }

    /// Parse a comma-separated list
    pub fn parse(list: &str) -> Result<Self> {
        Self::new(list.split(','))
    }

    /// Value for the resolver's `--allowedTools` flag
    pub fn as_arg(&self) -> String {
        self.0.join(",")
    }
}

impl Default for ReadOnlyTools {
    fn default() -> Self {
        Self(vec!["Read".to_string(), "Glob".to_string(), "Grep".to_string()])
    }
}

// ============================================================================
// Interposer Configuration
// ============================================================================

/// Configuration for one interposed run
#[derive(Debug, Clone)]
pub struct InterposerConfig {
    /// Path to the worker binary (default: "claude")
    pub worker_binary: String,
    /// Arguments placed before the generated worker flags
    pub worker_args: Vec<String>,
    /// Path to the resolver binary (default: "claude")
    pub resolver_binary: String,
    /// Arguments placed before the generated resolver flags
    pub resolver_args: Vec<String>,
    pub resolver_tools: ReadOnlyTools,
    pub resolver_timeout: Duration,
    /// Tool name that marks an interactive question
    pub question_tool: String,
    pub answer_format: AnswerFormat,
    pub transport: TransportKind,
    pub max_frame_bytes: usize,
    /// Working directory for both processes (default: inherited)
    pub working_dir: Option<PathBuf>,
}

impl Default for InterposerConfig {
    fn default() -> Self {
        Self {
            worker_binary: "claude".to_string(),
            worker_args: Vec::new(),
            resolver_binary: "claude".to_string(),
            resolver_args: Vec::new(),
            resolver_tools: ReadOnlyTools::default(),
            resolver_timeout: DEFAULT_RESOLVER_TIMEOUT,
            question_tool: QUESTION_TOOL_NAME.to_string(),
            answer_format: AnswerFormat::default(),
            transport: TransportKind::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            working_dir: None,
        }
    }
}

impl InterposerConfig {
    /// Defaults, overlaid with the config file and then the environment.
    ///
    /// An explicit `path` must exist and parse; the default location is
    /// optional.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = Self::default();
        let file = match path {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::load_default(),
        };
        file.apply(&mut config)?;
        env::apply_env(&mut config)?;
        Ok(config)
    }

    /// Check invariants that individual setters cannot
    pub fn validate(&self) -> Result<()> {
        if self.worker_binary.trim().is_empty() {
            return Err(InterposeError::Config("worker binary is empty".to_string()));
        }
        if self.resolver_binary.trim().is_empty() {
            return Err(InterposeError::Config("resolver binary is empty".to_string()));
        }
        if self.question_tool.trim().is_empty() {
            return Err(InterposeError::Config("question tool name is empty".to_string()));
        }
        if self.resolver_timeout.is_zero() {
            return Err(InterposeError::Config("resolver timeout must be positive".to_string()));
        }
        if self.max_frame_bytes < DEFAULT_MAX_FRAME_BYTES {
            return Err(InterposeError::Config(format!(
                "max frame size {} is below the {} byte floor",
                self.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = InterposerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolver_tools.as_arg(), "Read,Glob,Grep");
        assert_eq!(config.question_tool, "AskUserQuestion");
        assert_eq!(config.answer_format, AnswerFormat::UserInputResult);
        assert_eq!(config.transport, TransportKind::Pipes);
    }

    #[test]
    fn test_read_only_tools_reject_mutating() {
        for tool in ["Edit", "Write", "Bash", "NotebookEdit"] {
            let err = ReadOnlyTools::parse(&format!("Read,{}", tool)).unwrap_err();
            assert!(err.to_string().contains(tool));
        }
    }

    #[test]
    fn test_read_only_tools_parse() {
        let tools = ReadOnlyTools::parse(" Read , Grep,,Read ").unwrap();
        assert_eq!(tools.as_arg(), "Read,Grep");
        assert!(ReadOnlyTools::parse("").is_err());
        assert!(ReadOnlyTools::parse(" , ").is_err());
    }

    #[test]
    fn test_frame_floor_enforced() {
        let config = InterposerConfig {
            max_frame_bytes: 4096,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(InterposeError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = InterposerConfig {
            resolver_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!("tool_result".parse::<AnswerFormat>().ok(), Some(AnswerFormat::ToolResult));
        assert_eq!(" USER-INPUT-RESULT".parse::<AnswerFormat>().ok(), Some(AnswerFormat::UserInputResult));
        assert!(matches!("xml".parse::<AnswerFormat>(), Err(InterposeError::Config(_))));
        assert_eq!("PTY".parse::<TransportKind>().ok(), Some(TransportKind::Pty));
        assert!("socket".parse::<TransportKind>().is_err());
        assert!(TransportKind::Pty.is_shared());
        assert!(!TransportKind::Pipes.is_shared());
    }
}
