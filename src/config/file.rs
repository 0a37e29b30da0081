// src/config/file.rs
// File-based configuration from ~/.interpose/config.toml

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{AnswerFormat, InterposerConfig, ReadOnlyTools, TransportKind};
use crate::error::{InterposeError, Result};

/// Top-level config file structure. Every field is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub worker: WorkerSection,
    #[serde(default)]
    pub resolver: ResolverSection,
    #[serde(default)]
    pub protocol: ProtocolSection,
}

/// `[worker]` section
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
    pub transport: Option<TransportKind>,
    pub working_dir: Option<PathBuf>,
}

/// `[resolver]` section
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ResolverSection {
    pub binary: Option<String>,
    pub args: Option<Vec<String>>,
    pub tools: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
}

/// `[protocol]` section
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProtocolSection {
    pub answer_format: Option<AnswerFormat>,
    pub question_tool: Option<String>,
    pub max_frame_bytes: Option<usize>,
}

impl FileConfig {
    /// Load from ~/.interpose/config.toml, falling back to defaults
    pub fn load_default() -> Self {
        let path = Self::default_path();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Load from an explicit path; missing or malformed files are errors
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            InterposeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
            .map_err(|e| InterposeError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| InterposeError::Config(e.to_string()))
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".interpose")
            .join("config.toml")
    }

    /// Overlay the values present in the file onto `config`
    pub fn apply(self, config: &mut InterposerConfig) -> Result<()> {
        let Self {
            worker,
            resolver,
            protocol,
        } = self;

        if let Some(binary) = worker.binary {
            config.worker_binary = binary;
        }
        if let Some(args) = worker.args {
            config.worker_args = args;
        }
        if let Some(transport) = worker.transport {
            config.transport = transport;
        }
        if let Some(dir) = worker.working_dir {
            config.working_dir = Some(dir);
        }

        if let Some(binary) = resolver.binary {
            config.resolver_binary = binary;
        }
        if let Some(args) = resolver.args {
            config.resolver_args = args;
        }
        if let Some(tools) = resolver.tools {
            config.resolver_tools = ReadOnlyTools::new(tools)?;
        }
        if let Some(secs) = resolver.timeout_secs {
            config.resolver_timeout = Duration::from_secs(secs);
        }

        if let Some(format) = protocol.answer_format {
            config.answer_format = format;
        }
        if let Some(tool) = protocol.question_tool {
            config.question_tool = tool;
        }
        if let Some(max) = protocol.max_frame_bytes {
            config.max_frame_bytes = max;
        }
        Ok(())
    }
}
