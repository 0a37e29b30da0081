// src/config/env.rs
// Environment-based configuration overrides

use std::time::Duration;

use tracing::debug;

use super::{AnswerFormat, InterposerConfig, ReadOnlyTools, TransportKind};
use crate::error::{InterposeError, Result};

pub const ENV_WORKER_BINARY: &str = "INTERPOSE_WORKER_BINARY";
pub const ENV_RESOLVER_BINARY: &str = "INTERPOSE_RESOLVER_BINARY";
pub const ENV_RESOLVER_TIMEOUT_SECS: &str = "INTERPOSE_RESOLVER_TIMEOUT_SECS";
pub const ENV_RESOLVER_TOOLS: &str = "INTERPOSE_RESOLVER_TOOLS";
pub const ENV_ANSWER_FORMAT: &str = "INTERPOSE_ANSWER_FORMAT";
pub const ENV_TRANSPORT: &str = "INTERPOSE_TRANSPORT";
pub const ENV_MAX_FRAME_BYTES: &str = "INTERPOSE_MAX_FRAME_BYTES";
pub const ENV_QUESTION_TOOL: &str = "INTERPOSE_QUESTION_TOOL";

/// Apply overrides from the process environment
pub fn apply_env(config: &mut InterposerConfig) -> Result<()> {
    apply_env_with(config, read_var)
}

/// Read a single variable, filtering empty values
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Apply overrides using `lookup` as the variable source
pub fn apply_env_with<F>(config: &mut InterposerConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_WORKER_BINARY) {
        config.worker_binary = val;
    }
    if let Some(val) = lookup(ENV_RESOLVER_BINARY) {
        config.resolver_binary = val;
    }
    if let Some(val) = lookup(ENV_RESOLVER_TIMEOUT_SECS) {
        let secs: u64 = val.trim().parse().map_err(|_| invalid(ENV_RESOLVER_TIMEOUT_SECS, &val))?;
        config.resolver_timeout = Duration::from_secs(secs);
    }
    if let Some(val) = lookup(ENV_RESOLVER_TOOLS) {
        config.resolver_tools = ReadOnlyTools::parse(&val)?;
    }
    if let Some(val) = lookup(ENV_ANSWER_FORMAT) {
        config.answer_format = val
            .parse::<AnswerFormat>()
            .map_err(|_| invalid(ENV_ANSWER_FORMAT, &val))?;
    }
    if let Some(val) = lookup(ENV_TRANSPORT) {
        config.transport = val
            .parse::<TransportKind>()
            .map_err(|_| invalid(ENV_TRANSPORT, &val))?;
    }
    if let Some(val) = lookup(ENV_MAX_FRAME_BYTES) {
        config.max_frame_bytes = val.trim().parse().map_err(|_| invalid(ENV_MAX_FRAME_BYTES, &val))?;
    }
    if let Some(val) = lookup(ENV_QUESTION_TOOL) {
        config.question_tool = val;
    }

    debug!(
        worker = %config.worker_binary,
        resolver = %config.resolver_binary,
        format = config.answer_format.as_str(),
        transport = config.transport.as_str(),
        "Environment configuration applied"
    );
    Ok(())
}

fn invalid(name: &str, value: &str) -> InterposeError {
    InterposeError::Config(format!("invalid value for {}: '{}'", name, value))
}
