// src/lib.rs

pub mod config;
pub mod error;
pub mod interposer;

pub use config::InterposerConfig;
pub use error::{InterposeError, ResolverFailure, Result};
pub use interposer::{Interposer, RunSummary};
