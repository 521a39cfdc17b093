//! CLI error type.

use std::fmt;

use feedcache::FeedError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is invalid.
    Config(String),
    /// The async runtime could not be started.
    Runtime(String),
    /// The feed engine reported an error.
    Feed(FeedError),
    /// Output could not be produced.
    Output(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => 2,
            CliError::Runtime(_) | CliError::Feed(_) | CliError::Output(_) => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            CliError::Feed(e) => write!(f, "{}", e),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl From<FeedError> for CliError {
    fn from(e: FeedError) -> Self {
        match e {
            FeedError::Config(msg) => CliError::Config(msg),
            other => CliError::Feed(other),
        }
    }
}
