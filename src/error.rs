//! Error types for the session, channel, tool and settings layers.

use thiserror::Error;

/// Failure opening or using a duplex channel.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// The remote side refused the credential.
    #[error("credential rejected: {0}")]
    Rejected(String),
    #[error("connection attempt timed out after {0} ms")]
    Timeout(u64),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("channel closed")]
    Closed,
}

impl ChannelError {
    pub fn is_rejection(&self) -> bool {
        matches!(self, ChannelError::Rejected(_))
    }
}

/// Terminal session faults. Also mirrored into the session's stored error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("No valid API keys found. Please configure GEMINI_API_KEY or GEMINI_API_KEYS")]
    NoCredentials,
    #[error("All {attempts} API keys failed. Last error: {last}")]
    CredentialsExhausted { attempts: usize, last: String },
}

/// Unexpected failure inside a tool callback.
///
/// Expected domain failures (not found, out of range) are normal
/// `ToolResult`s, not errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' is not a declared tool")]
    UnknownTool(String),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Config(#[from] config::ConfigError),
}
