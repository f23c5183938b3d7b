//! Error types and handling
//!
//! Domain-specific error enums (configuration, state, docker, command
//! execution, SSH keys, agent) wrapped in the top-level [`WorkspaceError`]
//! for unified handling. Binaries convert to `anyhow::Error` at the edge.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No project configuration was found walking up from the start directory
    #[error("No .workspace.yml found (searched from {start} up to {stop})")]
    Missing { start: String, stop: String },

    /// Configuration file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parsing { path: String, message: String },

    /// Configuration failed validation after normalization
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// Configuration file I/O error
    #[error("Failed to read configuration file")]
    Io(#[from] std::io::Error),
}

/// State store errors
#[derive(Error, Debug)]
pub enum StateError {
    /// The exclusive state lock could not be acquired
    #[error("Could not lock state file {path} after {attempts} attempts")]
    Locked { path: String, attempts: u32 },

    /// State file exists but cannot be read or written
    #[error("State file I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// State file contents are not valid JSON
    #[error("State file {path} is corrupt: {message}")]
    Corrupt { path: String, message: String },

    /// No record exists for the requested workspace
    #[error("No state recorded for workspace '{name}'")]
    UnknownWorkspace { name: String },
}

/// Docker adapter errors
#[derive(Error, Debug)]
pub enum DockerError {
    /// The docker binary is missing or the daemon is unreachable
    #[error("Docker is not installed or not accessible")]
    Unavailable,

    /// A docker CLI invocation failed
    #[error("Docker CLI error: {0}")]
    Cli(String),

    /// Container not found
    #[error("Container not found: {name}")]
    ContainerNotFound { name: String },

    /// A readiness wait exceeded its deadline
    #[error("Timed out after {seconds}s waiting for {what}")]
    ReadinessTimeout { what: String, seconds: u64 },
}

/// External command failure, carrying captured output and an optional log path
#[derive(Error, Debug)]
#[error("Command `{program}` exited with code {code}{}", log_path.as_ref().map(|p| format!(" (log: {})", p.display())).unwrap_or_default())]
pub struct CommandError {
    /// Program name (argv[0])
    pub program: String,
    /// Exit code, -1 when terminated by signal
    pub code: i32,
    /// Captured stdout (may be empty in streaming mode)
    pub stdout: String,
    /// Captured stderr (may be empty when inherited)
    pub stderr: String,
    /// Log file the output was streamed to, when logged mode was used
    pub log_path: Option<PathBuf>,
}

/// SSH key selection errors
#[derive(Error, Debug)]
pub enum SshKeyError {
    /// Generating the per-workspace host key pair failed
    #[error("Failed to generate SSH key at {path}: {message}")]
    Keygen { path: String, message: String },
}

/// In-container agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    /// A bootstrap script is missing or not executable
    #[error("Bootstrap script {path}: {reason}")]
    Bootstrap { path: String, reason: String },

    /// Repository clone failed on both attempts
    #[error("Failed to clone {remote}: {message}")]
    Clone { remote: String, message: String },

    /// UID/GID synchronization refused or failed
    #[error("User sync failed: {0}")]
    UserSync(String),

    /// A supervised daemon never became ready
    #[error("{daemon} did not become ready within {seconds}s")]
    DaemonNotReady { daemon: String, seconds: u64 },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum WorkspaceError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State store errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Docker errors
    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    /// External command failures
    #[error(transparent)]
    Command(#[from] CommandError),

    /// SSH key errors
    #[error("SSH key error: {0}")]
    SshKey(#[from] SshKeyError),

    /// In-container agent errors
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results with WorkspaceError
pub type Result<T> = std::result::Result<T, WorkspaceError>;
