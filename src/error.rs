use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: SocketAddr, reason: String },

    #[error("Malformed frame: {0}")]
    Frame(String),

    #[error("Call failed: {0}")]
    Call(String),
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("Plugin not ready: {0}")]
    NotReady(String),

    #[error("Failed to reap plugin process {pid}: {reason}")]
    Wait { pid: u32, reason: String },

    #[error("Failed to signal plugin process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Operation '{0}' is already registered")]
    Duplicate(String),

    #[error("Operation name cannot be empty")]
    EmptyName,
}

/// Failure reported by an operation. Travels over the wire as the error half
/// of a call outcome and never tears down the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code {code})")]
pub struct OperationError {
    pub code: i32,
    pub message: String,
}

impl OperationError {
    pub const NO_SUCH_OPERATION: i32 = -32601;
    pub const INVALID_ARGUMENT: i32 = -32602;
    pub const FAILED: i32 = -32000;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn no_such_operation(name: &str) -> Self {
        Self::new(Self::NO_SUCH_OPERATION, format!("no such operation: {name}"))
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_ARGUMENT, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Self::FAILED, message)
    }
}

impl RpcError {
    /// The plugin could not be reached at all.
    pub fn is_connect(&self) -> bool {
        matches!(self, RpcError::Transport(TransportError::Connect { .. }))
    }

    /// The connection failed while a call was in flight or already closed.
    pub fn is_call(&self) -> bool {
        matches!(self, RpcError::Transport(TransportError::Call(_)))
    }

    /// The remote operation itself reported a failure.
    pub fn as_operation(&self) -> Option<&OperationError> {
        match self {
            RpcError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
