//! Runtime error type shared by the whole VM.

use agora_bytecode::CodecError;
use thiserror::Error;

use crate::value::Value;

/// Any fault the runtime can surface from `run()`.
///
/// Decoder errors pass through unchanged; loader and runtime errors carry
/// the messages the language defines. `Raised` holds the value given to the
/// `panic` built-in so `recover` can hand it back intact.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot convert {from} to {to}")]
    Conversion {
        from: &'static str,
        to: &'static str,
    },
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    #[error("unknown variable: {0}")]
    UnknownVariable(String),
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    #[error("cyclic dependency: {0} already being loaded")]
    CyclicDependency(String),
    #[error("empty module: {0}")]
    EmptyModule(String),
    #[error("invalid module: {0}")]
    InvalidModule(String),
    /// A language value raised by the `panic` built-in.
    #[error("{0}")]
    Raised(Value),
    /// The context's cancellation token was triggered.
    #[error("execution cancelled")]
    Cancelled,
    /// A host-level failure surfaced at a native call boundary.
    #[error("{0}")]
    Host(String),
    /// A structural fault in the executing bytecode (stack underflow, jump
    /// out of range, and the like).
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    pub fn conversion(from: &'static str, to: &'static str) -> RuntimeError {
        RuntimeError::Conversion { from, to }
    }

    pub(crate) fn internal(msg: impl Into<String>) -> RuntimeError {
        RuntimeError::Internal(msg.into())
    }
}
