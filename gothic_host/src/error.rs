use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::legacy::{SymbolKind, VmError};
use crate::signals::SignalError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("ScriptEngine not initialized")]
    NotInitialized,
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to compile {name}: {message}")]
    Compile { name: String, message: String },
    #[error("error running {name}: {message}")]
    Runtime { name: String, message: String },
    #[error("failed to open manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to bind event {event}: {source}")]
    SignalBind {
        event: String,
        #[source]
        source: SignalError,
    },
}

/// Failures of the legacy VM bridge. Scripts see these as runtime errors
/// carrying the `Display` text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("no legacy VM attached")]
    NoVm,
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
    #[error("index {index} out of range for '{symbol}' ({count} elements)")]
    IndexOutOfRange {
        symbol: String,
        index: u32,
        count: u32,
    },
    #[error("cannot write const symbol '{0}'")]
    ConstWrite(String),
    #[error("type mismatch for '{symbol}': expected {expected}, got {actual}")]
    TypeMismatch {
        symbol: String,
        expected: SymbolKind,
        actual: String,
    },
    #[error("'{0}' is not a function")]
    NotCallable(String),
    #[error("legacy VM error: {0}")]
    Vm(#[from] VmError),
}
