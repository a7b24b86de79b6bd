use std::{ffi::NulError, io};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An argument or environment entry could not be handed to C because it
    /// contains a NUL byte
    #[error("argument contains an interior NUL byte: {0}")]
    InteriorNul(#[from] NulError),

    #[error("{0} arguments do not fit in argc")]
    TooManyArguments(usize),

    #[error("symbol `{0}` not found; was the target linked with -rdynamic?")]
    SymbolNotFound(String),

    #[error("`{0}` cannot be used as the renamed entry point")]
    InvalidSymbol(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}
