//! Error types for the IR core.
//!
//! The core only ever fails in the three ways described in the design
//! documentation: a documented precondition was violated (a contract
//! violation — an implementation bug, never a user-facing error), the
//! pass manager's fixed point failed to converge within its bound, or a
//! reference was used against the wrong module/function. None of these
//! are meant to be recovered from by a caller; they are typed so tests
//! can assert on *which* precondition failed instead of matching a
//! panic message.

use thiserror::Error;

/// Errors raised by the IR core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("pass '{pass}' did not converge after {bound} iterations")]
    NonConvergent { pass: String, bound: usize },

    #[error("invalid reference: {0}")]
    InvalidRef(String),
}

impl IrError {
    pub fn contract(msg: impl Into<String>) -> Self {
        IrError::Contract(msg.into())
    }

    pub fn invalid_ref(msg: impl Into<String>) -> Self {
        IrError::InvalidRef(msg.into())
    }
}

/// Result type used throughout the IR core.
pub type IrResult<T> = std::result::Result<T, IrError>;

/// Aborts with a diagnostic. Per the design documentation, a contract
/// violation reaching a builder entry point is a bug in the caller (the
/// type-checked front end), not a recoverable condition — production of
/// malformed IR is never an acceptable outcome.
pub fn fatal(err: IrError) -> ! {
    panic!("{err}");
}
