//! Error types for the Argent bytecode pipeline

use thiserror::Error;

/// Main error type for bytecode generation
///
/// Errors are only produced at construction boundaries where the size of the
/// input program can exceed what the operand encoding addresses. Contract
/// violations between the front-end and the pipeline (malformed operand
/// counts, double-killed temporaries) are debug assertions, not errors; the
/// two sides are compiled together and co-versioned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The declared parameter/local frame does not fit the register encoding
    #[error("register frame too large: {parameters} parameters + {locals} locals exceeds the addressable range")]
    FrameTooLarge { parameters: usize, locals: usize },

    /// The temporary register pool is exhausted
    #[error("too many live temporary registers (limit {limit})")]
    TooManyTemporaries { limit: usize },
}

/// Result type for bytecode generation
pub type Result<T> = std::result::Result<T, Error>;
