//! Typed error surface for the core crate.
//!
//! Replaces the original engine's exception-based control flow (a
//! `Singular` recovery attempt in particular is not exceptional — the set
//! manager expects it and retries with another parity combination).

use thiserror::Error;

/// Structured diagnostic for an unrecoverable set, so a host can render
/// "you need at least one more PAR file or data file" without re-deriving
/// the counts itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnrecoverableDiagnostic {
    pub missing: usize,
    pub valid_parity: usize,
    pub needed_parity: usize,
}

#[derive(Debug, Error)]
pub enum ParError {
    #[error("input error: {0}")]
    InputError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("format error: {0}")]
    FormatError(String),

    #[error("duplicate fingerprint within set: {0}")]
    ClassificationMismatch(String),

    /// A specific parity-volume selection yielded a singular recovery
    /// system. Retryable with a different selection; callers driving the
    /// exhaustive search over combinations treat this as expected, not
    /// fatal.
    #[error("singular recovery matrix for this parity selection")]
    Singular,

    #[error(
        "unrecoverable: {0} file(s) missing, {1} valid parity volume(s), need at least {2}"
    )]
    Unrecoverable(usize, usize, usize),

    #[error("cancelled")]
    Cancelled,
}

impl ParError {
    pub fn input(msg: impl Into<String>) -> Self {
        ParError::InputError(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        ParError::FormatError(msg.into())
    }

    pub fn unrecoverable(diag: UnrecoverableDiagnostic) -> Self {
        ParError::Unrecoverable(diag.missing, diag.valid_parity, diag.needed_parity)
    }
}

pub type Result<T> = std::result::Result<T, ParError>;
