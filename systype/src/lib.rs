//! Error types returned by every public operation in this workspace.
//!
//! Mirrors the single-error-enum-plus-`Result`-alias shape the rest of the
//! corpus uses for crate-wide errors, but expressed with `thiserror` instead
//! of a hand-rolled `Display` impl since this crate targets a hosted (std)
//! binary rather than a `no_std` kernel.

use thiserror::Error;

pub type VmaResult<T> = Result<T, VmaError>;

/// A failure reported by the accelerator capability layer (`accel`):
/// allocation, buffer creation, transfer, kernel build/run, or event query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("accelerator error {code} in {where_}")]
pub struct AcceleratorError {
    pub code: i32,
    pub where_: &'static str,
}

impl AcceleratorError {
    pub fn new(code: i32, where_: &'static str) -> Self {
        Self { code, where_ }
    }
}

#[derive(Debug, Error)]
pub enum VmaError {
    /// A violated precondition: non-multiple page size, too many virtual
    /// devices for the page count, invalid multiplier configuration,
    /// unknown `MemMode`.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Any failure reported by the accelerator capability layer.
    #[error(transparent)]
    Accelerator(#[from] AcceleratorError),

    /// A feature named by the spec but intentionally unimplemented
    /// (`MemMode::UsePcieRatios`).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Host allocation or pinning failure.
    #[error("resource error: {0}")]
    Resource(String),
}
