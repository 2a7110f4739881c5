//! Error types for the MixCascade transport core

use crate::cell::CELL_LEN;
use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-core error types
#[derive(Debug, Error)]
pub enum Error {
    /// A cell buffer had the wrong total length
    #[error("invalid cell length: {0} bytes (expected {CELL_LEN})")]
    InvalidCellLength(usize),

    /// The connection delivered a partial cell before EOF
    #[error("truncated cell: {0} of {CELL_LEN} bytes")]
    TruncatedCell(usize),

    /// Symmetric key material was neither 16 nor 32 bytes
    #[error("invalid symmetric key material length: {0}")]
    InvalidKeyLength(usize),

    /// The mix public modulus does not fit the protocol block size
    #[error("invalid mix modulus size: {0} bytes")]
    InvalidModulusSize(usize),

    /// RSA key or bootstrap transform failure
    #[error("mix bootstrap cipher error: {0}")]
    Rsa(#[from] rsa::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
