//! Error types and handling for flowcache
//!
//! This module defines all error types used throughout the crate. Creation
//! and load paths surface typed errors; steady-state table operations never
//! fail (a miss is a value, not an error, and a full table evicts).

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter was rejected outright (zero value size, stale walker
    /// handle). Undersized capacities are not errors; they are rounded up
    /// with a warning.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An allocation failed while building a table. Everything allocated up
    /// to that point is released before this is returned.
    #[error("memory allocation failed")]
    OutOfMemory,

    /// A persisted image could not be validated or read back
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),

    /// A named shared attach could not be satisfied
    #[error("share error: {0}")]
    Share(#[from] ShareError),

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading or validating a persisted table image
#[derive(Error, Debug)]
pub enum PersistError {
    /// The image does not start with the table magic and the caller did not
    /// opt into header-less legacy images
    #[error("image does not carry the expected table magic")]
    BadMagic,

    /// The image carries the existence-filter magic; such images must never
    /// be loaded as a cache table
    #[error("image carries the existence-filter magic, not a cache table")]
    SiblingMagic,

    /// The stream ended before the full header, bucket array, and arena
    /// were read
    #[error("image ended before the full table was read")]
    Truncated,

    /// The stored header fields disagree with each other
    #[error("stored geometry is inconsistent: {0}")]
    Corrupt(String),

    /// The stored geometry disagrees with what the caller asked for
    #[error(
        "stored table is {stored_capacity} records of {stored_value_size} bytes, \
         requested {capacity} records of {value_size} bytes"
    )]
    ParamMismatch {
        /// Capacity recorded in the image
        stored_capacity: u64,
        /// Padded value size recorded in the image
        stored_value_size: u32,
        /// Capacity the caller requested (after rounding)
        capacity: u64,
        /// Value size the caller requested (after padding)
        value_size: u32,
    },
}

/// Errors raised by the named-instance sharing registry
#[derive(Error, Debug)]
pub enum ShareError {
    /// A non-readonly attach asked for parameters that disagree with the
    /// table already registered under that name
    #[error("parameters do not match shared table '{0}'")]
    ParamMismatch(String),

    /// A readonly attach named a load path that could not be read
    #[error("readonly attach of '{0}' could not load its image")]
    LoadFailed(String),
}
