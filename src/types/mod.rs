//! Type definitions for the flowcache crate
//!
//! This module contains cross-cutting type definitions organized by
//! category.

/// System-wide error types
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Error, PersistError, Result, ShareError};
