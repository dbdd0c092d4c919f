//! Core application components
//!
//! Configuration, the table factory, and the named-instance sharing
//! registry that lets multiple embedding operators work against one table.

/// Declarative table configuration
pub mod config;

/// Factory for opening tables from configuration
pub mod factory;

/// Process-wide named-instance sharing
pub mod registry;

// Re-export commonly used items
pub use config::CacheConfig;
pub use factory::{open_table, CacheHandle};
pub use registry::{attach, ShareOptions, SharedTable};
