//! Unified error types for quire.
//!
//! This module provides a single error type covering store access, markup
//! parsing and stylesheet processing, presenting a consistent API to users.

// Submodule declarations
pub mod conversions;
pub mod types;

// Re-exports
pub use types::{Error, Result};
