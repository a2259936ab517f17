//! Common types and utilities shared by resources, the transform engine and
//! the processing pipeline.

// Submodule declarations
pub mod bom;
pub mod diagnostics;
pub mod encoding;
pub mod error;
pub mod xml;

// Re-exports for convenience
pub use bom::{BomKind, detect_bom};
pub use diagnostics::{
    Diagnostics, Level, MemoryDiagnostics, NullDiagnostics, TracingDiagnostics,
    default_diagnostics,
};
pub use error::{Error, Result};
