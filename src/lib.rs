//! vitality - Document ingestion and grounded answering over personal health records
//!
//! This is the convenience wrapper crate that re-exports `vitality-core`.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! vitality = "0.1"
//! ```

pub use vitality_core::*;
