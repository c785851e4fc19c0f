//! hexscan: a file-scanning detection engine.
//!
//! This crate scans files with four independent detectors (signature,
//! heuristic, pattern rules and an experimental statistical scorer),
//! aggregates their signals into a verdict, and isolates malicious files in
//! an encrypted quarantine store.

pub mod core;
pub mod detection;
pub mod quarantine;
pub mod scanner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::{Config, ScanOptions};
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
