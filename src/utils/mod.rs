//! Utility functions and helpers.

pub mod hash;
pub mod logging;

pub use hash::{DigestAlgorithm, DigestEngine, DigestSet, FileDigest};
pub use logging::{init_logging, LogConfig};
