//! User interface components.
//!
//! The command-line definition lives here; command handlers are in the
//! binary.

pub mod cli;

pub use cli::{Cli, Commands, OutputFormat};
