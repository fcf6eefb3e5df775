//! Shared error definitions and helpers used across all boltline crates.

pub mod error;

pub use error::{Context, Error, FromMessage, Result};
