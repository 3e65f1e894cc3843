//! Crumb Core Library
//!
//! Shared functionality for Crumb binaries:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
