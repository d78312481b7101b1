//! TabletDB Common - Shared utilities and types
//!
//! This crate provides common functionality used across all TabletDB components:
//! - Error types and handling
//! - Configuration management
//! - Logging setup, metrics and observability
//! - Table metadata and the dimension mapping derived from it

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
