//! Beacon Common - Shared utilities and types
//!
//! This crate provides functionality used across the Beacon cores:
//! - Error taxonomy and handling
//! - Configuration management
//! - Metrics helpers
//! - Telemetry row and label types

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use types::*;
