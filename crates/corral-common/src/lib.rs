//! # corral-common
//!
//! Shared utilities and types for the corral configuration core.
//!
//! This crate provides common functionality used across all corral crates:
//! - The configuration error type
//! - Well-known default filesystem locations

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{ConfigError, ConfigResult};
