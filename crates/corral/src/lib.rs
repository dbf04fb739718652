//! # corral
//!
//! Configuration core of the corral CRI runtime.
//!
//! The runtime reads one primary TOML file and a directory of drop-in
//! fragments, folds them over built-in defaults, and validates the result
//! before serving. Validation has two depths:
//!
//! - **Static**: structural checks only, safe to run anywhere.
//! - **Execution**: also resolves executables, probes runtimes and the
//!   monitor, creates directories and initialises subsystems.
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//!
//! use corral::config::{Config, ValidationMode, resolve};
//! use corral::host::SystemHost;
//! use corral::storage::ContainersStorage;
//!
//! # async fn example() -> corral_common::ConfigResult<()> {
//! let host = SystemHost::new();
//! let storage = ContainersStorage::new();
//! let config = Config::load(
//!     Path::new("/etc/corral/corral.conf"),
//!     Path::new("/etc/corral/corral.conf.d"),
//!     &storage,
//!     &host,
//! )?;
//!
//! let resolved = resolve(config, ValidationMode::Static, &host, &storage).await?;
//! println!("default runtime: {}", resolved.config().runtime.default_runtime);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod annotations;
pub mod cgroup;
pub mod cli;
pub mod config;
pub mod cpuset;
pub mod device;
pub mod host;
pub mod image;
pub mod monitor;
pub mod namespace;
pub mod network;
pub mod security;
pub mod storage;
pub mod ulimits;

pub use config::{Config, ConfigHandle, ResolvedConfig, ValidationMode, resolve};
