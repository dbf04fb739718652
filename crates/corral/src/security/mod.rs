//! Container security defaults.
//!
//! This module holds the runtime-wide security settings resolved from
//! configuration:
//! - Seccomp default profile
//! - Default Linux capabilities
//! - AppArmor default profile
//! - Block I/O and RDT class definitions
//! - The process-wide SELinux switch

pub mod apparmor;
pub mod blockio;
pub mod capabilities;
pub mod rdt;
pub mod seccomp;
pub mod selinux;

pub use apparmor::AppArmorConfig;
pub use blockio::BlockIoConfig;
pub use capabilities::Capabilities;
pub use rdt::RdtConfig;
pub use seccomp::SeccompConfig;
