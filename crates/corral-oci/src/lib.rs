//! # corral-oci
//!
//! OCI (Open Container Initiative) document types used while resolving
//! runtime configuration:
//! - The runtime *features* document printed by `<runtime> features`
//! - Seccomp profiles
//! - Namespace kinds

#![warn(missing_docs)]

pub mod features;
pub mod namespace;
pub mod seccomp;

pub use features::Features;
pub use namespace::NamespaceType;
pub use seccomp::SeccompProfile;
