//! Pod network plugin handling.
//!
//! Pod networking is delegated to CNI plugins. The runtime only needs to
//! know which network is the default and whether it is ready.

mod cni;

pub use cni::{CniManager, CniNetwork};
