//! Cgroup manager selection.
//!
//! The runtime talks to cgroups either through systemd or by writing the
//! cgroup filesystem itself. Which one is used is decided once while the
//! configuration is resolved.

mod manager;

pub use manager::{
    CGROUPFS, CgroupManager, CgroupfsManager, POD_CGROUP, SLICE_SUFFIX, SYSTEMD, SystemdManager,
    select, validate_name,
};
