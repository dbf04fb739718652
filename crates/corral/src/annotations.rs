//! Workload annotations recognised by the runtime.
//!
//! Runtime handlers opt into these through `allowed_annotations`; everything
//! in [`ALL_ALLOWED_ANNOTATIONS`] that a handler does not allow is stripped
//! from requests routed to it.

use std::collections::BTreeSet;

/// Configure a user namespace for the pod.
pub const USERNS_MODE: &str = "io.kubernetes.corral.userns-mode";

/// Mount the cgroup v2 hierarchy read-write.
pub const CGROUP2_RW: &str = "io.kubernetes.corral.cgroup2-mount-hierarchy-rw";

/// Cgroup v2 unified block for a container (`.../<container name>`).
pub const UNIFIED_CGROUP: &str = "io.kubernetes.corral.UnifiedCgroup";

/// Size of `/dev/shm`.
pub const SHM_SIZE: &str = "io.kubernetes.corral.ShmSize";

/// Extra devices for the pod.
pub const DEVICES: &str = "io.kubernetes.corral.Devices";

/// Skip relabelling volumes when the SELinux label already matches.
pub const TRY_SKIP_VOLUME_SELINUX_LABEL: &str = "io.kubernetes.corral.TrySkipVolumeSELinuxLabel";

/// Trace syscalls through the OCI seccomp BPF hook.
pub const OCI_SECCOMP_BPF_HOOK: &str = "io.containers.trace-syscall";

/// Disable CPU load balancing for the container's CPUs.
pub const CPU_LOAD_BALANCING: &str = "cpu-load-balancing.corral.io";

/// Disable CFS quota for the container.
pub const CPU_QUOTA: &str = "cpu-quota.corral.io";

/// Disable IRQ load balancing for the container's CPUs.
pub const IRQ_LOAD_BALANCING: &str = "irq-load-balancing.corral.io";

/// Control CPU C-states for the container's CPUs.
pub const CPU_C_STATES: &str = "cpu-c-states.corral.io";

/// Set the CPU frequency governor for the container's CPUs.
pub const CPU_FREQ_GOVERNOR: &str = "cpu-freq-governor.corral.io";

/// Give the container access to the shared CPU set.
pub const CPU_SHARED: &str = "cpu-shared.corral.io";

/// Action taken when the seccomp notifier fires.
pub const SECCOMP_NOTIFIER_ACTION: &str = "io.kubernetes.corral.seccompNotifierAction";

/// Umask for the container process.
pub const UMASK: &str = "io.kubernetes.corral.umask";

/// Link container logs into the pod's emptyDir.
pub const LINK_LOGS: &str = "io.kubernetes.corral.LinkLogs";

/// Seccomp profile for a container or the whole pod.
pub const SECCOMP_PROFILE: &str = "seccomp-profile.kubernetes.corral.io";

/// Disable FIPS mode for the pod.
pub const DISABLE_FIPS: &str = "io.kubernetes.corral.DisableFIPS";

/// Pod overhead resources forwarded to the runtime.
pub const POD_LINUX_OVERHEAD: &str = "io.kubernetes.corral.PodLinuxOverhead";

/// Every annotation a handler may be allowed to process.
pub const ALL_ALLOWED_ANNOTATIONS: [&str; 19] = [
    USERNS_MODE,
    CGROUP2_RW,
    UNIFIED_CGROUP,
    SHM_SIZE,
    DEVICES,
    TRY_SKIP_VOLUME_SELINUX_LABEL,
    OCI_SECCOMP_BPF_HOOK,
    CPU_LOAD_BALANCING,
    CPU_QUOTA,
    IRQ_LOAD_BALANCING,
    CPU_C_STATES,
    CPU_FREQ_GOVERNOR,
    CPU_SHARED,
    SECCOMP_NOTIFIER_ACTION,
    UMASK,
    LINK_LOGS,
    SECCOMP_PROFILE,
    DISABLE_FIPS,
    POD_LINUX_OVERHEAD,
];

/// Whether `annotation` belongs to the recognised universe.
#[must_use]
pub fn is_recognized(annotation: &str) -> bool {
    ALL_ALLOWED_ANNOTATIONS.contains(&annotation)
}

/// Check `allowed` against the recognised universe and return its
/// complement, sorted.
///
/// # Errors
///
/// Returns the first entry of `allowed` that is not recognised.
pub fn disallowed_for<'a>(allowed: impl IntoIterator<Item = &'a str>) -> Result<Vec<String>, String> {
    let mut remaining: BTreeSet<&str> = ALL_ALLOWED_ANNOTATIONS.iter().copied().collect();
    for annotation in allowed {
        if !is_recognized(annotation) {
            return Err(annotation.to_string());
        }
        remaining.remove(annotation);
    }
    Ok(remaining.into_iter().map(str::to_string).collect())
}
