//! Seccomp profile handling.
//!
//! The runtime carries one default profile. It is either loaded from the
//! configured JSON file or falls back to the built-in allow-list below.

use std::path::{Path, PathBuf};

use corral_common::{ConfigError, ConfigResult};
use corral_oci::seccomp::{SeccompAction, SeccompProfile, SeccompSyscall};

const DEFAULT_ALLOWED_SYSCALLS: [&str; 251] = [
    "read", "write", "open", "close", "stat", "fstat", "lstat", "poll", "lseek", "mmap",
    "mprotect", "munmap", "brk", "rt_sigaction", "rt_sigprocmask", "rt_sigreturn", "ioctl",
    "access", "pipe", "select", "sched_yield", "mremap", "msync", "mincore", "madvise", "dup",
    "dup2", "pause", "nanosleep", "getitimer", "alarm", "setitimer", "getpid", "sendfile",
    "socket", "connect", "accept", "sendto", "recvfrom", "sendmsg", "recvmsg", "shutdown",
    "bind", "listen", "getsockname", "getpeername", "socketpair", "setsockopt", "getsockopt",
    "clone", "fork", "vfork", "execve", "exit", "wait4", "kill", "uname", "fcntl", "flock",
    "fsync", "fdatasync", "truncate", "ftruncate", "getdents", "getcwd", "chdir", "fchdir",
    "rename", "mkdir", "rmdir", "creat", "link", "unlink", "symlink", "readlink", "chmod",
    "fchmod", "chown", "fchown", "lchown", "umask", "gettimeofday", "getrlimit", "getrusage",
    "sysinfo", "times", "getuid", "getgid", "setuid", "setgid", "geteuid", "getegid", "setpgid",
    "getppid", "getpgrp", "setsid", "setreuid", "setregid", "getgroups", "setgroups",
    "setresuid", "getresuid", "setresgid", "getresgid", "getpgid", "setfsuid", "setfsgid",
    "getsid", "capget", "capset", "rt_sigpending", "rt_sigtimedwait", "rt_sigqueueinfo",
    "rt_sigsuspend", "sigaltstack", "utime", "mknod", "statfs", "fstatfs", "getpriority",
    "setpriority", "sched_setparam", "sched_getparam", "sched_setscheduler",
    "sched_getscheduler", "sched_get_priority_max", "sched_get_priority_min",
    "sched_rr_get_interval", "mlock", "munlock", "mlockall", "munlockall", "vhangup",
    "pivot_root", "prctl", "arch_prctl", "setrlimit", "sync", "mount", "umount2", "sethostname",
    "setdomainname", "gettid", "readahead", "setxattr", "lsetxattr", "fsetxattr", "getxattr",
    "lgetxattr", "fgetxattr", "listxattr", "llistxattr", "flistxattr", "removexattr",
    "lremovexattr", "fremovexattr", "tkill", "time", "futex", "sched_setaffinity",
    "sched_getaffinity", "set_thread_area", "get_thread_area", "io_setup", "io_destroy",
    "io_getevents", "io_submit", "io_cancel", "exit_group", "epoll_create", "epoll_ctl",
    "epoll_wait", "set_tid_address", "fadvise64", "timer_create", "timer_settime",
    "timer_gettime", "timer_getoverrun", "timer_delete", "clock_settime", "clock_gettime",
    "clock_getres", "clock_nanosleep", "tgkill", "utimes", "openat", "mkdirat", "mknodat",
    "fchownat", "futimesat", "newfstatat", "unlinkat", "renameat", "linkat", "symlinkat",
    "readlinkat", "fchmodat", "faccessat", "pselect6", "ppoll", "set_robust_list",
    "get_robust_list", "splice", "tee", "sync_file_range", "vmsplice", "utimensat",
    "epoll_pwait", "signalfd", "timerfd_create", "eventfd", "fallocate", "timerfd_settime",
    "timerfd_gettime", "accept4", "signalfd4", "eventfd2", "epoll_create1", "dup3", "pipe2",
    "inotify_init1", "preadv", "pwritev", "rt_tgsigqueueinfo", "recvmmsg", "prlimit64",
    "syncfs", "sendmmsg", "setns", "getcpu", "getrandom", "memfd_create", "execveat", "mlock2",
    "copy_file_range", "preadv2", "pwritev2", "statx", "rseq", "pidfd_open", "clone3",
    "close_range", "pidfd_getfd", "faccessat2", "epoll_pwait2", "openat2", "futex_waitv",
    "getdents64", "seccomp", "pread64", "pwrite64",
];

/// Where the active profile came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileSource {
    /// The built-in allow-list.
    BuiltIn,
    /// A profile file on disk.
    File(PathBuf),
}

/// Seccomp configuration held by the resolved runtime config.
#[derive(Debug, Clone)]
pub struct SeccompConfig {
    enabled: bool,
    use_default_when_empty: bool,
    profile: SeccompProfile,
    source: ProfileSource,
    notifier_path: Option<PathBuf>,
}

impl SeccompConfig {
    /// Create a configuration using the built-in profile.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: kernel_supports_seccomp(),
            use_default_when_empty: true,
            profile: default_profile(),
            source: ProfileSource::BuiltIn,
            notifier_path: None,
        }
    }

    /// Whether the kernel supports seccomp filtering.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether an empty profile request means "use the default profile".
    #[must_use]
    pub const fn use_default_when_empty(&self) -> bool {
        self.use_default_when_empty
    }

    /// See [`Self::use_default_when_empty`].
    pub fn set_use_default_when_empty(&mut self, value: bool) {
        self.use_default_when_empty = value;
    }

    /// Load the default profile from `path`.
    ///
    /// An empty path selects the built-in profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] when the file cannot be read (check
    /// [`ConfigError::is_not_found`] to tell a missing file apart) and
    /// [`ConfigError::Invalid`] when it is not a seccomp profile.
    pub fn load_profile(&mut self, path: &Path) -> ConfigResult<()> {
        if path.as_os_str().is_empty() {
            self.load_default_profile();
            return Ok(());
        }

        let data = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let profile: SeccompProfile = serde_json::from_slice(&data).map_err(|e| {
            ConfigError::invalid(format!(
                "decoding seccomp profile {}: {e}",
                path.display()
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            rules = profile.rule_count(),
            "Loaded seccomp profile"
        );
        self.profile = profile;
        self.source = ProfileSource::File(path.to_path_buf());
        Ok(())
    }

    /// Switch to the built-in profile.
    pub fn load_default_profile(&mut self) {
        tracing::info!("Using built-in seccomp profile");
        self.profile = default_profile();
        self.source = ProfileSource::BuiltIn;
    }

    /// The active profile.
    #[must_use]
    pub const fn profile(&self) -> &SeccompProfile {
        &self.profile
    }

    /// Where the active profile came from.
    #[must_use]
    pub const fn source(&self) -> &ProfileSource {
        &self.source
    }

    /// Socket directory for seccomp notifications.
    pub fn set_notifier_path(&mut self, path: impl Into<PathBuf>) {
        self.notifier_path = Some(path.into());
    }

    /// See [`Self::set_notifier_path`].
    #[must_use]
    pub fn notifier_path(&self) -> Option<&Path> {
        self.notifier_path.as_deref()
    }
}

impl Default for SeccompConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The built-in profile: deny with `EPERM` unless allow-listed.
#[must_use]
pub fn default_profile() -> SeccompProfile {
    SeccompProfile {
        default_action: SeccompAction::ScmpActErrno,
        default_errno_ret: Some(1),
        architectures: Vec::new(),
        flags: Vec::new(),
        listener_path: None,
        syscalls: vec![SeccompSyscall {
            names: DEFAULT_ALLOWED_SYSCALLS.iter().map(|s| (*s).to_string()).collect(),
            action: SeccompAction::ScmpActAllow,
            errno_ret: None,
            args: Vec::new(),
        }],
    }
}

#[cfg(target_os = "linux")]
fn kernel_supports_seccomp() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| status.lines().any(|line| line.starts_with("Seccomp:")))
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn kernel_supports_seccomp() -> bool {
    false
}
