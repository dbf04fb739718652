//! SELinux state.
//!
//! Labelling is on whenever the kernel has SELinux enabled, until
//! [`set_disabled`] is called. The switch is process-wide and one-way.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

static DISABLED: AtomicBool = AtomicBool::new(false);

/// Check if SELinux is enabled for this process.
#[cfg(target_os = "linux")]
pub fn is_enabled() -> bool {
    !DISABLED.load(Ordering::SeqCst) && Path::new("/sys/fs/selinux/enforce").exists()
}

#[cfg(not(target_os = "linux"))]
pub fn is_enabled() -> bool {
    false
}

/// Stop labelling for the remainder of the process.
pub fn set_disabled() {
    if !DISABLED.swap(true, Ordering::SeqCst) {
        tracing::info!("SELinux labelling disabled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_wins_over_kernel_state() {
        set_disabled();
        assert!(!is_enabled());
    }
}
