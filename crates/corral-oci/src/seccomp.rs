//! Seccomp profile documents.
//!
//! The layout matches the profiles shipped by container engines
//! (`defaultAction`, `syscalls[].names`, ...). Unknown keys such as
//! `archMap` or `includes` are ignored.

use serde::{Deserialize, Serialize};

/// A seccomp profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompProfile {
    /// Default action.
    pub default_action: SeccompAction,
    /// Errno returned by the default action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_errno_ret: Option<u32>,
    /// Architectures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub architectures: Vec<String>,
    /// Flags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Unix socket the runtime sends notifications to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener_path: Option<String>,
    /// Syscall rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub syscalls: Vec<SeccompSyscall>,
}

/// Seccomp action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeccompAction {
    /// Kill the thread.
    ScmpActKill,
    /// Kill the process.
    ScmpActKillProcess,
    /// Kill the thread.
    ScmpActKillThread,
    /// Send SIGSYS.
    ScmpActTrap,
    /// Return an error.
    ScmpActErrno,
    /// Notify a tracer.
    ScmpActTrace,
    /// Log and continue.
    ScmpActLog,
    /// Allow the syscall.
    ScmpActAllow,
    /// Notify userspace.
    ScmpActNotify,
}

/// Seccomp syscall rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompSyscall {
    /// Syscall names.
    pub names: Vec<String>,
    /// Action to take.
    pub action: SeccompAction,
    /// Errno to return (for SCMP_ACT_ERRNO).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errno_ret: Option<u32>,
    /// Argument conditions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<SeccompArg>,
}

/// Seccomp argument condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeccompArg {
    /// Argument index.
    pub index: u32,
    /// Value to compare.
    pub value: u64,
    /// Second value (for masked equality).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_two: Option<u64>,
    /// Comparison operator.
    pub op: SeccompOperator,
}

/// Seccomp comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeccompOperator {
    /// Not equal.
    ScmpCmpNe,
    /// Less than.
    ScmpCmpLt,
    /// Less than or equal.
    ScmpCmpLe,
    /// Equal.
    ScmpCmpEq,
    /// Greater than or equal.
    ScmpCmpGe,
    /// Greater than.
    ScmpCmpGt,
    /// Masked equality.
    ScmpCmpMaskedEq,
}

impl SeccompProfile {
    /// Total number of syscall names covered by explicit rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.syscalls.iter().map(|rule| rule.names.len()).sum()
    }
}
