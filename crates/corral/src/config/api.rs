//! `[corral.api]`: the CRI server endpoint.

use std::path::{Path, PathBuf};

use corral_common::paths::SOCKET_PATH;
use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

use super::ValidationMode;

/// Message size limit used when none is configured (80 MiB).
pub const DEFAULT_GRPC_MAX_MSG_SIZE: i64 = 80 * 1024 * 1024;

/// Server endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Largest message the server sends. Non-positive means the default.
    pub grpc_max_send_msg_size: i64,
    /// Largest message the server accepts. Non-positive means the default.
    pub grpc_max_recv_msg_size: i64,
    /// Unix socket the server listens on.
    pub listen: PathBuf,
    /// Address of the streaming server.
    pub stream_address: String,
    /// Port of the streaming server. `"0"` picks a free port.
    pub stream_port: String,
    /// Serve streams over TLS.
    pub stream_enable_tls: bool,
    /// Streaming server certificate.
    pub stream_tls_cert: PathBuf,
    /// Streaming server key.
    pub stream_tls_key: PathBuf,
    /// CA used to verify streaming clients.
    pub stream_tls_ca: PathBuf,
    /// Idle time after which a stream is closed (Go duration syntax).
    pub stream_idle_timeout: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            grpc_max_send_msg_size: DEFAULT_GRPC_MAX_MSG_SIZE,
            grpc_max_recv_msg_size: DEFAULT_GRPC_MAX_MSG_SIZE,
            listen: PathBuf::from(SOCKET_PATH),
            stream_address: "127.0.0.1".to_string(),
            stream_port: "0".to_string(),
            stream_enable_tls: false,
            stream_tls_cert: PathBuf::new(),
            stream_tls_key: PathBuf::new(),
            stream_tls_ca: PathBuf::new(),
            stream_idle_timeout: String::new(),
        }
    }
}

impl ApiConfig {
    /// Clamp message sizes; in execution mode prepare the listen socket.
    ///
    /// # Errors
    ///
    /// Fails when the socket directory cannot be created or a live server
    /// still answers on the socket.
    pub fn validate(&mut self, mode: ValidationMode) -> ConfigResult<()> {
        if self.grpc_max_send_msg_size <= 0 {
            self.grpc_max_send_msg_size = DEFAULT_GRPC_MAX_MSG_SIZE;
        }
        if self.grpc_max_recv_msg_size <= 0 {
            self.grpc_max_recv_msg_size = DEFAULT_GRPC_MAX_MSG_SIZE;
        }

        if mode.is_execution() {
            remove_unused_socket(&self.listen)?;
        }
        Ok(())
    }

    /// Directory the seccomp notifier sockets live in, next to the listen
    /// socket.
    #[must_use]
    pub fn seccomp_notifier_dir(&self) -> PathBuf {
        self.listen
            .parent()
            .unwrap_or_else(|| Path::new("/"))
            .join("seccomp")
    }
}

/// Create the socket's parent directory and remove a stale socket file.
///
/// A socket that still accepts a connection belongs to a live process and
/// is left alone. There is a window between the check and the removal in
/// which a new server could start listening; its socket would then be
/// removed.
///
/// # Errors
///
/// Returns [`ConfigError::SocketInUse`] for a live socket, or an I/O error
/// when the directory cannot be created or the file cannot be removed.
pub fn remove_unused_socket(path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            ConfigError::invalid(format!("creating socket directories: {e}"))
        })?;
    }

    if std::fs::symlink_metadata(path).is_err() {
        return Ok(());
    }

    if is_live_socket(path) {
        return Err(ConfigError::SocketInUse {
            path: path.to_path_buf(),
        });
    }

    std::fs::remove_file(path)
        .map_err(|e| ConfigError::invalid(format!("removing {}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "Removed stale socket");
    Ok(())
}

/// Non-blocking connect: a full listen backlog answers `EAGAIN` instead of
/// parking the caller, and still counts as a live server.
#[cfg(target_os = "linux")]
fn is_live_socket(path: &Path) -> bool {
    use rustix::io::Errno;
    use rustix::net::{AddressFamily, SocketAddrUnix, SocketFlags, SocketType};

    let Ok(addr) = SocketAddrUnix::new(path) else {
        return false;
    };
    let socket = match rustix::net::socket_with(
        AddressFamily::UNIX,
        SocketType::STREAM,
        SocketFlags::NONBLOCK | SocketFlags::CLOEXEC,
        None,
    ) {
        Ok(socket) => socket,
        Err(e) => {
            tracing::debug!(error = %e, "Cannot create socket for liveness check");
            return false;
        }
    };
    match rustix::net::connect(&socket, &addr) {
        Ok(()) => true,
        Err(e) => e == Errno::AGAIN,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_live_socket(_path: &Path) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_message_sizes() {
        let mut api = ApiConfig {
            grpc_max_send_msg_size: 0,
            grpc_max_recv_msg_size: -5,
            ..ApiConfig::default()
        };
        api.validate(ValidationMode::Static).unwrap();
        assert_eq!(api.grpc_max_send_msg_size, DEFAULT_GRPC_MAX_MSG_SIZE);
        assert_eq!(api.grpc_max_recv_msg_size, DEFAULT_GRPC_MAX_MSG_SIZE);

        let mut api = ApiConfig {
            grpc_max_send_msg_size: 1024,
            ..ApiConfig::default()
        };
        api.validate(ValidationMode::Static).unwrap();
        assert_eq!(api.grpc_max_send_msg_size, 1024);
    }

    #[test]
    fn notifier_dir_sits_next_to_socket() {
        let api = ApiConfig::default();
        assert_eq!(
            api.seccomp_notifier_dir(),
            PathBuf::from("/var/run/corral/seccomp")
        );
    }

    #[test]
    fn creates_parent_and_ignores_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("nested/corral.sock");
        remove_unused_socket(&socket).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("corral.sock");
        std::fs::write(&socket, "").unwrap();
        remove_unused_socket(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn refuses_live_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("corral.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

        let err = remove_unused_socket(&socket).unwrap_err();
        assert!(matches!(err, ConfigError::SocketInUse { .. }));
        assert!(socket.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn socket_of_exited_server_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("corral.sock");
        drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
        assert!(socket.exists());

        remove_unused_socket(&socket).unwrap();
        assert!(!socket.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_backlog_counts_as_live() {
        use rustix::net::{AddressFamily, SocketAddrUnix, SocketFlags, SocketType};

        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("corral.sock");
        let addr = SocketAddrUnix::new(&socket).unwrap();
        let listener = rustix::net::socket(AddressFamily::UNIX, SocketType::STREAM, None).unwrap();
        rustix::net::bind(&listener, &addr).unwrap();
        rustix::net::listen(&listener, 0).unwrap();

        // Nobody accepts, so the queue fills up.
        let mut pending = Vec::new();
        for _ in 0..16 {
            let client = rustix::net::socket_with(
                AddressFamily::UNIX,
                SocketType::STREAM,
                SocketFlags::NONBLOCK,
                None,
            )
            .unwrap();
            let full = rustix::net::connect(&client, &addr).is_err();
            pending.push(client);
            if full {
                break;
            }
        }

        let err = remove_unused_socket(&socket).unwrap_err();
        assert!(matches!(err, ConfigError::SocketInUse { .. }));
        assert!(socket.exists());
    }
}
