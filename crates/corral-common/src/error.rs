//! Error types for configuration loading and validation.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`ConfigError`].
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while assembling, validating or resolving configuration.
#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    /// A configuration fragment could not be read.
    #[error("unable to read configuration {}: {source}", path.display())]
    #[diagnostic(code(corral::config::read))]
    Read {
        /// The fragment that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration fragment is not structurally valid.
    #[error("unable to decode configuration {}: {message}", path.display())]
    #[diagnostic(
        code(corral::config::decode),
        help("Check the fragment against the [corral] table layout printed by `corral config`")
    )]
    Decode {
        /// The fragment that failed.
        path: PathBuf,
        /// Decoder message.
        message: String,
    },

    /// The configuration could not be encoded back to TOML.
    #[error("unable to encode configuration: {message}")]
    #[diagnostic(code(corral::config::encode))]
    Encode {
        /// Encoder message.
        message: String,
    },

    /// A value failed validation.
    #[error("{message}")]
    #[diagnostic(code(corral::config::invalid))]
    Invalid {
        /// What is wrong with the value.
        message: String,
    },

    /// Validation of one configuration domain failed.
    #[error("validating {domain} config: {source}")]
    #[diagnostic(code(corral::config::domain))]
    Domain {
        /// The domain table (root, runtime, image, network, api, nri).
        domain: &'static str,
        /// The failure inside that domain.
        #[source]
        source: Box<ConfigError>,
    },

    /// The configured default runtime has no handler entry.
    #[error(
        "default_runtime set to {name:?}, but no runtime entry table [corral.runtime.runtimes.{name}] was found"
    )]
    #[diagnostic(
        code(corral::config::default_runtime),
        help("Add a [corral.runtime.runtimes.{name}] table or unset default_runtime")
    )]
    DefaultRuntimeMissing {
        /// The configured name.
        name: String,
    },

    /// A runtime handler entry is invalid.
    #[error("runtime {name:?}: {message}")]
    #[diagnostic(code(corral::config::runtime_handler))]
    Handler {
        /// Handler name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A required executable could not be located.
    #[error("{name:?} not found in $PATH")]
    #[diagnostic(
        code(corral::config::executable_not_found),
        help("Install the binary or set its path explicitly in the configuration")
    )]
    ExecutableNotFound {
        /// Binary name that was searched for.
        name: String,
    },

    /// A live process is still serving on the listen socket.
    #[error("already existing connection on {}", path.display())]
    #[diagnostic(
        code(corral::config::socket_in_use),
        help("Another instance appears to be running; stop it before starting a new one")
    )]
    SocketInUse {
        /// The socket path.
        path: PathBuf,
    },

    /// A subprocess invocation failed.
    #[error("running {program}: {message}")]
    #[diagnostic(code(corral::config::command))]
    Command {
        /// The program that was run.
        program: String,
        /// Failure description.
        message: String,
    },

    /// A subprocess exceeded its time budget.
    #[error("{program} did not finish within {seconds}s")]
    #[diagnostic(code(corral::config::command_timeout))]
    CommandTimeout {
        /// The program that was run.
        program: String,
        /// The budget that was exceeded.
        seconds: u64,
    },

    /// The network plugin has no usable network yet.
    #[error("network plugin not ready: {message}")]
    #[diagnostic(code(corral::network::not_ready))]
    NetworkNotReady {
        /// Why it is not ready.
        message: String,
    },

    /// Feature not supported on this host.
    #[error("Feature not supported: {feature}")]
    #[diagnostic(
        code(corral::unsupported),
        help("corral requires a Linux host with /proc and a mounted cgroup hierarchy")
    )]
    Unsupported {
        /// The unsupported feature.
        feature: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(corral::io))]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    /// Shorthand for [`ConfigError::Handler`].
    pub fn handler(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap this error as a failure of the given configuration domain.
    #[must_use]
    pub fn in_domain(self, domain: &'static str) -> Self {
        Self::Domain {
            domain,
            source: Box::new(self),
        }
    }

    /// Whether the root cause is a missing file or directory.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read { source, .. } | Self::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            Self::Domain { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Encode {
            message: err.to_string(),
        }
    }
}
