//! `[corral.image]`: image handling settings.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use corral_common::paths::SIGNATURE_POLICY_DIR;
use corral_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ValidationMode;
use crate::image::ImageReference;

/// Infra container image used when none is configured.
pub const DEFAULT_PAUSE_IMAGE: &str = "registry.k8s.io/pause:3.10";

/// What to do with `VOLUME`s declared by an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageVolumes {
    /// Create a directory for each volume inside the container.
    #[default]
    Mkdir,
    /// Bind-mount a host directory for each volume.
    Bind,
    /// Ignore image volumes.
    Ignore,
}

impl ImageVolumes {
    /// Configuration spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mkdir => "mkdir",
            Self::Bind => "bind",
            Self::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ImageVolumes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageVolumes {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "mkdir" => Ok(Self::Mkdir),
            "bind" => Ok(Self::Bind),
            "ignore" => Ok(Self::Ignore),
            other => Err(ConfigError::invalid(format!(
                "unrecognized image volume type {other:?}, expected \"mkdir\", \"bind\" or \"ignore\""
            ))),
        }
    }
}

impl Serialize for ImageVolumes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ImageVolumes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// Image settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Transport used for unqualified pulls.
    pub default_transport: String,
    /// Auth file used for every pull.
    pub global_auth_file: PathBuf,
    /// Infra container image.
    pub pause_image: String,
    /// Auth file for pulling the infra image.
    pub pause_image_auth_file: PathBuf,
    /// Command run in the infra container.
    pub pause_command: String,
    /// Images never garbage collected.
    pub pinned_images: Vec<String>,
    /// Signature policy file. Empty means the system default.
    pub signature_policy: PathBuf,
    /// Directory of per-namespace signature policies.
    pub signature_policy_dir: PathBuf,
    /// Registries contacted without TLS verification.
    pub insecure_registries: Vec<String>,
    /// Image volume handling.
    pub image_volumes: ImageVolumes,
    /// Temporary directory for large image downloads.
    pub big_files_temporary_dir: PathBuf,
    /// Dropped option, read only to warn about it.
    #[serde(skip_serializing)]
    pub registries: Vec<String>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            default_transport: "docker://".to_string(),
            global_auth_file: PathBuf::new(),
            pause_image: DEFAULT_PAUSE_IMAGE.to_string(),
            pause_image_auth_file: PathBuf::new(),
            pause_command: "/pause".to_string(),
            pinned_images: Vec::new(),
            signature_policy: PathBuf::new(),
            signature_policy_dir: PathBuf::from(SIGNATURE_POLICY_DIR),
            insecure_registries: Vec::new(),
            image_volumes: ImageVolumes::default(),
            big_files_temporary_dir: PathBuf::new(),
            registries: Vec::new(),
        }
    }
}

impl ImageConfig {
    /// The infra image as a parsed reference.
    ///
    /// # Errors
    ///
    /// Fails when `pause_image` is not a valid registry reference.
    pub fn parse_pause_image(&self) -> ConfigResult<ImageReference> {
        ImageReference::parse(&self.pause_image)
    }

    /// Check the policy directory and infra image; in execution mode create
    /// the policy directory.
    ///
    /// # Errors
    ///
    /// Fails for a relative policy directory, an invalid infra image, or a
    /// policy directory that cannot be created.
    pub fn validate(&self, mode: ValidationMode) -> ConfigResult<()> {
        if !self.signature_policy_dir.is_absolute() {
            return Err(ConfigError::invalid(format!(
                "signature policy dir {:?} is not absolute",
                self.signature_policy_dir
            )));
        }
        self.parse_pause_image().map_err(|e| {
            ConfigError::invalid(format!("invalid pause image {:?}: {e}", self.pause_image))
        })?;

        if mode.is_execution() {
            std::fs::create_dir_all(&self.signature_policy_dir).map_err(|e| {
                ConfigError::invalid(format!("cannot create signature policy dir: {e}"))
            })?;
        }
        Ok(())
    }
}
