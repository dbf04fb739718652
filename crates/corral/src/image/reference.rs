//! Registry image reference parsing.

use std::fmt;
use std::str::FromStr;

use corral_common::{ConfigError, ConfigResult};
use once_cell::sync::Lazy;
use regex::Regex;

static PATH_COMPONENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid reference pattern")
});

static DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$")
        .expect("valid reference pattern")
});

static TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("valid reference pattern"));

static DIGEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-fA-F0-9]{32,}$").expect("valid reference pattern")
});

/// A fully qualified registry image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, with optional port.
    pub registry: String,
    /// Repository path.
    pub repository: String,
    /// Tag, `latest` when neither tag nor digest is given.
    pub tag: Option<String>,
    /// Content digest.
    pub digest: Option<String>,
}

impl ImageReference {
    /// Registry used for names without a domain.
    pub const DEFAULT_REGISTRY: &'static str = "docker.io";
    /// Tag used when none is given.
    pub const DEFAULT_TAG: &'static str = "latest";

    /// Parse and normalise an image reference.
    ///
    /// - `pause` -> `docker.io/library/pause:latest`
    /// - `registry.k8s.io/pause:3.10` -> unchanged
    /// - `localhost:5000/pause@sha256:...` -> registry with port, digest only
    ///
    /// # Errors
    ///
    /// Fails for transport-prefixed names and anything outside the
    /// distribution reference grammar.
    pub fn parse(reference: &str) -> ConfigResult<Self> {
        let invalid = |why: &str| ConfigError::invalid(format!("invalid image reference {reference:?}: {why}"));

        if reference.is_empty() {
            return Err(invalid("empty"));
        }
        if reference.contains("://") {
            return Err(invalid("transport prefixes are not allowed"));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(invalid("contains whitespace"));
        }

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST.is_match(digest) {
                    return Err(invalid("malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = match name.rfind(':') {
            Some(idx) if !name[idx + 1..].contains('/') => {
                let tag = &name[idx + 1..];
                if !TAG.is_match(tag) {
                    return Err(invalid("malformed tag"));
                }
                (&name[..idx], Some(tag.to_string()))
            }
            _ => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (Self::DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (Self::DEFAULT_REGISTRY.to_string(), format!("library/{name}")),
        };

        if !DOMAIN.is_match(&registry) {
            return Err(invalid("malformed registry"));
        }
        if repository.is_empty() || !repository.split('/').all(|c| PATH_COMPONENT.is_match(c)) {
            return Err(invalid("repository must be lowercase path components"));
        }
        if registry.len() + repository.len() + 1 > 255 {
            return Err(invalid("name longer than 255 characters"));
        }

        let tag = match (&tag, &digest) {
            (None, None) => Some(Self::DEFAULT_TAG.to_string()),
            _ => tag,
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }
}

impl FromStr for ImageReference {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
