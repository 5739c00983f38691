//! Host directory lookups for session targets.
//!
//! Sessions are requested by hostname. The directory decides whether a
//! hostname is known and supplies the address and login user to connect with.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{DirectoryConfig, HostConfig};
use crate::session::RemoteTarget;

/// Errors raised while resolving a host.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The hostname is not in the directory.
    #[error("unknown host: {0}")]
    UnknownHost(String),

    /// Neither the directory nor the request supplied an address.
    #[error("no address known for host {0}")]
    MissingAddress(String),

    /// The address-to-user mapping file could not be read.
    #[error("failed to load user mapping {path}: {reason}")]
    MappingFile {
        /// Mapping file location.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

/// Source of connection targets for hostnames.
pub trait HostDirectory: Send + Sync + 'static {
    /// Whether sessions may be opened to `hostname`.
    fn is_known(&self, hostname: &str) -> bool;

    /// Resolve the address and login user for `hostname`.
    ///
    /// `address` is used when the directory has none for the host; `user`
    /// overrides any mapped login.
    fn resolve(
        &self,
        hostname: &str,
        address: Option<&str>,
        user: Option<&str>,
    ) -> Result<RemoteTarget, DirectoryError>;
}

/// Directory backed by the `[directory]` configuration section.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    hosts: BTreeMap<String, HostConfig>,
    default_user: String,
    allow_unlisted: bool,
    user_mapping: HashMap<String, String>,
}

impl StaticDirectory {
    /// Build a directory from configuration, loading the user mapping file
    /// if one is configured.
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let user_mapping = match &config.user_mapping_file {
            Some(path) => load_user_mapping(path)?,
            None => HashMap::new(),
        };

        Ok(Self {
            hosts: config.hosts.clone(),
            default_user: config.default_user.clone(),
            allow_unlisted: config.allow_unlisted,
            user_mapping,
        })
    }

    /// Replace the address-to-user mapping.
    pub fn with_user_mapping(mut self, mapping: HashMap<String, String>) -> Self {
        self.user_mapping = mapping;
        self
    }

    /// Number of configured hosts.
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns true when no hosts are configured.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl HostDirectory for StaticDirectory {
    fn is_known(&self, hostname: &str) -> bool {
        self.allow_unlisted || self.hosts.contains_key(hostname)
    }

    fn resolve(
        &self,
        hostname: &str,
        address: Option<&str>,
        user: Option<&str>,
    ) -> Result<RemoteTarget, DirectoryError> {
        if !self.is_known(hostname) {
            return Err(DirectoryError::UnknownHost(hostname.to_string()));
        }

        let entry = self.hosts.get(hostname);
        let address = entry
            .and_then(|host| non_empty(host.address.as_deref()))
            .or_else(|| non_empty(address))
            .ok_or_else(|| DirectoryError::MissingAddress(hostname.to_string()))?
            .to_string();

        let user = non_empty(user)
            .or_else(|| entry.and_then(|host| non_empty(host.user.as_deref())))
            .or_else(|| self.user_mapping.get(&address).map(String::as_str))
            .unwrap_or(&self.default_user)
            .to_string();

        Ok(RemoteTarget {
            hostname: hostname.to_string(),
            address,
            user,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Read a JSON object mapping addresses to login users.
///
/// A missing file yields an empty mapping.
pub fn load_user_mapping(path: &Path) -> Result<HashMap<String, String>, DirectoryError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "User mapping file not found, using default user");
        return Ok(HashMap::new());
    }

    let contents = fs::read_to_string(path).map_err(|e| DirectoryError::MappingFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let mapping: HashMap<String, String> =
        serde_json::from_str(&contents).map_err(|e| DirectoryError::MappingFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    tracing::debug!(path = %path.display(), entries = mapping.len(), "Loaded user mapping");
    Ok(mapping)
}
