use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// An admin command failed in a way that cannot be treated as "not running".
    #[error("admin error: {0}")]
    Admin(#[from] proven_minio_admin::Error),

    /// A server is already running in the foreground slot.
    #[error("minio is already running")]
    AlreadyRunning,

    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// The server binary could not be launched.
    #[error("failed to spawn minio: {0}")]
    Spawn(#[source] std::io::Error),

    /// The topology could not be resolved.
    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Errors raised while resolving the node list.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TopologyError {
    /// A node entry is not a valid `host[:port][/path]`.
    #[error("invalid node '{node}': {reason}")]
    InvalidNode {
        /// The offending entry.
        node: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The scheme is neither `http` nor `https`.
    #[error("invalid scheme '{0}', expected http or https")]
    InvalidScheme(String),

    /// None of the explicit nodes resolves to this host.
    #[error("could not find this host ({0}) in the distributed node list")]
    NodeNotFound(IpAddr),

    /// Range expressions are never expanded locally, so this host cannot be located in them.
    #[error("cannot identify the local node in a range expression node list")]
    RangeNotSelfIdentifiable,
}

/// A single failed configuration rule.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConfigViolation {
    /// Default bucket entry is malformed.
    #[error("invalid default bucket '{entry}': {reason}")]
    InvalidBucket {
        /// The offending entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Explicit node count is odd or lower than four.
    #[error("number of nodes must be even and greater than or equal to 4, got {0}")]
    InvalidNodeCount(usize),

    /// The node list could not be parsed.
    #[error("invalid node list: {0}")]
    InvalidNodeList(TopologyError),

    /// A port setting is not a number in `1..=65535`.
    #[error("{setting} has an invalid value '{value}', expected a port number")]
    InvalidPort {
        /// Name of the setting.
        setting: &'static str,
        /// The raw value.
        value: String,
    },

    /// A boolean setting is neither `yes` nor `no`.
    #[error("{setting} has an invalid value '{value}', allowed values are: yes, no")]
    InvalidYesNo {
        /// Name of the setting.
        setting: &'static str,
        /// The raw value.
        value: String,
    },

    /// Distributed mode is enabled but root credentials are missing.
    #[error("MINIO_ROOT_USER and MINIO_ROOT_PASSWORD are required in distributed mode")]
    MissingRootCredentials,

    /// Distributed mode is enabled but no nodes are listed.
    #[error("MINIO_DISTRIBUTED_NODES is required in distributed mode")]
    MissingNodes,

    /// Only one half of the root credentials was provided.
    #[error("MINIO_ROOT_USER and MINIO_ROOT_PASSWORD must be provided together")]
    PartialRootCredentials,

    /// Console and API share a port.
    #[error("MINIO_CONSOLE_PORT_NUMBER and MINIO_API_PORT_NUMBER are both set to {0}")]
    PortConflict(u16),

    /// A privileged port was requested without root privileges.
    #[error("{setting} is set to privileged port {port}, which requires running as root")]
    PrivilegedPort {
        /// Name of the setting.
        setting: &'static str,
        /// The port.
        port: u16,
    },

    /// Root password is shorter than eight characters.
    #[error("MINIO_ROOT_PASSWORD must be at least 8 characters long")]
    RootPasswordTooShort,

    /// Root user is shorter than three characters.
    #[error("MINIO_ROOT_USER must be at least 3 characters long")]
    RootUserTooShort,

    /// The scheme is neither `http` nor `https`.
    #[error("MINIO_SCHEME has an invalid value '{0}', allowed values are: http, https")]
    InvalidScheme(String),

    /// The HTTP trace target cannot be written.
    #[error("the HTTP trace file {0:?} is not writable")]
    TraceNotWritable(PathBuf),
}

/// Every configuration rule that failed, reported together.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigError {
    violations: Vec<ConfigViolation>,
}

impl ConfigError {
    pub(crate) const fn new(violations: Vec<ConfigViolation>) -> Self {
        Self { violations }
    }

    /// The individual violations, in the order they were found.
    #[must_use]
    pub fn violations(&self) -> &[ConfigViolation] {
        &self.violations
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "; {violation}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ConfigError {}
