use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::Error;

/// Operational mode reported by `mc admin info`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// The deployment is serving requests.
    Online,

    /// The deployment is unreachable or has lost quorum.
    Offline,

    /// The deployment is still formatting or healing drives.
    Initializing,

    /// Any mode this client does not know about.
    #[serde(other)]
    Unknown,
}

/// Storage backend summary.
#[derive(Clone, Debug, Deserialize)]
pub struct Backend {
    /// Backend type, usually `Erasure` or `FS`.
    #[serde(rename = "backendType")]
    pub backend_type: String,

    /// Number of drives currently online.
    #[serde(rename = "onlineDisks", default)]
    pub online_disks: Option<u32>,

    /// Number of drives currently offline.
    #[serde(rename = "offlineDisks", default)]
    pub offline_disks: Option<u32>,
}

/// Per-server properties.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerProperties {
    /// State of the server, `online` or `offline`.
    pub state: String,

    /// Endpoint of the server (`host:port`).
    pub endpoint: String,

    /// Uptime in seconds.
    #[serde(default)]
    pub uptime: Option<u64>,

    /// Release tag of the server binary.
    #[serde(default)]
    pub version: Option<String>,
}

/// Status of a running deployment as reported by `mc admin info`.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerInfo {
    /// Overall operational mode.
    pub mode: ServerMode,

    /// Deployment identifier.
    #[serde(rename = "deploymentID", default)]
    pub deployment_id: Option<String>,

    /// Backend summary.
    #[serde(default)]
    pub backend: Option<Backend>,

    /// Servers making up the deployment.
    #[serde(default)]
    pub servers: Vec<ServerProperties>,
}

impl ServerInfo {
    /// Whether the deployment reports itself as online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.mode == ServerMode::Online
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct AdminInfoResponse {
    pub info: ServerInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorCode {
    #[serde(rename = "Code", default)]
    pub code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorCause {
    pub message: String,
    #[serde(default)]
    pub error: Option<ErrorCode>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    pub message: String,
    #[serde(default)]
    pub cause: Option<ErrorCause>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: ErrorDetail,
}

impl ErrorResponse {
    pub fn describe(&self) -> String {
        match &self.error.cause {
            Some(cause) => format!("{} ({})", self.error.message, cause.message),
            None => self.error.message.clone(),
        }
    }

    /// Whether the server reported the target bucket as missing.
    pub fn is_not_found(&self) -> bool {
        self.error.cause.as_ref().is_some_and(|cause| {
            cause
                .error
                .as_ref()
                .and_then(|error| error.code.as_deref())
                .map_or_else(
                    || cause.message.contains("does not exist"),
                    |code| code == "NoSuchBucket",
                )
        })
    }
}

/// Anonymous access policy applied to a bucket.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BucketPolicy {
    /// Anonymous users may download objects.
    Download,

    /// No anonymous access.
    None,

    /// Anonymous users may upload and download objects.
    Public,

    /// Anonymous users may upload objects.
    Upload,
}

impl BucketPolicy {
    /// Returns the label understood by `mc anonymous set`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::None => "none",
            Self::Public => "public",
            Self::Upload => "upload",
        }
    }
}

impl fmt::Display for BucketPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BucketPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            // `private` is the name older client releases used for `none`
            "none" | "private" => Ok(Self::None),
            "public" => Ok(Self::Public),
            "upload" => Ok(Self::Upload),
            other => Err(Error::UnknownPolicy(other.to_string())),
        }
    }
}
