//! Node list parsing.
//!
//! A node list is either a set of explicit entries (`host[:port][/path]`) or one or
//! more range expressions such as `minio{1...4}/data{1...2}`. Range expressions are
//! handed to the server untouched; only explicit entries are parsed locally.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use url::Url;

use crate::error::TopologyError;

/// Marker that selects range mode anywhere in a node list.
pub const RANGE_MARKER: &str = "...";

/// Scheme used to reach the nodes.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,

    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Returns the scheme as used in URIs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(TopologyError::InvalidScheme(other.to_string())),
        }
    }
}

/// One cluster member.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct NodeSpec {
    drive: Option<String>,
    host: String,
    port: Option<u16>,
    scheme: Scheme,
}

impl NodeSpec {
    /// The node a standalone server identifies as.
    #[must_use]
    pub fn local(scheme: Scheme) -> Self {
        Self {
            drive: None,
            host: "localhost".to_string(),
            port: None,
            scheme,
        }
    }

    /// Parses a single `host[:port][/path]` entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry does not form a valid URI or has no host.
    pub fn parse(entry: &str, scheme: Scheme) -> Result<Self, TopologyError> {
        let invalid = |reason: String| TopologyError::InvalidNode {
            node: entry.to_string(),
            reason,
        };

        let raw = if entry.contains("://") {
            entry.to_string()
        } else {
            format!("{scheme}://{entry}")
        };

        let url = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;

        let scheme = url.scheme().parse::<Scheme>().map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host".to_string()))?
            .to_string();
        let drive = match url.path() {
            "" | "/" => None,
            path => Some(path.to_string()),
        };

        Ok(Self {
            drive,
            host,
            port: url.port(),
            scheme,
        })
    }

    /// Explicit drive path of the node, if the entry carried one.
    #[must_use]
    pub fn drive(&self) -> Option<&str> {
        self.drive.as_deref()
    }

    /// Drive path component of the node's URI; empty when the entry had none.
    #[must_use]
    pub fn drive_path(&self) -> &str {
        self.drive.as_deref().unwrap_or_default()
    }

    /// Host name or address of the node.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if any.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Scheme used to reach the node.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `scheme://host[:port][/path]` exactly as declared.
    #[must_use]
    pub fn uri(&self) -> String {
        let mut uri = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            uri.push_str(&format!(":{port}"));
        }
        uri.push_str(self.drive_path());

        uri
    }

    /// Server endpoint for the node, filling in the API port and data directory when
    /// the entry did not specify them.
    #[must_use]
    pub fn endpoint(&self, default_port: u16, default_drive: &Path) -> String {
        let port = self.port.unwrap_or(default_port);
        let drive = self
            .drive
            .clone()
            .unwrap_or_else(|| default_drive.to_string_lossy().to_string());
        let separator = if drive.starts_with('/') { "" } else { "/" };

        format!("{}://{}:{port}{separator}{drive}", self.scheme, self.host)
    }
}

/// The drives a node list resolves to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolvedDrives {
    /// One drive path per explicit node, in input order.
    Paths(Vec<String>),

    /// Pass-through range URIs.
    Pattern(Vec<String>),
}

/// Cluster members, either listed one by one or as range expressions.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Topology {
    /// Explicitly listed nodes, in input order.
    Explicit(Vec<NodeSpec>),

    /// `scheme://` prefixed range expressions, never expanded locally.
    Range(Vec<String>),
}

impl Default for Topology {
    fn default() -> Self {
        Self::Explicit(Vec::new())
    }
}

impl Topology {
    /// Parses a comma or semicolon separated node list.
    ///
    /// An empty list yields an empty explicit topology.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit entry is not a valid node.
    pub fn parse(raw: &str, scheme: Scheme) -> Result<Self, TopologyError> {
        if is_range_syntax(raw) {
            return Ok(Self::Range(
                entries(raw)
                    .map(|entry| {
                        if entry.contains("://") {
                            entry.to_string()
                        } else {
                            format!("{scheme}://{entry}")
                        }
                    })
                    .collect(),
            ));
        }

        entries(raw)
            .map(|entry| NodeSpec::parse(entry, scheme))
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Explicit)
    }

    /// Whether the topology uses range expressions.
    #[must_use]
    pub const fn is_range(&self) -> bool {
        matches!(self, Self::Range(_))
    }

    /// Whether no nodes or expressions were given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Explicit(nodes) => nodes.is_empty(),
            Self::Range(patterns) => patterns.is_empty(),
        }
    }

    /// Explicit nodes; empty for range topologies.
    #[must_use]
    pub fn nodes(&self) -> &[NodeSpec] {
        match self {
            Self::Explicit(nodes) => nodes,
            Self::Range(_) => &[],
        }
    }

    /// Drive paths for explicit topologies, or the untouched range URIs.
    #[must_use]
    pub fn drives(&self) -> ResolvedDrives {
        match self {
            Self::Explicit(nodes) => ResolvedDrives::Paths(
                nodes
                    .iter()
                    .map(|node| node.drive_path().to_string())
                    .collect(),
            ),
            Self::Range(patterns) => ResolvedDrives::Pattern(patterns.clone()),
        }
    }

    /// Endpoints passed to `minio server` in distributed mode.
    #[must_use]
    pub fn server_endpoints(&self, api_port: u16, data_dir: &Path) -> Vec<String> {
        match self {
            Self::Explicit(nodes) => nodes
                .iter()
                .map(|node| node.endpoint(api_port, data_dir))
                .collect(),
            Self::Range(patterns) => patterns.clone(),
        }
    }
}

/// Resolves a raw node list straight to its drives.
///
/// # Errors
///
/// Returns an error if an explicit entry is not a valid node.
pub fn resolve_drives(raw: &str, scheme: Scheme) -> Result<ResolvedDrives, TopologyError> {
    Topology::parse(raw, scheme).map(|topology| topology.drives())
}

/// Whether the raw node list uses range expressions.
#[must_use]
pub fn is_range_syntax(raw: &str) -> bool {
    raw.contains(RANGE_MARKER)
}

fn entries(raw: &str) -> impl Iterator<Item = &str> {
    raw.split([',', ';']).flat_map(str::split_whitespace)
}
