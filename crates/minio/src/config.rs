//! Validation of the raw configuration surface into an immutable `RuntimeConfig`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use nix::unistd::{AccessFlags, Uid, access};
use tracing::{error, info, warn};

use crate::buckets::{BucketSpec, parse_bucket_list};
use crate::error::{ConfigError, ConfigViolation};
use crate::topology::{Scheme, Topology};

const MIN_ROOT_USER_LEN: usize = 3;
const MIN_ROOT_PASSWORD_LEN: usize = 8;
const PRIVILEGED_PORT_LIMIT: u16 = 1024;

/// A boolean setting that only accepts `yes` or `no`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum YesNo {
    /// `yes`
    Yes,

    /// `no`
    #[default]
    No,
}

impl YesNo {
    /// Whether the setting is `yes`.
    #[must_use]
    pub const fn is_yes(self) -> bool {
        matches!(self, Self::Yes)
    }
}

impl FromStr for YesNo {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            _ => Err(()),
        }
    }
}

impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_yes() { "yes" } else { "no" })
    }
}

/// Whether the web console is served.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Browser {
    /// Console enabled.
    #[default]
    On,

    /// Console disabled.
    Off,
}

impl Browser {
    /// Value passed to the server in `MINIO_BROWSER`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }
}

/// Root user and password.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// Root password.
    pub password: String,

    /// Root user.
    pub user: String,
}

impl Credentials {
    /// Creates a new credential pair.
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            user: user.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}

/// Raw, unvalidated configuration as supplied by the environment or command line.
#[derive(Clone)]
pub struct ConfigInput {
    /// API port number.
    pub api_port: String,

    /// `on` or `off`.
    pub browser: Option<String>,

    /// Directory holding TLS certificates.
    pub certs_dir: PathBuf,

    /// Console port number.
    pub console_port: String,

    /// Data directory used in standalone mode and as the default drive.
    pub data_dir: PathBuf,

    /// Buckets to create at setup time, `name[:policy]` separated by `,` or `;`.
    pub default_buckets: Option<String>,

    /// `yes` to run as part of a distributed deployment.
    pub distributed_mode: String,

    /// Node list for distributed mode.
    pub distributed_nodes: Option<String>,

    /// `yes` to rotate root credentials when they change.
    pub force_new_keys: String,

    /// File the server writes HTTP traces to.
    pub http_trace: Option<PathBuf>,

    /// File the server's process identifier is recorded in.
    pub pid_file: PathBuf,

    /// Region to create buckets in.
    pub region: Option<String>,

    /// Root password.
    pub root_password: Option<String>,

    /// Root user.
    pub root_user: Option<String>,

    /// `http` or `https`.
    pub scheme: String,

    /// `yes` to skip client configuration and bucket provisioning.
    pub skip_client: String,
}

impl fmt::Debug for ConfigInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigInput")
            .field("api_port", &self.api_port)
            .field("browser", &self.browser)
            .field("certs_dir", &self.certs_dir)
            .field("console_port", &self.console_port)
            .field("data_dir", &self.data_dir)
            .field("default_buckets", &self.default_buckets)
            .field("distributed_mode", &self.distributed_mode)
            .field("distributed_nodes", &self.distributed_nodes)
            .field("force_new_keys", &self.force_new_keys)
            .field("http_trace", &self.http_trace)
            .field("pid_file", &self.pid_file)
            .field("region", &self.region)
            .field(
                "root_password",
                &self.root_password.as_ref().map(|_| "<redacted>"),
            )
            .field("root_user", &self.root_user)
            .field("scheme", &self.scheme)
            .field("skip_client", &self.skip_client)
            .finish()
    }
}

impl Default for ConfigInput {
    fn default() -> Self {
        Self {
            api_port: "9000".to_string(),
            browser: None,
            certs_dir: PathBuf::from("/certs"),
            console_port: "9001".to_string(),
            data_dir: PathBuf::from("/data"),
            default_buckets: None,
            distributed_mode: "no".to_string(),
            distributed_nodes: None,
            force_new_keys: "no".to_string(),
            http_trace: None,
            pid_file: PathBuf::from("/tmp/minio.pid"),
            region: None,
            root_password: None,
            root_user: None,
            scheme: "http".to_string(),
            skip_client: "no".to_string(),
        }
    }
}

/// Validated configuration. Only `ConfigValidator` can build one.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    api_port: u16,
    browser: Browser,
    certs_dir: PathBuf,
    console_port: u16,
    credentials: Option<Credentials>,
    data_dir: PathBuf,
    default_buckets: Vec<BucketSpec>,
    distributed: YesNo,
    force_new_keys: YesNo,
    http_trace: Option<PathBuf>,
    pid_file: PathBuf,
    region: Option<String>,
    scheme: Scheme,
    skip_client: YesNo,
    topology: Topology,
}

impl RuntimeConfig {
    /// API port number.
    #[must_use]
    pub const fn api_port(&self) -> u16 {
        self.api_port
    }

    /// Console setting.
    #[must_use]
    pub const fn browser(&self) -> Browser {
        self.browser
    }

    /// Directory holding TLS certificates.
    #[must_use]
    pub fn certs_dir(&self) -> &Path {
        &self.certs_dir
    }

    /// Console port number.
    #[must_use]
    pub const fn console_port(&self) -> u16 {
        self.console_port
    }

    /// Root credentials, if configured.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Buckets to provision at setup time.
    #[must_use]
    pub fn default_buckets(&self) -> &[BucketSpec] {
        &self.default_buckets
    }

    /// Whether the node is part of a distributed deployment.
    #[must_use]
    pub const fn distributed(&self) -> YesNo {
        self.distributed
    }

    /// Whether credential rotation is enabled.
    #[must_use]
    pub const fn force_new_keys(&self) -> YesNo {
        self.force_new_keys
    }

    /// HTTP trace file, if any.
    #[must_use]
    pub fn http_trace(&self) -> Option<&Path> {
        self.http_trace.as_deref()
    }

    /// File the server's process identifier is recorded in.
    #[must_use]
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Region for new buckets.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Scheme used to reach this and the other nodes.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Whether client configuration and provisioning are skipped.
    #[must_use]
    pub const fn skip_client(&self) -> YesNo {
        self.skip_client
    }

    /// Cluster members. Empty in standalone mode.
    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }
}

/// Checks every configuration rule and reports all failures at once.
#[derive(Clone, Debug)]
pub struct ConfigValidator {
    privileged_ports_allowed: bool,
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigValidator {
    /// Creates a validator for the current process, which may bind privileged ports
    /// only when running as root.
    #[must_use]
    pub fn new() -> Self {
        Self {
            privileged_ports_allowed: Uid::effective().is_root(),
        }
    }

    /// Overrides whether privileged ports are accepted.
    #[must_use]
    pub const fn with_privileged_ports(mut self, allowed: bool) -> Self {
        self.privileged_ports_allowed = allowed;
        self
    }

    /// Validates `input`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` listing every rule that failed.
    pub fn validate(&self, input: ConfigInput) -> Result<RuntimeConfig, ConfigError> {
        let mut violations = Vec::new();

        let distributed = yes_no(
            "MINIO_DISTRIBUTED_MODE_ENABLED",
            &input.distributed_mode,
            &mut violations,
        );
        let skip_client = yes_no("MINIO_SKIP_CLIENT", &input.skip_client, &mut violations);
        let force_new_keys =
            yes_no("MINIO_FORCE_NEW_KEYS", &input.force_new_keys, &mut violations);

        let scheme = input.scheme.parse::<Scheme>().unwrap_or_else(|_| {
            violations.push(ConfigViolation::InvalidScheme(input.scheme.clone()));
            Scheme::default()
        });

        let root_user = non_empty(input.root_user);
        let root_password = non_empty(input.root_password);
        let nodes = non_empty(input.distributed_nodes);

        let credentials = match (root_user, root_password) {
            (Some(user), Some(password)) => {
                if user.len() < MIN_ROOT_USER_LEN {
                    violations.push(ConfigViolation::RootUserTooShort);
                }
                if password.len() < MIN_ROOT_PASSWORD_LEN {
                    violations.push(ConfigViolation::RootPasswordTooShort);
                }
                Some(Credentials { password, user })
            }
            (None, None) => {
                if distributed.is_yes() {
                    violations.push(ConfigViolation::MissingRootCredentials);
                }
                None
            }
            _ => {
                violations.push(if distributed.is_yes() {
                    ConfigViolation::MissingRootCredentials
                } else {
                    ConfigViolation::PartialRootCredentials
                });
                None
            }
        };

        let topology = match nodes {
            Some(raw) if distributed.is_yes() => check_topology(&raw, scheme, &mut violations),
            None if distributed.is_yes() => {
                violations.push(ConfigViolation::MissingNodes);
                Topology::default()
            }
            Some(_) => {
                warn!(
                    "MINIO_DISTRIBUTED_NODES is set but distributed mode is disabled, it will be ignored"
                );
                Topology::default()
            }
            None => Topology::default(),
        };

        let http_trace = input.http_trace.filter(|path| !path.as_os_str().is_empty());
        if let Some(path) = &http_trace {
            if is_writable(path) {
                info!("HTTP traces will be written to {}", path.display());
            } else {
                violations.push(ConfigViolation::TraceNotWritable(path.clone()));
            }
        }

        let browser = match non_empty(input.browser).as_deref() {
            None | Some("on") => Browser::On,
            Some("off") => {
                warn!("MINIO_BROWSER is set to off, the web console will be disabled");
                Browser::Off
            }
            Some(other) => {
                warn!("MINIO_BROWSER has an unrecognised value '{other}', the console stays enabled");
                Browser::On
            }
        };

        let console_port = self.port(
            "MINIO_CONSOLE_PORT_NUMBER",
            &input.console_port,
            &mut violations,
        );
        let api_port = self.port("MINIO_API_PORT_NUMBER", &input.api_port, &mut violations);
        if let (Some(console), Some(api)) = (console_port, api_port) {
            if console == api {
                violations.push(ConfigViolation::PortConflict(api));
            }
        }

        let default_buckets = non_empty(input.default_buckets).map_or_else(Vec::new, |raw| {
            parse_bucket_list(&raw).unwrap_or_else(|violation| {
                violations.push(violation);
                Vec::new()
            })
        });

        if !violations.is_empty() {
            for violation in &violations {
                error!("{violation}");
            }

            return Err(ConfigError::new(violations));
        }

        Ok(RuntimeConfig {
            api_port: api_port.unwrap_or_default(),
            browser,
            certs_dir: input.certs_dir,
            console_port: console_port.unwrap_or_default(),
            credentials,
            data_dir: input.data_dir,
            default_buckets,
            distributed,
            force_new_keys,
            http_trace,
            pid_file: input.pid_file,
            region: non_empty(input.region),
            scheme,
            skip_client,
            topology,
        })
    }

    fn port(
        &self,
        setting: &'static str,
        value: &str,
        violations: &mut Vec<ConfigViolation>,
    ) -> Option<u16> {
        let Some(port) = value.trim().parse::<u16>().ok().filter(|port| *port > 0) else {
            violations.push(ConfigViolation::InvalidPort {
                setting,
                value: value.to_string(),
            });
            return None;
        };

        if port < PRIVILEGED_PORT_LIMIT && !self.privileged_ports_allowed {
            violations.push(ConfigViolation::PrivilegedPort { setting, port });
        }

        Some(port)
    }
}

/// Validates `input` for the current process.
///
/// # Errors
///
/// Returns a `ConfigError` listing every rule that failed.
pub fn validate(input: ConfigInput) -> Result<RuntimeConfig, ConfigError> {
    ConfigValidator::new().validate(input)
}

fn check_topology(raw: &str, scheme: Scheme, violations: &mut Vec<ConfigViolation>) -> Topology {
    match Topology::parse(raw, scheme) {
        Ok(topology @ Topology::Range(_)) => topology,
        Ok(topology) => {
            let count = topology.nodes().len();
            if count < 4 || count % 2 != 0 {
                violations.push(ConfigViolation::InvalidNodeCount(count));
            }
            topology
        }
        Err(e) => {
            violations.push(ConfigViolation::InvalidNodeList(e));
            Topology::default()
        }
    }
}

fn yes_no(setting: &'static str, value: &str, violations: &mut Vec<ConfigViolation>) -> YesNo {
    value.parse().unwrap_or_else(|()| {
        violations.push(ConfigViolation::InvalidYesNo {
            setting,
            value: value.to_string(),
        });
        YesNo::default()
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

/// Whether the current process may write `path`, or create it in its parent directory.
fn is_writable(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }

    if path.exists() {
        return access(path, AccessFlags::W_OK).is_ok();
    }

    path.parent()
        .map(|parent| if parent.as_os_str().is_empty() { Path::new(".") } else { parent })
        .is_some_and(|parent| parent.is_dir() && access(parent, AccessFlags::W_OK).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn distributed(nodes: &str) -> ConfigInput {
        ConfigInput {
            distributed_mode: "yes".to_string(),
            distributed_nodes: Some(nodes.to_string()),
            root_password: Some("miniosecret".to_string()),
            root_user: Some("minio".to_string()),
            ..ConfigInput::default()
        }
    }

    fn validator() -> ConfigValidator {
        ConfigValidator::new().with_privileged_ports(false)
    }

    fn nodes(count: usize) -> String {
        (1..=count)
            .map(|i| format!("minio{i}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    #[test]
    fn test_node_count_must_be_even_and_at_least_four() {
        for count in 1..=8 {
            let result = validator().validate(distributed(&nodes(count)));

            if count >= 4 && count % 2 == 0 {
                assert!(result.is_ok(), "{count} nodes should be accepted");
            } else {
                let error = result.unwrap_err();
                assert_eq!(
                    error.violations(),
                    &[ConfigViolation::InvalidNodeCount(count)],
                    "{count} nodes should be rejected"
                );
            }
        }
    }

    #[test]
    fn test_range_syntax_skips_node_count() {
        for raw in ["minio{1...3}", "minio{1...4}/data{1...2}", "a{1...3},b,c"] {
            let config = validator().validate(distributed(raw)).unwrap();

            assert!(config.topology().is_range());
        }
    }

    #[test]
    fn test_distributed_valid_config_with_writable_trace() {
        let dir = TempDir::new().unwrap();
        let input = ConfigInput {
            http_trace: Some(dir.path().join("trace.log")),
            ..distributed("minio1,minio2;minio3,minio4")
        };

        let config = validator().validate(input).unwrap();

        assert!(config.distributed().is_yes());
        assert_eq!(config.topology().nodes().len(), 4);
        assert_eq!(config.credentials(), Some(&Credentials::new("minio", "miniosecret")));
        assert_eq!(config.http_trace(), Some(dir.path().join("trace.log").as_path()));
        assert_eq!(config.api_port(), 9000);
        assert_eq!(config.console_port(), 9001);
    }

    #[test]
    fn test_trace_target_must_not_be_a_directory() {
        let dir = TempDir::new().unwrap();
        let input = ConfigInput {
            http_trace: Some(dir.path().to_path_buf()),
            ..distributed("minio1,minio2;minio3,minio4")
        };

        let error = validator().validate(input).unwrap_err();

        assert_eq!(
            error.violations(),
            &[ConfigViolation::TraceNotWritable(dir.path().to_path_buf())]
        );
    }

    #[test]
    fn test_all_violations_are_accumulated() {
        let input = ConfigInput {
            api_port: "80".to_string(),
            console_port: "not-a-port".to_string(),
            distributed_mode: "yes".to_string(),
            distributed_nodes: None,
            force_new_keys: "true".to_string(),
            http_trace: Some(PathBuf::from("/nonexistent/dir/trace.log")),
            skip_client: "maybe".to_string(),
            ..ConfigInput::default()
        };

        let error = validator().validate(input).unwrap_err();

        assert_eq!(
            error.violations(),
            &[
                ConfigViolation::InvalidYesNo {
                    setting: "MINIO_SKIP_CLIENT",
                    value: "maybe".to_string(),
                },
                ConfigViolation::InvalidYesNo {
                    setting: "MINIO_FORCE_NEW_KEYS",
                    value: "true".to_string(),
                },
                ConfigViolation::MissingRootCredentials,
                ConfigViolation::MissingNodes,
                ConfigViolation::TraceNotWritable(PathBuf::from("/nonexistent/dir/trace.log")),
                ConfigViolation::InvalidPort {
                    setting: "MINIO_CONSOLE_PORT_NUMBER",
                    value: "not-a-port".to_string(),
                },
                ConfigViolation::PrivilegedPort {
                    setting: "MINIO_API_PORT_NUMBER",
                    port: 80,
                },
            ]
        );
    }

    #[test]
    fn test_boolean_settings_only_accept_yes_or_no() {
        for value in ["yes", "no"] {
            let input = ConfigInput {
                skip_client: value.to_string(),
                ..ConfigInput::default()
            };
            assert!(validator().validate(input).is_ok());
        }

        for value in ["Yes", "true", "1", ""] {
            let input = ConfigInput {
                distributed_mode: value.to_string(),
                ..ConfigInput::default()
            };
            assert!(validator().validate(input).is_err(), "{value:?} accepted");
        }
    }

    #[test]
    fn test_privileged_ports_allowed_for_root() {
        let input = ConfigInput {
            api_port: "443".to_string(),
            ..ConfigInput::default()
        };

        assert!(validator().validate(input.clone()).is_err());
        assert_eq!(
            ConfigValidator::new()
                .with_privileged_ports(true)
                .validate(input)
                .unwrap()
                .api_port(),
            443
        );
    }

    #[test]
    fn test_port_conflict() {
        let input = ConfigInput {
            api_port: "9000".to_string(),
            console_port: "9000".to_string(),
            ..ConfigInput::default()
        };

        let error = validator().validate(input).unwrap_err();

        assert_eq!(error.violations(), &[ConfigViolation::PortConflict(9000)]);
    }

    #[test]
    fn test_nodes_ignored_when_not_distributed() {
        let input = ConfigInput {
            distributed_nodes: Some("minio1,minio2,minio3".to_string()),
            ..ConfigInput::default()
        };

        let config = validator().validate(input).unwrap();

        assert!(!config.distributed().is_yes());
        assert!(config.topology().is_empty());
    }

    #[test]
    fn test_browser_never_fails() {
        for value in ["off", "on", "whatever"] {
            let input = ConfigInput {
                browser: Some(value.to_string()),
                ..ConfigInput::default()
            };

            let config = validator().validate(input).unwrap();
            let expected = if value == "off" { Browser::Off } else { Browser::On };
            assert_eq!(config.browser(), expected);
        }
    }

    #[test]
    fn test_credential_rules() {
        let partial = ConfigInput {
            root_user: Some("minio".to_string()),
            ..ConfigInput::default()
        };
        assert_eq!(
            validator().validate(partial).unwrap_err().violations(),
            &[ConfigViolation::PartialRootCredentials]
        );

        let short = ConfigInput {
            root_password: Some("short".to_string()),
            root_user: Some("mi".to_string()),
            ..ConfigInput::default()
        };
        assert_eq!(
            validator().validate(short).unwrap_err().violations(),
            &[
                ConfigViolation::RootUserTooShort,
                ConfigViolation::RootPasswordTooShort,
            ]
        );

        let empty = ConfigInput {
            root_password: Some(String::new()),
            root_user: Some(String::new()),
            ..ConfigInput::default()
        };
        assert!(validator().validate(empty).unwrap().credentials().is_none());
    }

    #[test]
    fn test_default_buckets_are_parsed() {
        let input = ConfigInput {
            default_buckets: Some("logs;data:download".to_string()),
            region: Some("eu-west-1".to_string()),
            ..ConfigInput::default()
        };

        let config = validator().validate(input).unwrap();

        assert_eq!(config.default_buckets().len(), 2);
        assert_eq!(config.default_buckets()[1].name(), "data");
        assert_eq!(config.region(), Some("eu-west-1"));
    }

    #[test]
    fn test_debug_output_hides_root_password() {
        let input = distributed("minio1,minio2;minio3,minio4");

        let output = format!("{input:?}");

        assert!(!output.contains("miniosecret"));
        assert!(output.contains("<redacted>"));
        assert!(output.contains("minio1,minio2;minio3,minio4"));
    }
}
