//! Administrative channel to a running MinIO deployment, driven through the `mc` client.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Backend, BucketPolicy, ServerInfo, ServerMode, ServerProperties};

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use url::Url;

use crate::types::{AdminInfoResponse, ErrorResponse};

/// Operations the supervisor needs from the engine's admin channel.
///
/// Every call is bounded by a timeout so that a hung server cannot hang the caller.
#[async_trait]
pub trait AdminClient
where
    Self: Send + Sync + 'static,
{
    /// Queries the deployment status, giving up after `timeout`.
    async fn server_info(&self, timeout: Duration) -> Result<ServerInfo>;

    /// Asks the server to stop gracefully.
    async fn service_stop(&self) -> Result<()>;

    /// Checks whether a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Creates a bucket, optionally pinned to a region.
    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()>;

    /// Applies an anonymous access policy to a bucket.
    async fn set_anonymous_policy(&self, bucket: &str, policy: BucketPolicy) -> Result<()>;

    /// Persists the client alias so operators can use `mc` inside the container.
    async fn set_alias(&self) -> Result<()>;
}

/// Options for configuring `McAdminClient`.
#[derive(Clone)]
pub struct McAdminClientOptions {
    /// Root user used to authenticate.
    pub access_key: Option<String>,

    /// Alias the deployment is registered under.
    pub alias: String,

    /// Optional `--config-dir` for the client.
    pub config_dir: Option<PathBuf>,

    /// Endpoint of the local server, e.g. `http://localhost:9000`.
    pub endpoint: Url,

    /// Path to the `mc` binary.
    pub executable: PathBuf,

    /// Root password used to authenticate.
    pub secret_key: Option<String>,

    /// Deadline applied to commands that do not take an explicit one.
    pub timeout: Duration,
}

impl std::fmt::Debug for McAdminClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McAdminClientOptions")
            .field("access_key", &self.access_key)
            .field("alias", &self.alias)
            .field("config_dir", &self.config_dir)
            .field("endpoint", &self.endpoint.as_str())
            .field("executable", &self.executable)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// `AdminClient` implementation that shells out to `mc --json`.
#[derive(Clone, Debug)]
pub struct McAdminClient {
    options: McAdminClientOptions,
}

impl McAdminClient {
    /// Creates a new `McAdminClient`.
    #[must_use]
    pub const fn new(options: McAdminClientOptions) -> Self {
        Self { options }
    }

    fn target(&self, bucket: &str) -> String {
        format!("{}/{}", self.options.alias, bucket)
    }

    /// Endpoint URL with credentials embedded, as expected by `MC_HOST_<alias>`.
    fn host_url(&self) -> Result<Option<Url>> {
        let (Some(access_key), Some(secret_key)) =
            (&self.options.access_key, &self.options.secret_key)
        else {
            return Ok(None);
        };

        let mut url = self.options.endpoint.clone();
        url.set_username(access_key)
            .map_err(|()| Error::Url(format!("cannot set user on {}", self.options.endpoint)))?;
        url.set_password(Some(secret_key))
            .map_err(|()| Error::Url(format!("cannot set password on {}", self.options.endpoint)))?;

        Ok(Some(url))
    }

    fn command(&self, args: &[&str]) -> Result<Command> {
        let mut command = Command::new(&self.options.executable);
        command.arg("--json");

        if let Some(config_dir) = &self.options.config_dir {
            command.arg("--config-dir").arg(config_dir);
        }

        if let Some(url) = self.host_url()? {
            command.env(format!("MC_HOST_{}", self.options.alias), url.as_str());
        }

        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(command)
    }

    async fn run(&self, name: &'static str, args: &[&str], timeout: Duration) -> Result<Output> {
        debug!("running mc {name}");

        let mut command = self.command(args)?;

        tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| Error::Timeout {
                command: name,
                timeout,
            })?
            .map_err(|e| Error::Io("failed to run mc", e))
    }

    async fn execute(&self, name: &'static str, args: &[&str], timeout: Duration) -> Result<String> {
        let output = self.run(name, args, timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            return Err(Error::Command {
                command: name,
                status: output.status,
                message: Self::parse_error_output(&stdout)
                    .unwrap_or_else(|| String::from_utf8_lossy(&output.stderr).trim().to_string()),
            });
        }

        Ok(stdout)
    }

    fn parse_error_output(output: &str) -> Option<String> {
        Self::parse_error_response(output).map(|response| response.describe())
    }

    fn parse_error_response(output: &str) -> Option<ErrorResponse> {
        output
            .lines()
            .find_map(|line| serde_json::from_str::<ErrorResponse>(line).ok())
    }

    fn parse_info_output(output: &str) -> Result<ServerInfo> {
        serde_json::from_str::<AdminInfoResponse>(output)
            .map(|response| response.info)
            .map_err(|e| Error::Json("admin info", e))
    }
}

#[async_trait]
impl AdminClient for McAdminClient {
    async fn server_info(&self, timeout: Duration) -> Result<ServerInfo> {
        let stdout = self
            .execute("admin info", &["admin", "info", self.options.alias.as_str()], timeout)
            .await?;

        Self::parse_info_output(&stdout)
    }

    async fn service_stop(&self) -> Result<()> {
        self.execute(
            "admin service stop",
            &["admin", "service", "stop", self.options.alias.as_str()],
            self.options.timeout,
        )
        .await?;

        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let target = self.target(bucket);
        let output = self
            .run("stat", &["stat", target.as_str()], self.options.timeout)
            .await?;

        if output.status.success() {
            return Ok(true);
        }

        match Self::parse_error_response(&String::from_utf8_lossy(&output.stdout)) {
            Some(response) if response.is_not_found() => Ok(false),
            response => Err(Error::Command {
                command: "stat",
                status: output.status,
                message: response.map_or_else(
                    || String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    |response| response.describe(),
                ),
            }),
        }
    }

    async fn make_bucket(&self, bucket: &str, region: Option<&str>) -> Result<()> {
        let target = self.target(bucket);
        let mut args = vec!["mb"];
        if let Some(region) = region {
            args.extend(["--region", region]);
        }
        args.push(target.as_str());

        self.execute("mb", &args, self.options.timeout).await?;

        Ok(())
    }

    async fn set_anonymous_policy(&self, bucket: &str, policy: BucketPolicy) -> Result<()> {
        let target = self.target(bucket);

        self.execute(
            "anonymous set",
            &["anonymous", "set", policy.as_str(), target.as_str()],
            self.options.timeout,
        )
        .await?;

        Ok(())
    }

    async fn set_alias(&self) -> Result<()> {
        let endpoint = self.options.endpoint.as_str().trim_end_matches('/');
        let mut args = vec!["alias", "set", self.options.alias.as_str(), endpoint];
        if let (Some(access_key), Some(secret_key)) =
            (&self.options.access_key, &self.options.secret_key)
        {
            args.extend([access_key.as_str(), secret_key.as_str()]);
        }

        self.execute("alias set", &args, self.options.timeout).await?;

        Ok(())
    }
}
