//! Supervises the MinIO server of a single storage node: validates its configuration,
//! locates the node in its cluster, rotates root credentials, provisions default buckets
//! and starts or stops the server process.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod buckets;
mod config;
mod credentials;
mod error;
mod identity;
mod process;
mod supervisor;
mod topology;

pub use buckets::{BucketProvisioner, BucketSpec, parse_bucket_list};
pub use config::{Browser, ConfigInput, ConfigValidator, Credentials, RuntimeConfig, YesNo, validate};
pub use credentials::{CredentialRotator, CredentialStore, RotationOutcome};
pub use error::{ConfigError, ConfigViolation, Error, Result, TopologyError};
pub use identity::{HostResolver, SystemHostResolver, self_node};
pub use process::{EngineCommand, ProcessControl, SystemProcessControl, spawn_attached};
pub use supervisor::{ProcessSupervisor, SupervisorOptions};
pub use topology::{NodeSpec, ResolvedDrives, Scheme, Topology, is_range_syntax, resolve_drives};

use std::process::ExitStatus;
use std::sync::Arc;

use proven_minio_admin::AdminClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the setup phase ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SetupOutcome {
    /// The node is initialised and can be run.
    Ready,

    /// Root credentials were rotated; the container must be restarted first.
    RestartRequired,
}

/// Options for creating a new `MinioNode`.
pub struct MinioNodeOptions<P, A, R>
where
    P: ProcessControl,
    A: AdminClient,
    R: HostResolver,
{
    /// Administrative channel to the server.
    pub admin: A,

    /// Validated configuration.
    pub config: RuntimeConfig,

    /// Process launcher and liveness check.
    pub process_control: P,

    /// Host name resolution used to locate this node.
    pub resolver: R,

    /// Supervisor timings and binary path.
    pub supervisor: SupervisorOptions,
}

/// One storage node and the operations its entrypoint performs.
pub struct MinioNode<P, A, R>
where
    P: ProcessControl,
    A: AdminClient,
    R: HostResolver,
{
    admin: Arc<A>,
    config: Arc<RuntimeConfig>,
    resolver: R,
    supervisor: ProcessSupervisor<P, A>,
}

impl<P, A, R> MinioNode<P, A, R>
where
    P: ProcessControl,
    A: AdminClient,
    R: HostResolver,
{
    /// Creates a new node.
    pub fn new(
        MinioNodeOptions {
            admin,
            config,
            process_control,
            resolver,
            supervisor,
        }: MinioNodeOptions<P, A, R>,
    ) -> Self {
        let admin = Arc::new(admin);
        let config = Arc::new(config);

        Self {
            supervisor: ProcessSupervisor::new(
                config.clone(),
                process_control,
                admin.clone(),
                supervisor,
            ),
            admin,
            config,
            resolver,
        }
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The process supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &ProcessSupervisor<P, A> {
        &self.supervisor
    }

    /// Whether the server is running and online.
    pub async fn is_running(&self) -> bool {
        self.supervisor.is_running().await
    }

    /// Starts the server in the background if it is not running yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be launched.
    pub async fn start(&self) -> Result<()> {
        self.supervisor.start().await
    }

    /// Gracefully stops the server if it is running.
    pub async fn stop(&self) {
        self.supervisor.stop().await;
    }

    /// Runs the server in the foreground until it exits or `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is already running or cannot be managed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ExitStatus> {
        self.supervisor.run(shutdown).await
    }

    /// Persists the configured root credentials, migrating the server when they changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential files cannot be accessed or the migration
    /// start fails.
    pub async fn rotate_credentials(&self) -> Result<RotationOutcome> {
        CredentialRotator::new(&self.config, &self.supervisor)
            .rotate()
            .await
    }

    /// Creates the given buckets if they are missing.
    ///
    /// # Errors
    ///
    /// Returns an error if an admin command fails.
    pub async fn provision_buckets(&self, buckets: &[BucketSpec]) -> Result<()> {
        BucketProvisioner::new(self.admin.as_ref(), self.config.region())
            .provision(buckets)
            .await
    }

    /// The node this host runs as.
    ///
    /// # Errors
    ///
    /// Returns an error if this host cannot be found in the node list.
    pub async fn self_node(&self) -> Result<NodeSpec> {
        self_node(&self.config, &self.resolver).await
    }

    /// Registers the local server with the admin client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client rejects the alias.
    pub async fn configure_client(&self) -> Result<()> {
        if self.config.credentials().is_none() {
            warn!("no root credentials configured, skipping client configuration");
            return Ok(());
        }

        info!("configuring minio client");
        self.admin.set_alias().await?;

        Ok(())
    }

    /// Prepares drives, rotates credentials and, unless the client is skipped, starts
    /// the server once to configure the client and provision the default buckets.
    ///
    /// The server is always stopped again before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub async fn setup(&self) -> Result<SetupOutcome> {
        let own_node = if self.config.distributed().is_yes() && !self.config.topology().is_range()
        {
            let node = self.self_node().await?;
            info!("running as node {}", node.uri());
            Some(node)
        } else {
            None
        };

        self.supervisor.prepare_drives(own_node.as_ref()).await?;

        if self.rotate_credentials().await? == RotationOutcome::RotatedNeedsContainerRestart {
            return Ok(SetupOutcome::RestartRequired);
        }

        if self.config.skip_client().is_yes() {
            info!("MINIO_SKIP_CLIENT is set, skipping client configuration and provisioning");
            return Ok(SetupOutcome::Ready);
        }

        self.start().await?;

        let configured = async {
            self.configure_client().await?;
            self.provision_buckets(self.config.default_buckets()).await
        }
        .await;

        self.stop().await;
        configured?;

        Ok(SetupOutcome::Ready)
    }
}
