//! Starting, observing and stopping the single server instance of this node.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use proven_minio_admin::AdminClient;
use tokio::process::Child;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Credentials, RuntimeConfig};
use crate::error::{Error, Result};
use crate::process::{EngineCommand, ProcessControl, spawn_attached};
use crate::topology::NodeSpec;

/// Timing and binary settings for the supervisor.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Timeout applied to liveness status queries.
    pub admin_timeout: Duration,

    /// Path to the server binary.
    pub executable: PathBuf,

    /// How long `start` waits after launching the server.
    pub settle_duration: Duration,

    /// How many times `stop` checks whether the process has exited.
    pub stop_poll_attempts: u32,

    /// Delay between those checks.
    pub stop_poll_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            admin_timeout: Duration::from_secs(5),
            executable: PathBuf::from("minio"),
            settle_duration: Duration::from_secs(10),
            stop_poll_attempts: 5,
            stop_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Supervises exactly one server process.
pub struct ProcessSupervisor<P, A>
where
    P: ProcessControl,
    A: AdminClient,
{
    admin: Arc<A>,
    config: Arc<RuntimeConfig>,
    options: SupervisorOptions,
    process_control: P,
}

impl<P, A> ProcessSupervisor<P, A>
where
    P: ProcessControl,
    A: AdminClient,
{
    /// Creates a new supervisor.
    pub const fn new(
        config: Arc<RuntimeConfig>,
        process_control: P,
        admin: Arc<A>,
        options: SupervisorOptions,
    ) -> Self {
        Self {
            admin,
            config,
            options,
            process_control,
        }
    }

    /// Whether a recorded process exists, is alive, and reports itself online.
    ///
    /// Any failure along the way, including a status query that errors or times out,
    /// counts as not running.
    pub async fn is_running(&self) -> bool {
        let Some(pid) = self.recorded_pid().await else {
            return false;
        };

        if !self.process_control.is_alive(pid) {
            debug!("recorded minio process {pid} is gone");
            return false;
        }

        match self.admin.server_info(self.options.admin_timeout).await {
            Ok(info) if info.is_online() => true,
            Ok(info) => {
                debug!("minio process {pid} is alive but {:?}", info.mode);
                false
            }
            Err(e) => {
                debug!("minio status query failed: {e}");
                false
            }
        }
    }

    /// Starts the server in the background unless it is already running, then waits
    /// for the settle interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be launched or its pid cannot be recorded.
    pub async fn start(&self) -> Result<()> {
        self.launch(None).await
    }

    /// Like `start`, but also hands the previous root credentials to the server so it
    /// can migrate to the configured ones.
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRunning` if a server is already up, since it would never see
    /// the previous credentials. Otherwise returns an error if the server cannot be
    /// launched or its pid cannot be recorded.
    pub async fn start_with_previous_credentials(&self, previous: &Credentials) -> Result<()> {
        self.launch(Some(previous)).await
    }

    async fn launch(&self, previous: Option<&Credentials>) -> Result<()> {
        if self.is_running().await {
            if previous.is_some() {
                return Err(Error::AlreadyRunning);
            }

            info!("minio is already running");
            return Ok(());
        }

        let command = self.engine_command(previous);
        debug!("starting minio: {command:?}");

        let pid = self.process_control.spawn_detached(&command).await?;
        self.record_pid(pid).await?;

        info!(
            "minio started with pid {pid}, waiting {:?} for it to settle",
            self.options.settle_duration
        );
        tokio::time::sleep(self.options.settle_duration).await;

        Ok(())
    }

    /// Gracefully stops the server and waits a bounded time for it to exit.
    ///
    /// Never fails: a stop request that cannot be delivered is logged, and a process
    /// still alive after the last poll is left to the caller.
    pub async fn stop(&self) {
        if !self.is_running().await {
            info!("minio is not running");
            return;
        }

        info!("stopping minio");
        if let Err(e) = self.admin.service_stop().await {
            warn!("failed to request minio stop: {e}");
        }

        let Some(pid) = self.recorded_pid().await else {
            return;
        };

        for _ in 0..self.options.stop_poll_attempts {
            if !self.process_control.is_alive(pid) {
                info!("minio stopped");
                self.clear_pid().await;
                return;
            }

            tokio::time::sleep(self.options.stop_poll_interval).await;
        }

        if self.process_control.is_alive(pid) {
            warn!(
                "minio process {pid} still alive after {} checks, giving up",
                self.options.stop_poll_attempts
            );
        } else {
            info!("minio stopped");
            self.clear_pid().await;
        }
    }

    /// Runs the server in the foreground until it exits or `shutdown` is cancelled.
    ///
    /// On cancellation the server is asked to stop, then sent `SIGTERM` and finally
    /// killed if it keeps running.
    ///
    /// # Errors
    ///
    /// Returns an error if a server is already running or the process cannot be managed.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<ExitStatus> {
        if self.is_running().await {
            return Err(Error::AlreadyRunning);
        }

        let command = self.engine_command(None);
        debug!("running minio: {command:?}");

        let mut child = spawn_attached(&command)?;
        if let Some(pid) = child.id() {
            self.record_pid(pid).await?;
        }

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| Error::Io("failed to wait for minio", e))?
            }
            () = shutdown.cancelled() => self.shutdown_child(&mut child).await?,
        };

        if status.success() {
            info!("minio exited with status: {status}");
        } else {
            error!("minio exited with non-zero status: {status}");
        }

        self.clear_pid().await;

        Ok(status)
    }

    async fn shutdown_child(&self, child: &mut Child) -> Result<ExitStatus> {
        info!("shutdown requested, stopping minio...");

        if let Err(e) = self.admin.service_stop().await {
            warn!("failed to request minio stop: {e}");
        }

        let grace = self.options.stop_poll_interval * self.options.stop_poll_attempts;
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.map_err(|e| Error::Io("failed to wait for minio", e));
        }

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            warn!("minio did not stop within {grace:?}, sending SIGTERM");
            if let Err(e) = signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                error!("failed to send SIGTERM to minio: {e}");
            }
        }

        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.map_err(|e| Error::Io("failed to wait for minio", e));
        }

        error!("timeout waiting for minio to exit, killing...");
        child
            .kill()
            .await
            .map_err(|e| Error::Io("failed to kill minio", e))?;

        child
            .wait()
            .await
            .map_err(|e| Error::Io("failed to wait for minio", e))
    }

    /// Creates the drive directories this node serves from.
    ///
    /// Standalone servers only use the data directory. In distributed mode every
    /// explicit drive of `self_node`'s host is created as well.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created.
    pub async fn prepare_drives(&self, self_node: Option<&NodeSpec>) -> Result<()> {
        let mut drives = vec![self.config.data_dir().to_path_buf()];

        if let Some(node) = self_node {
            drives.extend(
                self.config
                    .topology()
                    .nodes()
                    .iter()
                    .filter(|other| other.host() == node.host())
                    .filter_map(NodeSpec::drive)
                    .map(PathBuf::from),
            );
        }

        drives.dedup();
        for drive in drives {
            debug!("preparing drive {}", drive.display());
            tokio::fs::create_dir_all(&drive)
                .await
                .map_err(|e| Error::Io("failed to create drive directory", e))?;
        }

        Ok(())
    }

    /// The command line and environment the server is launched with.
    pub fn engine_command(&self, previous: Option<&Credentials>) -> EngineCommand {
        let config = &self.config;

        let mut args = vec![
            "server".to_string(),
            "--certs-dir".to_string(),
            config.certs_dir().to_string_lossy().to_string(),
            "--console-address".to_string(),
            format!(":{}", config.console_port()),
            "--address".to_string(),
            format!(":{}", config.api_port()),
        ];

        if config.distributed().is_yes() {
            args.extend(
                config
                    .topology()
                    .server_endpoints(config.api_port(), config.data_dir()),
            );
        } else {
            args.push(config.data_dir().to_string_lossy().to_string());
        }

        let mut env = vec![(
            "MINIO_BROWSER".to_string(),
            config.browser().as_str().to_string(),
        )];

        if let Some(credentials) = config.credentials() {
            env.push(("MINIO_ROOT_USER".to_string(), credentials.user.clone()));
            env.push(("MINIO_ROOT_PASSWORD".to_string(), credentials.password.clone()));
        }

        if let Some(previous) = previous {
            env.push(("MINIO_ROOT_USER_OLD".to_string(), previous.user.clone()));
            env.push(("MINIO_ROOT_PASSWORD_OLD".to_string(), previous.password.clone()));
        }

        if let Some(trace) = config.http_trace() {
            env.push((
                "MINIO_HTTP_TRACE".to_string(),
                trace.to_string_lossy().to_string(),
            ));
        }

        if let Some(region) = config.region() {
            env.push(("MINIO_REGION_NAME".to_string(), region.to_string()));
        }

        EngineCommand {
            args,
            env,
            executable: self.options.executable.clone(),
        }
    }

    async fn recorded_pid(&self) -> Option<u32> {
        tokio::fs::read_to_string(self.config.pid_file())
            .await
            .ok()
            .and_then(|contents| contents.trim().parse().ok())
    }

    async fn record_pid(&self, pid: u32) -> Result<()> {
        tokio::fs::write(self.config.pid_file(), format!("{pid}\n"))
            .await
            .map_err(|e| Error::Io("failed to write minio pid file", e))
    }

    async fn clear_pid(&self) {
        if let Err(e) = tokio::fs::remove_file(self.config.pid_file()).await {
            debug!("failed to remove minio pid file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use proven_minio_admin::{BucketPolicy, ServerInfo};

    use crate::config::{ConfigInput, ConfigValidator};

    struct NoProcess;

    #[async_trait]
    impl ProcessControl for NoProcess {
        async fn spawn_detached(&self, _command: &EngineCommand) -> Result<u32> {
            Ok(4242)
        }

        fn is_alive(&self, _pid: u32) -> bool {
            false
        }
    }

    #[derive(Default)]
    struct CountingAdmin {
        calls: AtomicU32,
    }

    impl CountingAdmin {
        fn record(&self) -> proven_minio_admin::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl AdminClient for CountingAdmin {
        async fn server_info(&self, _timeout: Duration) -> proven_minio_admin::Result<ServerInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(proven_minio_admin::Error::Url("unreachable".to_string()))
        }

        async fn service_stop(&self) -> proven_minio_admin::Result<()> {
            self.record()
        }

        async fn bucket_exists(&self, _bucket: &str) -> proven_minio_admin::Result<bool> {
            self.record().map(|()| false)
        }

        async fn make_bucket(
            &self,
            _bucket: &str,
            _region: Option<&str>,
        ) -> proven_minio_admin::Result<()> {
            self.record()
        }

        async fn set_anonymous_policy(
            &self,
            _bucket: &str,
            _policy: BucketPolicy,
        ) -> proven_minio_admin::Result<()> {
            self.record()
        }

        async fn set_alias(&self) -> proven_minio_admin::Result<()> {
            self.record()
        }
    }

    fn supervisor(input: ConfigInput) -> ProcessSupervisor<NoProcess, CountingAdmin> {
        let config = ConfigValidator::new()
            .with_privileged_ports(false)
            .validate(input)
            .unwrap();

        ProcessSupervisor::new(
            Arc::new(config),
            NoProcess,
            Arc::new(CountingAdmin::default()),
            SupervisorOptions {
                settle_duration: Duration::ZERO,
                stop_poll_interval: Duration::from_millis(10),
                ..SupervisorOptions::default()
            },
        )
    }

    fn env<'a>(command: &'a EngineCommand, key: &str) -> Option<&'a str> {
        command
            .env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_standalone_command() {
        let supervisor = supervisor(ConfigInput {
            region: Some("eu-west-1".to_string()),
            root_password: Some("miniosecret".to_string()),
            root_user: Some("minio".to_string()),
            ..ConfigInput::default()
        });

        let command = supervisor.engine_command(None);

        assert_eq!(
            command.args,
            vec![
                "server",
                "--certs-dir",
                "/certs",
                "--console-address",
                ":9001",
                "--address",
                ":9000",
                "/data",
            ]
        );
        assert_eq!(env(&command, "MINIO_ROOT_USER"), Some("minio"));
        assert_eq!(env(&command, "MINIO_BROWSER"), Some("on"));
        assert_eq!(env(&command, "MINIO_REGION_NAME"), Some("eu-west-1"));
        assert_eq!(env(&command, "MINIO_ROOT_USER_OLD"), None);
    }

    #[test]
    fn test_distributed_command_lists_every_node() {
        let supervisor = supervisor(ConfigInput {
            distributed_mode: "yes".to_string(),
            distributed_nodes: Some("minio1,minio2,minio3:9100/export,minio4".to_string()),
            root_password: Some("miniosecret".to_string()),
            root_user: Some("minio".to_string()),
            ..ConfigInput::default()
        });

        let command = supervisor.engine_command(Some(&Credentials::new("old", "oldsecret")));

        assert_eq!(
            &command.args[7..],
            [
                "http://minio1:9000/data",
                "http://minio2:9000/data",
                "http://minio3:9100/export",
                "http://minio4:9000/data",
            ]
        );
        assert_eq!(env(&command, "MINIO_ROOT_USER_OLD"), Some("old"));
        assert_eq!(env(&command, "MINIO_ROOT_PASSWORD_OLD"), Some("oldsecret"));
    }

    #[test]
    fn test_range_command_passes_pattern_through() {
        let supervisor = supervisor(ConfigInput {
            distributed_mode: "yes".to_string(),
            distributed_nodes: Some("minio{1...4}/data{1...2}".to_string()),
            root_password: Some("miniosecret".to_string()),
            root_user: Some("minio".to_string()),
            scheme: "https".to_string(),
            ..ConfigInput::default()
        });

        let command = supervisor.engine_command(None);

        assert_eq!(command.args.last().unwrap(), "https://minio{1...4}/data{1...2}");
    }

    #[tokio::test]
    async fn test_stale_pid_file_is_not_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("minio.pid");
        std::fs::write(&pid_file, "4242\n").unwrap();
        let supervisor = supervisor(ConfigInput {
            pid_file,
            ..ConfigInput::default()
        });

        assert!(!supervisor.is_running().await);
        supervisor.stop().await;

        assert_eq!(supervisor.admin.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_records_pid() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("minio.pid");
        let supervisor = supervisor(ConfigInput {
            pid_file: pid_file.clone(),
            ..ConfigInput::default()
        });

        supervisor.start().await.unwrap();

        assert_eq!(std::fs::read_to_string(pid_file).unwrap(), "4242\n");
    }

    #[tokio::test]
    async fn test_prepare_drives_for_own_host() {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().display();
        let supervisor = supervisor(ConfigInput {
            data_dir: dir.path().join("data"),
            distributed_mode: "yes".to_string(),
            distributed_nodes: Some(format!(
                "minio1{root}/a,minio1{root}/b,minio2{root}/c,minio2{root}/d"
            )),
            root_password: Some("miniosecret".to_string()),
            root_user: Some("minio".to_string()),
            ..ConfigInput::default()
        });
        let self_node = supervisor.config.topology().nodes()[0].clone();

        supervisor.prepare_drives(Some(&self_node)).await.unwrap();

        assert!(dir.path().join("data").is_dir());
        assert!(dir.path().join("a").is_dir());
        assert!(dir.path().join("b").is_dir());
        assert!(!dir.path().join("c").exists());
    }
}
