//! In-memory stand-ins for the server process, the admin client and name resolution.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use proven_minio::{
    ConfigInput, ConfigValidator, EngineCommand, HostResolver, MinioNode, MinioNodeOptions,
    ProcessControl, SupervisorOptions,
};
use proven_minio_admin::{AdminClient, BucketPolicy, ServerInfo, ServerMode};

/// State shared by the fake process controller and the fake admin client.
#[derive(Debug, Default)]
pub struct ClusterState {
    pub admin_calls: Vec<String>,
    pub alive: HashSet<u32>,
    pub alive_checks: u32,
    pub buckets: BTreeSet<String>,
    /// The stop request itself fails.
    pub fail_stop: bool,
    /// Processes keep running after a stop request.
    pub ignore_stop: bool,
    pub next_pid: u32,
    pub policies: Vec<(String, BucketPolicy)>,
    pub spawned: Vec<EngineCommand>,
}

#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl FakeCluster {
    pub fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    pub fn admin_calls(&self) -> Vec<String> {
        self.state().admin_calls.clone()
    }
}

pub struct FakeProcess(pub FakeCluster);

#[async_trait]
impl ProcessControl for FakeProcess {
    async fn spawn_detached(&self, command: &EngineCommand) -> proven_minio::Result<u32> {
        let mut state = self.0.state();
        state.next_pid += 1;
        let pid = 1000 + state.next_pid;
        state.alive.insert(pid);
        state.spawned.push(command.clone());

        Ok(pid)
    }

    fn is_alive(&self, pid: u32) -> bool {
        let mut state = self.0.state();
        state.alive_checks += 1;
        state.alive.contains(&pid)
    }
}

pub struct FakeAdmin(pub FakeCluster);

impl FakeAdmin {
    fn record(&self, call: String) -> MutexGuard<'_, ClusterState> {
        let mut state = self.0.state();
        state.admin_calls.push(call);
        state
    }
}

#[async_trait]
impl AdminClient for FakeAdmin {
    async fn server_info(&self, _timeout: Duration) -> proven_minio_admin::Result<ServerInfo> {
        let state = self.record("admin info".to_string());
        let mode = if state.alive.is_empty() {
            ServerMode::Offline
        } else {
            ServerMode::Online
        };

        Ok(ServerInfo {
            mode,
            deployment_id: None,
            backend: None,
            servers: Vec::new(),
        })
    }

    async fn service_stop(&self) -> proven_minio_admin::Result<()> {
        let mut state = self.record("admin service stop".to_string());
        if state.fail_stop {
            return Err(proven_minio_admin::Error::Timeout {
                command: "admin service stop",
                timeout: Duration::from_secs(30),
            });
        }
        if !state.ignore_stop {
            state.alive.clear();
        }

        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> proven_minio_admin::Result<bool> {
        let state = self.record(format!("stat {bucket}"));

        Ok(state.buckets.contains(bucket))
    }

    async fn make_bucket(
        &self,
        bucket: &str,
        _region: Option<&str>,
    ) -> proven_minio_admin::Result<()> {
        let mut state = self.record(format!("mb {bucket}"));
        state.buckets.insert(bucket.to_string());

        Ok(())
    }

    async fn set_anonymous_policy(
        &self,
        bucket: &str,
        policy: BucketPolicy,
    ) -> proven_minio_admin::Result<()> {
        let mut state = self.record(format!("anonymous set {policy} {bucket}"));
        state.policies.push((bucket.to_string(), policy));

        Ok(())
    }

    async fn set_alias(&self) -> proven_minio_admin::Result<()> {
        self.record("alias set".to_string());

        Ok(())
    }
}

pub struct FakeResolver {
    pub hosts: HashMap<String, IpAddr>,
    pub local: IpAddr,
}

impl FakeResolver {
    pub fn new(local: &str, hosts: &[(&str, &str)]) -> Self {
        Self {
            hosts: hosts
                .iter()
                .map(|(host, address)| ((*host).to_string(), address.parse().unwrap()))
                .collect(),
            local: local.parse().unwrap(),
        }
    }
}

#[async_trait]
impl HostResolver for FakeResolver {
    async fn local_address(&self) -> io::Result<IpAddr> {
        Ok(self.local)
    }

    async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        self.hosts
            .get(host)
            .map(|address| vec![*address])
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, host.to_string()))
    }
}

pub type TestNode = MinioNode<FakeProcess, FakeAdmin, FakeResolver>;

/// Standalone configuration rooted in `dir`.
pub fn standalone_input(dir: &Path) -> ConfigInput {
    ConfigInput {
        data_dir: dir.join("data"),
        pid_file: dir.join("minio.pid"),
        root_password: Some("miniosecret".to_string()),
        root_user: Some("minio".to_string()),
        ..ConfigInput::default()
    }
}

pub fn node(input: ConfigInput, cluster: &FakeCluster, resolver: FakeResolver) -> TestNode {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let config = ConfigValidator::new()
        .with_privileged_ports(false)
        .validate(input)
        .unwrap();

    MinioNode::new(MinioNodeOptions {
        admin: FakeAdmin(cluster.clone()),
        config,
        process_control: FakeProcess(cluster.clone()),
        resolver,
        supervisor: SupervisorOptions {
            settle_duration: Duration::ZERO,
            stop_poll_interval: Duration::from_millis(10),
            ..SupervisorOptions::default()
        },
    })
}

pub fn local_resolver() -> FakeResolver {
    FakeResolver::new("127.0.0.1", &[])
}
