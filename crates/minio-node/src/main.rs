//! Container entrypoint for a MinIO storage node.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod commands;
mod error;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use proven_minio::ConfigInput;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match commands::execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    config: ConfigArgs,

    /// Directory containing the `minio` binary
    #[arg(long, default_value = "/usr/local/bin", env = "MINIO_BIN_DIR", global = true)]
    bin_dir: PathBuf,

    /// Directory containing the `mc` binary
    #[arg(
        long,
        default_value = "/usr/local/bin",
        env = "MINIO_CLIENT_BIN_DIR",
        global = true
    )]
    client_bin_dir: PathBuf,

    /// Configuration directory for `mc`
    #[arg(long, env = "MINIO_CLIENT_CONF_DIR", global = true)]
    client_conf_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, env = "MINIO_DEBUG", global = true)]
    debug: bool,

    /// File the output of background servers is appended to
    #[arg(long, env = "MINIO_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Seconds to wait after starting a background server
    #[arg(
        long,
        default_value_t = 10,
        env = "MINIO_STARTUP_SETTLE_SECONDS",
        global = true
    )]
    settle_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and exit
    Validate,
    /// Prepare drives, rotate credentials, configure the client and create default buckets
    Setup,
    /// Run the server in the foreground
    Run,
    /// Start the server in the background
    Start,
    /// Stop a background server
    Stop,
    /// Exit successfully if the server is running and online
    Status,
    /// Print the node this host runs as
    NodeName,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// API port number
    #[arg(long, default_value = "9000", env = "MINIO_API_PORT_NUMBER", global = true)]
    api_port: String,

    /// Web console, on or off
    #[arg(long, env = "MINIO_BROWSER", global = true)]
    browser: Option<String>,

    /// Directory holding TLS certificates
    #[arg(long, default_value = "/certs", env = "MINIO_CERTS_DIR", global = true)]
    certs_dir: PathBuf,

    /// Console port number
    #[arg(
        long,
        default_value = "9001",
        env = "MINIO_CONSOLE_PORT_NUMBER",
        global = true
    )]
    console_port: String,

    /// Data directory
    #[arg(long, default_value = "/data", env = "MINIO_DATA_DIR", global = true)]
    data_dir: PathBuf,

    /// Buckets to create, as name[:policy] separated by , or ;
    #[arg(long, env = "MINIO_DEFAULT_BUCKETS", global = true)]
    default_buckets: Option<String>,

    /// Run as part of a distributed deployment, yes or no
    #[arg(
        long,
        default_value = "no",
        env = "MINIO_DISTRIBUTED_MODE_ENABLED",
        global = true
    )]
    distributed_mode: String,

    /// Nodes of the distributed deployment
    #[arg(long, env = "MINIO_DISTRIBUTED_NODES", global = true)]
    distributed_nodes: Option<String>,

    /// Rotate root credentials when they change, yes or no
    #[arg(long, default_value = "no", env = "MINIO_FORCE_NEW_KEYS", global = true)]
    force_new_keys: String,

    /// File HTTP traces are written to
    #[arg(long, env = "MINIO_HTTP_TRACE", global = true)]
    http_trace: Option<PathBuf>,

    /// File the server's process identifier is recorded in
    #[arg(
        long,
        default_value = "/tmp/minio.pid",
        env = "MINIO_PID_FILE",
        global = true
    )]
    pid_file: PathBuf,

    /// Region new buckets are created in
    #[arg(long, env = "MINIO_REGION_NAME", global = true)]
    region: Option<String>,

    /// Root password
    #[arg(long, env = "MINIO_ROOT_PASSWORD", hide_env_values = true, global = true)]
    root_password: Option<String>,

    /// Root user
    #[arg(long, env = "MINIO_ROOT_USER", global = true)]
    root_user: Option<String>,

    /// Scheme used to reach the nodes, http or https
    #[arg(long, default_value = "http", env = "MINIO_SCHEME", global = true)]
    scheme: String,

    /// Skip client configuration and bucket creation, yes or no
    #[arg(long, default_value = "no", env = "MINIO_SKIP_CLIENT", global = true)]
    skip_client: String,
}

impl fmt::Debug for ConfigArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&ConfigInput::from(self.clone()), f)
    }
}

impl From<ConfigArgs> for ConfigInput {
    fn from(args: ConfigArgs) -> Self {
        Self {
            api_port: args.api_port,
            browser: args.browser,
            certs_dir: args.certs_dir,
            console_port: args.console_port,
            data_dir: args.data_dir,
            default_buckets: args.default_buckets,
            distributed_mode: args.distributed_mode,
            distributed_nodes: args.distributed_nodes,
            force_new_keys: args.force_new_keys,
            http_trace: args.http_trace,
            pid_file: args.pid_file,
            region: args.region,
            root_password: args.root_password,
            root_user: args.root_user,
            scheme: args.scheme,
            skip_client: args.skip_client,
        }
    }
}
