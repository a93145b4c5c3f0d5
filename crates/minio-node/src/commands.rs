use std::process::ExitCode;
use std::time::Duration;

use proven_minio::{
    MinioNode, MinioNodeOptions, RuntimeConfig, SetupOutcome, SupervisorOptions,
    SystemHostResolver, SystemProcessControl,
};
use proven_minio_admin::{McAdminClient, McAdminClientOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use url::Url;

use crate::error::Result;
use crate::{Cli, Command};

const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);
const CLIENT_ALIAS: &str = "local";
const ROTATED_EXIT_CODE: u8 = 3;

type Node = MinioNode<SystemProcessControl, McAdminClient, SystemHostResolver>;

pub async fn execute(cli: Cli) -> Result<ExitCode> {
    let config = proven_minio::validate(cli.config.clone().into())?;

    if matches!(cli.command, Command::Validate) {
        info!("configuration is valid");
        return Ok(ExitCode::SUCCESS);
    }

    let node = node(&cli, config)?;

    match cli.command {
        Command::Validate => Ok(ExitCode::SUCCESS),
        Command::Setup => setup(&node).await,
        Command::Run => run(&node).await,
        Command::Start => {
            node.start().await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop => {
            node.stop().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => Ok(if node.is_running().await {
            info!("minio is running");
            ExitCode::SUCCESS
        } else {
            warn!("minio is not running");
            ExitCode::FAILURE
        }),
        Command::NodeName => {
            println!("{}", node.self_node().await?.host());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn node(cli: &Cli, config: RuntimeConfig) -> Result<Node> {
    let endpoint = Url::parse(&format!(
        "{}://localhost:{}",
        config.scheme(),
        config.api_port()
    ))?;

    let admin = McAdminClient::new(McAdminClientOptions {
        access_key: config.credentials().map(|c| c.user.clone()),
        alias: CLIENT_ALIAS.to_string(),
        config_dir: cli.client_conf_dir.clone(),
        endpoint,
        executable: cli.client_bin_dir.join("mc"),
        secret_key: config.credentials().map(|c| c.password.clone()),
        timeout: ADMIN_TIMEOUT,
    });

    let process_control = match &cli.log_file {
        Some(log_file) => SystemProcessControl::new().with_log_file(log_file),
        None => SystemProcessControl::new(),
    };

    Ok(MinioNode::new(MinioNodeOptions {
        admin,
        config,
        process_control,
        resolver: SystemHostResolver,
        supervisor: SupervisorOptions {
            executable: cli.bin_dir.join("minio"),
            settle_duration: Duration::from_secs(cli.settle_secs),
            ..SupervisorOptions::default()
        },
    }))
}

async fn setup(node: &Node) -> Result<ExitCode> {
    match node.setup().await? {
        SetupOutcome::Ready => {
            info!("minio setup finished");
            Ok(ExitCode::SUCCESS)
        }
        SetupOutcome::RestartRequired => {
            warn!("root credentials were rotated, restart the container to continue");
            Ok(ExitCode::from(ROTATED_EXIT_CODE))
        }
    }
}

async fn run(node: &Node) -> Result<ExitCode> {
    let shutdown_token = CancellationToken::new();

    let signal_shutdown_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        signal_shutdown_token.cancel();
    });

    let status = node.run(shutdown_token).await?;

    Ok(status
        .code()
        .and_then(|code| u8::try_from(code).ok())
        .map_or(ExitCode::FAILURE, ExitCode::from))
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            error!("failed to install signal handlers: {e}");
            let _ = tokio::signal::ctrl_c().await;
            info!("received interrupt signal");
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
