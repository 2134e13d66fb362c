//! eks-rotator - Safe rotation of EKS worker nodes
//!
//! ## Usage
//!
//! ```bash
//! # Rotate every ASG owned by the current kubeconfig cluster
//! eks-rotator asg
//!
//! # Rotate the two oldest instances of named groups, one group at a time
//! eks-rotator asg workers-a workers-b --limit 2
//!
//! # Replace a single node by its private DNS name
//! eks-rotator instance ip-10-0-1-5.ec2.internal
//!
//! # Remove a node for good (the group shrinks by one)
//! eks-rotator instance ip-10-0-1-5.ec2.internal --remove
//!
//! # See what would happen
//! eks-rotator --dryrun asg
//! ```
//!
//! SIGINT, SIGTERM and `--deadline` all cancel the run. Cancellation interrupts
//! the wait for a replacement node and stops the run before the next instance
//! or group; steps already taken are left as they are.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use eks_rotator::drain::DEFAULT_DRAIN_TIMEOUT_SECS;
use eks_rotator::{load_sdk_config, AwsInventory, DrainConfig, KubeInventory};
use rotator_core::config::{DEFAULT_JOIN_POLL_INTERVAL_SECS, DEFAULT_READY_POLL_INTERVAL_SECS};
use rotator_core::{ObserverConfig, RotationTarget, Rotator, RotatorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// eks-rotator: replace EKS worker nodes without losing capacity
#[derive(Parser)]
#[command(name = "eks-rotator")]
#[command(
    about = "Safely rotate EKS worker nodes backed by Auto Scaling groups",
    long_about = None
)]
struct Cli {
    /// AWS region (default: from the environment / profile)
    #[arg(long, global = true)]
    region: Option<String>,

    /// AWS shared config profile
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Kubeconfig context (default: current context)
    #[arg(long, global = true)]
    kube_context: Option<String>,

    /// Resolve nodes and log, but change nothing
    #[arg(long, global = true)]
    dryrun: bool,

    /// Cancel the run after this many seconds
    #[arg(long, global = true)]
    deadline: Option<u64>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the rotation report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Seconds between checks for a new node
    #[arg(long, global = true, default_value_t = DEFAULT_JOIN_POLL_INTERVAL_SECS)]
    join_poll_interval: u64,

    /// Seconds between readiness checks of the new node
    #[arg(long, global = true, default_value_t = DEFAULT_READY_POLL_INTERVAL_SECS)]
    ready_poll_interval: u64,

    /// Drain timeout (seconds)
    #[arg(long, global = true, default_value_t = DEFAULT_DRAIN_TIMEOUT_SECS)]
    drain_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rotate every instance of the named ASGs (all cluster-owned ASGs when none are named)
    Asg {
        /// ASG names
        groups: Vec<String>,

        /// Rotate at most this many of the oldest instances (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },

    /// Rotate a single instance by private DNS name
    Instance {
        /// Private DNS name, e.g. ip-10-0-1-5.ec2.internal
        internal_dns: String,

        /// Remove the node and shrink the group instead of replacing it
        #[arg(long)]
        remove: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "eks_rotator=info,rotator_core=info,info".into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `--json` output stays clean
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_cancel_watcher(cancel.clone(), cli.deadline.map(Duration::from_secs));

    let sdk_config = load_sdk_config(cli.region.clone(), cli.profile.clone()).await;
    let cloud = Arc::new(AwsInventory::new(&sdk_config));

    let drain = DrainConfig::default().with_timeout(Duration::from_secs(cli.drain_timeout));
    let (cluster, endpoint) = KubeInventory::from_kubeconfig(cli.kube_context.clone(), drain)
        .await
        .context("failed to connect to the cluster")?;

    let (target, limit) = match cli.command {
        Commands::Asg { groups, limit } => {
            (RotationTarget::from_group_names(groups, endpoint), limit)
        }
        Commands::Instance {
            internal_dns,
            remove,
        } => (
            RotationTarget::Instance {
                internal_name: internal_dns,
                remove_node: remove,
            },
            0,
        ),
    };

    let observer = ObserverConfig::default()
        .with_join_poll_interval(Duration::from_secs(cli.join_poll_interval))
        .with_ready_poll_interval(Duration::from_secs(cli.ready_poll_interval));
    let config = RotatorConfig::default()
        .with_dry_run(cli.dryrun)
        .with_limit(limit)
        .with_observer(observer);

    if config.dry_run {
        info!("DRY RUN: no instance or node will be changed");
    }

    let rotator = Rotator::new(cloud, Arc::new(cluster), config);
    let report = rotator.run(target, &cancel).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Cancel `cancel` on SIGINT, SIGTERM or when `deadline` passes
fn spawn_cancel_watcher(cancel: CancellationToken, deadline: Option<Duration>) {
    tokio::spawn(async move {
        let deadline = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => warn!("Interrupt received, cancelling rotation"),
            _ = terminate_signal() => warn!("SIGTERM received, cancelling rotation"),
            _ = deadline => warn!("Deadline reached, cancelling rotation"),
        }
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending::<()>().await;
}
