use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use devkube_cluster::Cluster;
use devkube_core::{ConditionStatus, GroupKindResolver, ObjectRef};
use devkube_kubehub::KubeClient;
use devkube_time::Poller;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "devkubectl", version, about = "Create objects and wait for them to become ready")]
struct Cli {
    /// Kubernetes namespace for wait targets (default: current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    #[command(flatten)]
    poll: PollArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct PollArgs {
    /// Poll interval in milliseconds (0 = default of 1s)
    #[arg(long = "interval-ms", global = true, env = "DEVKUBE_POLL_INTERVAL_MS", default_value_t = 0)]
    interval_ms: u64,

    /// Give up after this many seconds (0 = wait until interrupted)
    #[arg(long = "max-wait-secs", global = true, env = "DEVKUBE_MAX_WAIT_SECS", default_value_t = 0)]
    max_wait_secs: u64,
}

impl PollArgs {
    fn poller(&self) -> Poller {
        Poller::new()
            .with_interval(Duration::from_millis(self.interval_ms))
            .with_max_wait(Duration::from_secs(self.max_wait_secs))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create manifests from files, folders or URLs, then wait for readiness
    Apply {
        /// Manifest file, folder or http(s) URL; repeatable
        #[arg(short = 'f', long = "filename", required = true)]
        sources: Vec<String>,
    },
    /// Wait until an object exists
    WaitExists {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        name: String,
    },
    /// Wait until an object is deleted
    WaitGone {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        name: String,
    },
    /// Wait until a condition reports the given status for the current generation
    WaitCondition {
        /// GVK key, e.g. "apps/v1/Deployment"
        gvk: String,
        name: String,
        /// Condition type, e.g. Available
        #[arg(long = "type")]
        condition_type: String,
        /// True, False or Unknown
        #[arg(long = "status", default_value = "True")]
        status: String,
    },
}

fn init_tracing() {
    let env = std::env::var("DEVKUBE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("DEVKUBE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid DEVKUBE_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancelled on the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted; cancelling");
            on_signal.cancel();
        }
    });
    cancel
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<()> {
    let client = Arc::new(KubeClient::try_default().await.context("connecting to cluster")?);
    let cluster = Cluster::new(client, GroupKindResolver).with_poller(cli.poll.poller());
    let ns = cli.namespace.as_deref();

    match cli.command {
        Commands::Apply { sources } => {
            info!(sources = ?sources, "apply invoked");
            let objects = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(devkube_core::Error::Cancelled.into()),
                res = devkube_apply::load_from_sources(&sources) => res.context("loading manifests")?,
            };
            info!(count = objects.len(), "loaded objects");
            cluster.create_and_await_readiness(cancel, &objects).await.context("creating objects")?;
            println!("{} object(s) created and ready", objects.len());
        }
        Commands::WaitExists { gvk, name } => {
            let target = ObjectRef::new(&gvk, ns, &name)?;
            cluster.wait_exists(cancel, target.clone()).await.with_context(|| format!("waiting for {}", target))?;
            println!("{} exists", target);
        }
        Commands::WaitGone { gvk, name } => {
            let target = ObjectRef::new(&gvk, ns, &name)?;
            cluster.wait_gone(cancel, target.clone()).await.with_context(|| format!("waiting for {} to go away", target))?;
            println!("{} is gone", target);
        }
        Commands::WaitCondition { gvk, name, condition_type, status } => {
            let target = ObjectRef::new(&gvk, ns, &name)?;
            let want = ConditionStatus::from_str(&status)?;
            cluster
                .wait_for_condition(cancel, target.clone(), &condition_type, want)
                .await
                .with_context(|| format!("waiting for {}={} on {}", condition_type, status, target))?;
            println!("{}: {}={}", target, condition_type, status);
        }
    }
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.chain().find_map(|e| e.downcast_ref::<devkube_core::Error>()) {
        Some(e) if e.is_deadline_exceeded() => ExitCode::from(2),
        Some(e) if e.is_cancelled() => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cancel = interrupt_token();

    match run(cli, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = ?e, "command failed");
            let code = exit_code(&e);
            if code == ExitCode::from(2) {
                eprintln!("timed out: {:#}", e);
            } else {
                eprintln!("error: {:#}", e);
            }
            code
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn apply_accepts_repeated_sources() {
        let url = "https://example.com/app.yaml";
        let cli = Cli::try_parse_from(["devkubectl", "apply", "-f", "a.yaml", "-f", "dir", "-f", url, "--max-wait-secs", "30"]).unwrap();
        assert_eq!(cli.poll.max_wait_secs, 30);
        match cli.command {
            Commands::Apply { sources } => assert_eq!(sources, vec!["a.yaml", "dir", url]),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn wait_condition_defaults_to_true() {
        let cli = Cli::try_parse_from(["devkubectl", "wait-condition", "apps/v1/Deployment", "web", "--type", "Available"]).unwrap();
        match cli.command {
            Commands::WaitCondition { status, condition_type, .. } => {
                assert_eq!(status, "True");
                assert_eq!(condition_type, "Available");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn deadline_exceeded_maps_to_distinct_exit_code() {
        let err = anyhow::Error::new(devkube_core::Error::DeadlineExceeded(Duration::from_secs(1))).context("waiting");
        assert_eq!(exit_code(&err), ExitCode::from(2));
        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&other), ExitCode::FAILURE);
    }
}
