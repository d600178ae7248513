// ABOUTME: Entry point for the ci-runner binary.
// ABOUTME: Parses arguments, wires the cluster and GitHub collaborators, and runs the loop.

mod cli;

use ci_runner::build::{BuildDriver, KubeJobBackend};
use ci_runner::cluster;
use ci_runner::config::{DEFAULT_STATE_PATH, Settings};
use ci_runner::error::Result;
use ci_runner::release::{HelmCli, KubeNamespaces, NamespaceOps, ReleaseDriver};
use ci_runner::runner::Runner;
use ci_runner::source::GitHubClient;
use ci_runner::state::StateStore;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Status => status(cli.state_path),
        Commands::Config => {
            let settings = load_settings(cli.state_path)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(0)
        }
        Commands::Run => {
            let mut runner = build_runner(cli.state_path).await?;
            runner.run(shutdown_signal()).await?;
            Ok(0)
        }
        Commands::Tick => {
            let mut runner = build_runner(cli.state_path).await?;
            let outcome = runner.tick().await?;
            tracing::info!(?outcome, "Tick finished");
            Ok(if outcome.is_failure() { 1 } else { 0 })
        }
    }
}

fn load_settings(state_path: Option<PathBuf>) -> Result<Settings> {
    let mut settings = Settings::from_env()?;
    if let Some(path) = state_path {
        settings.state_path = path;
    }
    Ok(settings)
}

/// Print the state file without requiring the rest of the configuration.
fn status(state_path: Option<PathBuf>) -> Result<i32> {
    let path = state_path
        .or_else(|| std::env::var_os("STATE_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH));

    match StateStore::new(&path).read()? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("No deployment recorded at {}", path.display()),
    }
    Ok(0)
}

type LiveRunner = Runner<
    GitHubClient,
    BuildDriver<KubeJobBackend>,
    ReleaseDriver<HelmCli, KubeNamespaces, GitHubClient>,
>;

async fn build_runner(state_path: Option<PathBuf>) -> Result<LiveRunner> {
    let settings = Arc::new(load_settings(state_path)?);
    let client = cluster::connect(&settings).await?;

    let namespaces = KubeNamespaces::new(client.clone());
    for namespace in [&settings.cicd_namespace, &settings.deploy_namespace] {
        if let Err(e) = namespaces.ensure(namespace).await {
            tracing::warn!("{}", e);
        }
    }

    let github = GitHubClient::from_settings(&settings)?;
    let jobs = KubeJobBackend::new(client, &settings.cicd_namespace);

    let builder = BuildDriver::new(jobs, settings.clone());
    let deployer = ReleaseDriver::new(
        HelmCli::new(&settings.helm_bin),
        namespaces,
        github.clone(),
        settings.clone(),
    );

    Ok(Runner::new(settings, github, builder, deployer))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
