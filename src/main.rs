use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context};
use clap::Parser;
use fleet_deploy::{
    core::constants::{DEFAULT_SIDE_BUNDLE, VERSION},
    deployment::{orchestrator::Orchestrator, strategy::InstallOptions},
    logger,
    serialization::{
        artifact_set::{ArtifactRole, ArtifactSet, ArtifactSpec},
        config::Config,
        host_list::read_host_list,
    },
    transport::ssh::SshConnector,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleet-deploy")]
#[command(about = "Install the status service on a fleet of devices over SSH")]
#[command(version)]
struct Cli {
    /// Installer configuration (JSON)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Device class whose credentials are tried on every host
    #[arg(short, long)]
    device_class: String,

    /// Host list, one address per line
    #[arg(long, default_value = "iplist")]
    hosts: PathBuf,

    /// Package for package-managed hosts (defaults to the only .deb in the artifact directory)
    #[arg(short, long)]
    package: Option<PathBuf>,

    /// Install the auxiliary package bundle before the main package
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_SIDE_BUNDLE)]
    side_bundle: Option<PathBuf>,

    /// Directory holding the embedded-profile files and packages
    #[arg(long, default_value = ".")]
    artifact_dir: PathBuf,

    /// Maximum number of hosts handled at once (overrides config)
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Log file (overrides config)
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // host failures never change the exit code, only setup errors do
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::read_config(&cli.config)?;
    let log_file = cli.log_file.clone().or_else(|| config.log.file.clone());
    logger::init(&config.log.level, log_file.as_deref())?;
    info!(version = VERSION, "fleet-deploy starting");

    let credentials = config.credentials_for(&cli.device_class)?;
    let hosts = read_host_list(&cli.hosts)?;
    if hosts.is_empty() {
        bail!("host list {} is empty", cli.hosts.display());
    }

    let package = match cli.package {
        Some(path) => path,
        None => find_package(&cli.artifact_dir)?,
    };
    let side_bundle = cli
        .side_bundle
        .as_deref()
        .map(|path| resolve(&cli.artifact_dir, path));

    let mut specs = ArtifactSpec::embedded(&cli.artifact_dir);
    specs.push(ArtifactSpec::staged(ArtifactRole::Package, &package));
    if let Some(bundle) = &side_bundle {
        specs.push(ArtifactSpec::staged(ArtifactRole::SidePackage, bundle));
    }
    let artifacts = ArtifactSet::load(&specs)?;
    if !artifacts.contains(ArtifactRole::Package) {
        warn!(path = %package.display(), "package not found, package-managed hosts will fail");
    }

    let options = InstallOptions {
        elevation: config.elevation,
        side_bundle: side_bundle.is_some(),
    };
    let max_concurrency = cli.max_concurrency.unwrap_or(config.max_concurrency);
    let orchestrator = Orchestrator::new(SshConnector::new(&config.ssh), options);

    let report = orchestrator
        .run_batch(&hosts, credentials, Arc::new(artifacts), max_concurrency)
        .await;

    report
        .summary()
        .report(&mut std::io::stdout().lock())
        .context("failed to print summary")?;
    Ok(())
}

fn resolve(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

fn find_package(dir: &Path) -> anyhow::Result<PathBuf> {
    let mut packages: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().map_or(false, |ext| ext == "deb"))
        .collect();
    packages.sort();

    match packages.len() {
        0 => bail!("no .deb files found in {}", dir.display()),
        1 => Ok(packages.remove(0)),
        _ => {
            let names: Vec<String> = packages.iter().map(|p| p.display().to_string()).collect();
            bail!(
                "several .deb files found, pick one with --package: {}",
                names.join(", ")
            )
        }
    }
}
