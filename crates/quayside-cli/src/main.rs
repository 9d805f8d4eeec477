//! Quayside - static site publisher CLI
//!
//! The `quayside` command bundles a site's build output, uploads it as
//! content-addressed archives and switches the live site over atomically.
//!
//! ## Commands
//!
//! - `deploy`: Build (optionally), bundle, upload and publish
//! - `plan`: Show bundle membership and the deployment identity without uploading
//! - `status`: Show the live deployment for a site
//! - `rollback`: Repoint the site at its previous deployment

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

use quayside_core::{
    Backends, DeployConfig, DeployPlan, DeployReport, Deployer, PublishOutcome, PublishRecord,
    SiteLocks, DEFAULT_CONFIG_FILE,
};
use quayside_state::{
    CacheInvalidator, FsArtifactStore, FsDestinationStore, FsInvalidationLog, FsPublishPointer,
    HttpInvalidator, HttpInvalidatorConfig,
};

#[derive(Parser)]
#[command(name = "quayside")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Atomic static site publisher", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, bundle, upload and publish a site
    Deploy {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        backend: BackendArgs,

        /// Write the deploy report as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Bundle and fingerprint locally; nothing is uploaded
    Plan {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Show the live deployment
    Status {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Repoint the site at the previously live deployment
    Rollback {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Config file (default: ./quayside.json when present)
    #[arg(short, long, env = "QUAYSIDE_CONFIG")]
    config: Option<PathBuf>,

    /// Site name
    #[arg(long, env = "QUAYSIDE_SITE")]
    site: Option<String>,

    /// Build output directory
    #[arg(long, env = "QUAYSIDE_BUILD_DIR")]
    build_dir: Option<PathBuf>,

    /// Destination prefix in the origin store (default: the site name)
    #[arg(long, env = "QUAYSIDE_DESTINATION_PREFIX")]
    destination_prefix: Option<String>,

    /// Maximum framed bundle size in bytes
    #[arg(long, env = "QUAYSIDE_BUNDLE_SIZE_LIMIT")]
    bundle_size_limit: Option<u64>,

    /// Publish to the shared development namespace
    #[arg(long, env = "QUAYSIDE_DEV")]
    dev: bool,

    /// Skip the configured build command
    #[arg(long)]
    skip_build: bool,

    /// Environment value for placeholder substitution (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    env: Vec<(String, String)>,
}

#[derive(Args, Debug, Clone)]
struct BackendArgs {
    /// Local state directory for archives, origin objects and pointers
    #[arg(long, env = "QUAYSIDE_STATE_DIR", default_value = ".quayside")]
    state_dir: PathBuf,

    /// CDN invalidation endpoint; invalidations are logged locally when unset
    #[arg(long, env = "QUAYSIDE_INVALIDATION_ENDPOINT")]
    invalidation_endpoint: Option<String>,

    /// CDN distribution id sent with invalidations (default: site name)
    #[arg(long, env = "QUAYSIDE_DISTRIBUTION_ID")]
    distribution_id: Option<String>,

    /// Bearer token for the invalidation endpoint
    #[arg(long, env = "QUAYSIDE_INVALIDATION_TOKEN", hide_env_values = true)]
    invalidation_token: Option<String>,
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    quayside_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Deploy {
            config,
            backend,
            report,
        } => cmd_deploy(&config, &backend, report.as_deref(), cli.json).await,
        Commands::Plan { config } => cmd_plan(&config, cli.json),
        Commands::Status { config, backend } => cmd_status(&config, &backend, cli.json).await,
        Commands::Rollback { config, backend } => cmd_rollback(&config, &backend, cli.json).await,
    }
}

/// Resolve the effective config: file (if any), then flag/env overrides.
fn load_config(args: &ConfigArgs) -> Result<DeployConfig> {
    let mut config = match &args.config {
        Some(path) => DeployConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            DeployConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))
                .context("failed to load quayside.json")?
        }
        None => DeployConfig::default(),
    };

    if let Some(site) = &args.site {
        config.site = site.clone();
    }
    if let Some(dir) = &args.build_dir {
        config.build_dir = dir.clone();
    }
    if let Some(prefix) = &args.destination_prefix {
        config.destination_prefix = prefix.clone();
    }
    if let Some(limit) = args.bundle_size_limit {
        config.bundle_size_limit = limit;
    }
    if args.dev {
        config.dev_mode = true;
    }
    if args.skip_build {
        config.build_command = None;
    }
    for (key, value) in &args.env {
        config.environment.insert(key.clone(), value.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_backends(backend: &BackendArgs, config: &DeployConfig) -> Result<Backends> {
    let root = &backend.state_dir;
    let invalidator: Arc<dyn CacheInvalidator> = match &backend.invalidation_endpoint {
        Some(endpoint) => {
            let distribution = backend
                .distribution_id
                .as_deref()
                .unwrap_or(config.site.as_str());
            let mut http = HttpInvalidatorConfig::new(endpoint, distribution);
            http.timeout_ms = config.upload.timeout_ms;
            if let Some(token) = &backend.invalidation_token {
                http = http.with_token(token);
            }
            Arc::new(HttpInvalidator::new(http).context("failed to build invalidation client")?)
        }
        None => Arc::new(
            FsInvalidationLog::new(root).context("failed to open invalidation log")?,
        ),
    };

    Ok(Backends {
        artifacts: Arc::new(
            FsArtifactStore::new(root.join("artifacts"))
                .context("failed to open artifact store")?,
        ),
        destination: Arc::new(
            FsDestinationStore::new(root.join("origin"))
                .context("failed to open destination store")?,
        ),
        pointer: Arc::new(FsPublishPointer::new(root).context("failed to open publish pointer")?),
        invalidator,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_deploy(
    args: &ConfigArgs,
    backend: &BackendArgs,
    report_path: Option<&Path>,
    json: bool,
) -> Result<()> {
    let config = load_config(args)?;
    let report = deploy_with(&config, open_backends(backend, &config)?).await?;

    if let Some(path) = report_path {
        report
            .write_to(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "deploy report written");
    }

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

async fn deploy_with(config: &DeployConfig, backends: Backends) -> Result<DeployReport> {
    let deployer = Deployer::new(backends, SiteLocks::new());
    deployer
        .deploy(config)
        .await
        .with_context(|| format!("deploy of site '{}' failed", config.site))
}

fn print_report(report: &DeployReport) {
    println!("Published {} -> {}", report.site, report.deployment_id);
    if let Some(url) = &report.public_url {
        println!("  url:          {}", url);
    }
    println!("  bundles:      {}", report.bundle_count);
    for (index, fingerprint) in report.fingerprints.iter().enumerate() {
        println!("    [{}] {}", index, fingerprint);
    }
    println!(
        "  staged:       {} object(s){}",
        report.objects_staged,
        if report.reused_staging { " (reused)" } else { "" }
    );
    println!("  substituted:  {} file(s)", report.files_substituted);
    println!("  invalidation: {}", report.invalidation_id);
    println!("  duration:     {} ms", report.duration_ms);
}

fn cmd_plan(args: &ConfigArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    let plan = quayside_core::plan(&config).context("plan failed")?;
    if json {
        return print_json(&plan);
    }
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &DeployPlan) {
    println!(
        "{}: {} file(s), {} byte(s) in {} bundle(s)",
        plan.site,
        plan.files,
        plan.total_bytes,
        plan.bundles.len()
    );
    for bundle in &plan.bundles {
        println!(
            "  [{}] {} ({} framed bytes, {} file(s))",
            bundle.index,
            &bundle.fingerprint[..12.min(bundle.fingerprint.len())],
            bundle.framed_size,
            bundle.paths.len()
        );
        for path in &bundle.paths {
            println!("      {}", path);
        }
    }
    println!("deployment identity: {}", plan.deployment_id);
}

async fn cmd_status(args: &ConfigArgs, backend: &BackendArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    let deployer = Deployer::new(open_backends(backend, &config)?, SiteLocks::new());
    let current = deployer
        .status(&config)
        .await
        .context("failed to read publish pointer")?;
    if json {
        return print_json(&current);
    }
    print_status(&config.site, current.as_ref());
    Ok(())
}

fn print_status(site: &str, record: Option<&PublishRecord>) {
    match record {
        Some(record) => {
            println!("Live {} -> {}", site, record.deployment_id);
            println!("  origin:    {}", record.origin_path());
            println!("  activated: {}", record.activated_at.to_rfc3339());
            if let Some(previous) = &record.previous {
                println!("  previous:  {}", previous);
            }
        }
        None => println!("Nothing published for {}", site),
    }
}

async fn cmd_rollback(args: &ConfigArgs, backend: &BackendArgs, json: bool) -> Result<()> {
    let config = load_config(args)?;
    if config.dev_mode {
        bail!("rollback is not available for development deploys");
    }
    let deployer = Deployer::new(open_backends(backend, &config)?, SiteLocks::new());
    let outcome: PublishOutcome = deployer
        .rollback(&config)
        .await
        .with_context(|| format!("rollback of site '{}' failed", config.site))?;
    if json {
        return print_json(&outcome);
    }
    println!(
        "Rolled back {} -> {}",
        config.site, outcome.record.deployment_id
    );
    Ok(())
}
