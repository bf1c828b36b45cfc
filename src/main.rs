use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use webhook_admission::admission::{
    AdmissionConfig, AdmissionManager, Request, ValidationContext, WebhookKind,
};
use webhook_admission::platform_dirs;

#[derive(Parser, Debug)]
#[command(name = "admission-check", version, about = "Check requests against admission webhooks")]
struct Cli {
    /// Webhook registration file (TOML or JSON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration, then list the registered webhooks
    CheckConfig,

    /// Run one admission request (JSON) through the validating webhooks
    Validate {
        /// Request file, e.g. {"operation": "create", "resource": "clusters", ...}
        #[arg(long)]
        request: PathBuf,

        /// User submitting the request, for log correlation
        #[arg(long)]
        user: Option<String>,

        /// Overall deadline for the call, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Write an example configuration
    Init {
        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match init_logging(cli.log_dir.as_deref(), &cli.log_level) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("error: {:#}", err);
            return ExitCode::from(2);
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = match cli.config {
        Some(path) => path,
        None => platform_dirs::config_file()?,
    };

    match cli.cmd {
        Command::CheckConfig => check_config(&config_path),
        Command::Validate {
            request,
            user,
            timeout,
        } => validate(&config_path, &request, user, timeout).await,
        Command::Init { force } => init(&config_path, force),
    }
}

fn init_logging(log_dir: Option<&Path>, log_level: &str) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("invalid log filter")?;

    match log_dir {
        Some(dir) => {
            platform_dirs::ensure_dir(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "admission-check.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

fn load_config(path: &Path) -> Result<AdmissionConfig> {
    AdmissionConfig::load(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn check_config(path: &Path) -> Result<ExitCode> {
    let config = load_config(path)?;
    let manager = AdmissionManager::from_config(&config)?;
    let registry = manager.registry();

    println!("{}: {} webhook(s)", path.display(), registry.len());
    for webhook in &config.webhooks {
        println!(
            "  {:<24} {:<10} {:<6} {}s  {}",
            webhook.name,
            webhook.kind,
            if webhook.ignores_errors() { "ignore" } else { "fail" },
            webhook.timeout_seconds,
            webhook.client_config.url,
        );
    }
    if !registry.webhooks(WebhookKind::Mutating).is_empty() {
        println!("  (mutating webhooks are registered but not consulted)");
    }

    Ok(ExitCode::SUCCESS)
}

async fn validate(
    config_path: &Path,
    request_path: &Path,
    user: Option<String>,
    timeout: Option<u64>,
) -> Result<ExitCode> {
    let config = load_config(config_path)?;
    let manager = AdmissionManager::from_config(&config)?;

    let raw = fs::read_to_string(request_path)
        .with_context(|| format!("failed to read request {}", request_path.display()))?;
    let request: Request = serde_json::from_str(&raw)
        .with_context(|| format!("invalid request in {}", request_path.display()))?;

    let mut builder = ValidationContext::builder();
    if let Some(user) = user {
        builder = builder.with_user(user);
    }
    if let Some(seconds) = timeout {
        builder = builder.with_timeout(Duration::from_secs(seconds));
    }
    let ctx = builder.build();

    info!(
        request_id = %ctx.request_id(),
        operation = %request.operation,
        resource = %request.resource_path(),
        "Validating request"
    );

    match manager.validating(&ctx, &request).await {
        Ok(()) => {
            println!("allowed");
            Ok(ExitCode::SUCCESS)
        }
        Err(err) if err.is_denial() => {
            println!("denied: {}", err);
            Ok(ExitCode::from(1))
        }
        Err(err) => {
            println!("failed: {}", err);
            Ok(ExitCode::from(1))
        }
    }
}

fn init(path: &Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        platform_dirs::ensure_dir(parent)?;
    }

    let example = AdmissionConfig::example();
    let contents = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::to_string_pretty(&example)?,
        _ => example.to_toml()?,
    };
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))?;

    println!("Wrote example configuration to {}", path.display());
    Ok(ExitCode::SUCCESS)
}
