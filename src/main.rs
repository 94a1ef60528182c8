// AuthProbe - Main Entry Point
//
// Runs credential probes against the verifier binary:
// - `serve`: HTTP boundary (POST /verify)
// - `probe`: one-shot probe of a credential file, outcome JSON on stdout
// - `check-config`: print the effective configuration

use anyhow::{Context, Result};
use authprobe::config::Config;
use authprobe::probe::{ProbeEngine, ProbeRequest};
use authprobe::server;
use authprobe::tools::is_executable;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// AuthProbe: sandboxed credential verification
#[derive(Parser, Debug)]
#[command(name = "authprobe")]
#[command(author = "AuthProbe Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Sandboxed credential probe runner", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: ~/.config/authprobe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve probe requests over HTTP
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Probe a single credential file and print the outcome
    Probe {
        /// Path to the credential document (JSON)
        #[arg(long)]
        auth_file: PathBuf,

        /// Endpoint override passed to the verifier
        #[arg(long)]
        base_url: Option<String>,

        /// Probe budget in seconds
        #[arg(long)]
        timeout: Option<f64>,

        /// Probe subcommand (allow_list policy only)
        #[arg(long)]
        probe: Option<String>,

        /// Probe arguments (allow_list policy only)
        #[arg(long, num_args = 0.., value_delimiter = ' ', allow_hyphen_values = true)]
        probe_args: Option<Vec<String>>,
    },
    /// Validate and print the effective configuration
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::Serve { bind, port }) => {
            let mut config = config;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            server::start_server(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Probe {
            auth_file,
            base_url,
            timeout,
            probe,
            probe_args,
        }) => {
            let auth_json = match read_auth_file(&auth_file) {
                Ok(value) => value,
                Err(e) => {
                    error!("{:#}", e);
                    return Ok(ExitCode::from(2));
                }
            };
            let request = ProbeRequest {
                auth_json,
                base_url,
                probe,
                probe_args,
                timeout_seconds: timeout,
            };
            Ok(run_probe(&config, request).await)
        }
        Some(Commands::CheckConfig) => {
            if !is_executable(Path::new(&config.probe.binary)) {
                warn!(
                    "Verifier binary {} is missing or not executable; probes will fail with tool_unavailable",
                    config.probe.binary
                );
            }
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            info!("No command specified. Use \"authprobe --help\" for usage.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Logs go to stderr so `probe` output stays machine-readable
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn read_auth_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read credential file {:?}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Credential file {:?} is not valid JSON", path))
}

/// Exit 0 for ok, 1 for fail, 2 when no outcome could be produced
async fn run_probe(config: &Config, request: ProbeRequest) -> ExitCode {
    let engine = ProbeEngine::from_config(&config.probe);
    match engine.verify(request).await {
        Ok(outcome) => {
            match serde_json::to_string_pretty(&outcome) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!("Failed to render outcome: {}", e);
                    return ExitCode::from(2);
                }
            }
            if outcome.is_ok() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("{}", serde_json::json!({ "detail": e.detail(), "status": e.status_code() }));
            ExitCode::from(2)
        }
    }
}
