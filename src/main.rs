use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use workgate::audit::AuditStatus;
use workgate::gateway::{self, ExecRequest};
use workgate::security::Rule;
use workgate::{CommandValidator, Config, Gateway, RequestContext, Settings, logging};

const CLI_ACTOR: &str = "cli";

#[derive(Parser)]
#[command(name = "workgate")]
#[command(about = "Loopback gateway that lets an assistant edit and build inside one workspace")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/workgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Loopback address to bind
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Validate and run one command in the workspace
    Run {
        /// Command line, quoted as one argument
        cmd: String,
        /// Timeout in seconds, tightened to the rule limit
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Show the policy decision for a command without running it
    Check { cmd: String },
    /// Print the ordered rule table
    Rules,
    /// Query a running gateway's health endpoint
    Health,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            let path = match cli.config {
                Some(path) => path,
                None => Config::config_path()?,
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            Config::default().save_to(&path)?;
            println!("Wrote {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve { port, bind } => {
            let mut config = load_config(cli.config.as_ref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let settings = Settings::resolve(&config)?;
            logging::init_tracing(&settings.log_level, settings.log_format)?;

            info!(
                version = env!("CARGO_PKG_VERSION"),
                addr = %settings.listen_addr(),
                audit_log = %settings.audit_log_path.display(),
                "starting workgate"
            );
            let gateway = Arc::new(Gateway::new(settings).await?);
            gateway::serve(gateway).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { cmd, timeout } => {
            let config = load_config(cli.config.as_ref())?;
            let settings = Settings::resolve(&config)?;
            logging::init_tracing("warn", settings.log_format)?;
            run_command(settings, cmd, timeout).await
        }
        Commands::Check { cmd } => {
            let validator = CommandValidator::builtin()?;
            let decision = validator.validate(&cmd);
            let verdict = if decision.allowed { "allowed" } else { "blocked" };
            println!("{}: {}", verdict, decision.normalized_command);
            println!("reason: {}", decision.reason);
            if let Some(rule) = &decision.matched_rule {
                println!("rule: {} {} (priority {})", rule.kind, rule.pattern, rule.priority);
            }
            if let (Some(timeout), Some(max_output)) = (decision.timeout, decision.max_output_size) {
                println!("limits: {}s, {} bytes", timeout.as_secs(), max_output);
            }
            Ok(if decision.allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Rules => {
            let validator = CommandValidator::builtin()?;
            for compiled in validator.rules().iter() {
                match compiled.rule() {
                    Rule::Allow(rule) => println!(
                        "{:>5}  allow  {:<40} {}s  {}",
                        compiled.priority(),
                        rule.pattern,
                        rule.timeout.as_secs(),
                        rule.reason
                    ),
                    Rule::Deny(rule) => println!(
                        "{:>5}  deny   {:<40} -    {}",
                        compiled.priority(),
                        rule.pattern,
                        rule.reason
                    ),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Health => {
            let config = load_config(cli.config.as_ref())?;
            let url = format!("http://{}:{}/health", bracket(&config.server.bind), config.server.port);
            match reqwest::get(&url).await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    Ok(ExitCode::SUCCESS)
                }
                Err(_) => {
                    eprintln!("workgate is not running at {}", url);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

async fn run_command(settings: Settings, cmd: String, timeout: Option<u64>) -> Result<ExitCode> {
    let gateway = Gateway::new(settings).await?;
    let ctx = RequestContext::new(CLI_ACTOR);
    let request = ExecRequest { cmd, timeout };

    match gateway.exec(&ctx, &request).await {
        Ok(resp) => {
            print!("{}", resp.result.stdout);
            eprint!("{}", resp.result.stderr);
            let code = match resp.status {
                AuditStatus::Success => 0,
                AuditStatus::Timeout => {
                    eprintln!("workgate: timed out after {}ms", resp.timeout_ms);
                    124
                }
                _ => 1,
            };
            Ok(ExitCode::from(code))
        }
        Err(e) => {
            eprintln!("workgate: {}", e);
            Ok(ExitCode::from(e.kind().exit_code() as u8))
        }
    }
}

fn bracket(bind: &str) -> String {
    if bind.contains(':') && !bind.starts_with('[') {
        format!("[{}]", bind)
    } else {
        bind.to_string()
    }
}
