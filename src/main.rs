// flowlink — Workflow automation glue in Rust
// License: Apache-2.0

use clap::{Parser, Subcommand};
use flowlink::config::Config;
use flowlink::connector::google_auth::{extract_code, ClientSecret};
use flowlink::connector::{ConnectorFactory, ConnectorRegistry};
use flowlink::metrics::Metrics;
use flowlink::web::WebState;
use flowlink::workflow::{load_definition, WorkflowExecutor};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LOGO: &str = "⛓";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "flowlink",
    about = "flowlink — JSON-defined workflows across Google Sheets, OpenAI and email",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow definition and print the step outputs
    Run {
        /// Workflow definition (.json, .yaml or .yml)
        #[arg(short, long)]
        workflow: PathBuf,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Simulate every connector instead of calling real services
        #[arg(long)]
        simulate: bool,
        /// Print a metrics summary to stderr after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Parse and validate a workflow definition without running it
    Validate {
        #[arg(short, long)]
        workflow: PathBuf,
    },
    /// Start the web wrapper
    Serve {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Port to listen on (default: web.port from config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Authorize Google Sheets access and store the token file
    #[command(name = "sheets-auth")]
    SheetsAuth {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Authorization code (or redirect URL); prompted for when omitted
        #[arg(long)]
        code: Option<String>,
    },
    /// Show the effective configuration with secrets masked
    Status {
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    flowlink::logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workflow,
            config,
            simulate,
            metrics,
        } => run_cmd(&workflow, config.as_deref(), simulate, metrics).await,
        Commands::Validate { workflow } => validate_cmd(&workflow),
        Commands::Serve { config, port } => serve_cmd(config.as_deref(), port).await,
        Commands::SheetsAuth { config, code } => sheets_auth_cmd(config.as_deref(), code).await,
        Commands::Status { config } => status_cmd(config.as_deref()),
        Commands::Version => version_cmd(),
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn run_cmd(workflow: &Path, config_path: Option<&str>, simulate: bool, show_metrics: bool) {
    let mut cfg = load_config(config_path);
    if simulate {
        cfg.simulate_all();
    }
    tracing::debug!(config = %cfg.redacted(), "Effective configuration");

    let definition = match load_definition(workflow) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{} Error: {}", LOGO, e);
            std::process::exit(1);
        }
    };

    let factory: Arc<dyn ConnectorFactory> =
        Arc::new(ConnectorRegistry::with_defaults(Arc::new(cfg)));
    let metrics = Metrics::new();
    let cache = WorkflowExecutor::new(factory)
        .with_metrics(metrics.clone())
        .run(&definition)
        .await;

    let failures = cache.failures();
    for (step, message) in &failures {
        eprintln!("{} Step '{}' failed: {}", LOGO, step, message);
    }
    if show_metrics {
        eprintln!("{}", metrics.format_report().await);
    }

    match serde_json::to_string_pretty(&cache) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("{} Failed to serialize results: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

fn validate_cmd(workflow: &Path) {
    match load_definition(workflow) {
        Ok(d) => {
            println!(
                "{} '{}' is valid: trigger '{}' + {} action(s)",
                LOGO,
                d.name,
                d.trigger.id,
                d.actions.len()
            );
            for action in &d.actions {
                println!("  {:<20} {}.{}", action.id, action.service, action.action);
            }
        }
        Err(e) => {
            eprintln!("{} Invalid workflow: {}", LOGO, e);
            std::process::exit(1);
        }
    }
}

async fn serve_cmd(config_path: Option<&str>, port: Option<u16>) {
    let cfg = load_config(config_path);
    let port = port.unwrap_or(cfg.web.port);
    let host: std::net::IpAddr = match cfg.web.host.parse() {
        Ok(h) => h,
        Err(e) => {
            eprintln!("{} Invalid web.host '{}': {}", LOGO, cfg.web.host, e);
            std::process::exit(1);
        }
    };

    let addr = std::net::SocketAddr::new(host, port);
    println!("{} flowlink web server starting at http://{}", LOGO, addr);

    let state = WebState::new(Arc::new(cfg), Metrics::new());
    if let Err(e) = flowlink::web::start_web_server(addr, state).await {
        eprintln!("{} Web server error: {}", LOGO, e);
        std::process::exit(1);
    }
}

async fn sheets_auth_cmd(config_path: Option<&str>, code: Option<String>) {
    let cfg = load_config(config_path);
    if let Err(e) = sheets_auth(&cfg, code).await {
        eprintln!("{} Google authorization failed: {:#}", LOGO, e);
        std::process::exit(1);
    }
}

async fn sheets_auth(cfg: &Config, code: Option<String>) -> anyhow::Result<()> {
    let secret = ClientSecret::load(Path::new(&cfg.google_sheets.client_secret_file))?;
    let url = secret.consent_url()?;

    println!("{} Open this URL in your browser and grant access:\n", LOGO);
    println!("  {}\n", url);

    let input = match code {
        Some(c) => c,
        None => {
            println!("Paste the authorization code (or the full redirect URL):");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line
        }
    };
    let code = extract_code(&input)
        .ok_or_else(|| anyhow::anyhow!("no authorization code found in input"))?;

    let client = reqwest::Client::new();
    let token = secret.exchange_code(&client, &code).await?;
    let token_path = Path::new(&cfg.google_sheets.token_file);
    token.save(token_path)?;

    println!("{} Token saved to {}", LOGO, token_path.display());
    Ok(())
}

fn status_cmd(config_path: Option<&str>) {
    println!("{} flowlink Status\n", LOGO);

    let path = resolve_config_path(config_path);
    if path.exists() {
        println!("  Config:    ✅ {}", path.display());
    } else {
        println!("  Config:    ❌ {} (using defaults)", path.display());
    }

    let cfg = load_config(config_path);
    let token = Path::new(&cfg.google_sheets.token_file);
    if token.exists() {
        println!("  Sheets:    ✅ token at {}", token.display());
    } else {
        println!("  Sheets:    ❌ no token (run 'flowlink sheets-auth')");
    }

    match serde_json::to_string_pretty(&cfg.redacted()) {
        Ok(json) => println!("\n{}", json),
        Err(e) => eprintln!("{} Failed to render config: {}", LOGO, e),
    }
}

fn version_cmd() {
    println!("{} flowlink v{}", LOGO, flowlink::VERSION);
    println!("  Built with Rust 🦀");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_config_path(path: Option<&str>) -> PathBuf {
    match path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json")),
    }
}

fn load_config(path: Option<&str>) -> Config {
    let config_path = resolve_config_path(path);

    Config::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}, using defaults", e);
        let mut cfg = Config::default();
        if let Err(e) = cfg.apply_env_overrides() {
            tracing::warn!("Ignoring environment overrides: {}", e);
        }
        cfg
    })
}
