use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagserve::server::{self, BindOptions, Server};
use tagserve::{AppState, Config, routes, tls};

#[derive(Parser, Debug)]
#[command(name = "tagserve")]
#[command(about = "HTTP file server with ETag-based conditional writes")]
#[command(version)]
struct Cli {
    /// Root directory to serve files from
    #[arg(short, long, env = "TAGSERVE_ROOT", default_value = ".")]
    root: PathBuf,

    /// Address to bind to
    #[arg(short, long, env = "TAGSERVE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Port to listen on
    #[arg(short, long, env = "TAGSERVE_PORT", default_value = "8080")]
    port: u16,

    /// Fail instead of moving to the next free port when the port is taken
    #[arg(long, env = "TAGSERVE_NO_PORT_SWITCH")]
    no_port_switch: bool,

    /// Accept PUT and DELETE (the server is read-only otherwise)
    #[arg(short, long, env = "TAGSERVE_WRITABLE")]
    writable: bool,

    /// Disable ETag headers and conditional request handling
    #[arg(long, env = "TAGSERVE_NO_ETAG")]
    no_etag: bool,

    /// Add CORS headers to responses
    #[arg(long, env = "TAGSERVE_CORS")]
    cors: bool,

    /// Only log warnings and errors
    #[arg(short, long, env = "TAGSERVE_QUIET", conflicts_with = "verbose")]
    quiet: bool,

    /// Enable verbose logging
    #[arg(short, long, env = "TAGSERVE_VERBOSE")]
    verbose: bool,

    /// PEM certificate chain for HTTPS
    #[arg(long, env = "TAGSERVE_TLS_CERT", requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key for HTTPS
    #[arg(long, env = "TAGSERVE_TLS_KEY", requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Config file path (optional)
    #[arg(short, long, env = "TAGSERVE_CONFIG")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line switches on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if self.writable {
            config.read_only = false;
        }
        if self.no_etag {
            config.etags = false;
        }
        if self.cors {
            config.cors = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.quiet {
        "tagserve=warn,tower_http=warn"
    } else if cli.verbose {
        "tagserve=debug,tower_http=debug"
    } else {
        "tagserve=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load config from file if provided, otherwise use defaults
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => Config::default(),
    };
    cli.apply(&mut config);

    if !cli.root.is_dir() {
        bail!("Root path is not a directory: {}", cli.root.display());
    }

    let acceptor = tls::acceptor_from_options(cli.tls_cert.as_deref(), cli.tls_key.as_deref())
        .context("loading TLS certificate")?;

    let bind = BindOptions {
        host: cli.bind.clone(),
        port: cli.port,
        auto_switch: !cli.no_port_switch,
        attempts: config.port_attempts,
    };
    let grace = Duration::from_secs(config.shutdown_grace_secs);

    let state = AppState::with_config(&cli.root, config)
        .with_context(|| format!("opening root directory {}", cli.root.display()))?;

    info!("Serving files from: {}", state.store.root().display());
    if state.config.read_only {
        info!("Read-only mode: PUT and DELETE are disabled (use --writable to enable)");
    } else {
        info!("Writable mode: PUT and DELETE are enabled");
    }

    let listener = server::bind_listener(&bind)
        .await
        .context("binding listener")?;
    let server = Server::new(listener, acceptor, grace);

    let addr = server.local_addr().context("reading bound address")?;
    let scheme = if cli.tls_cert.is_some() { "https" } else { "http" };
    info!("Listening on {}://{}", scheme, addr);

    let app = routes::build_router(state);
    server
        .run(app, server::shutdown_signal())
        .await
        .context("running server")?;

    info!("Shutdown complete");
    Ok(())
}
