//! samlgate CLI
//!
//! Signs in to an application through its SAML identity provider using the
//! system browser, and prints the resulting single-sign-on token.
//!
//! # Usage
//!
//! ```bash
//! # Sign in and print the token
//! samlgate login --app-url https://app.example \
//!     --metadata-url https://idp.example/metadata --issuer samlgate-cli
//!
//! # Print the token cached by the last login
//! samlgate cached --app-url https://app.example
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use samlgate_cli::config::{self, CliConfig, LoginOverrides, MetadataSource};
use samlgate_core::store::session_key;
use samlgate_core::{
    AuthData, BrowserOpener, CommandBrowser, FlowConfig, NoBrowser, SamlFlow, SystemBrowser,
    create_cache, metadata,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "samlgate")]
#[command(about = "Browser-based SAML sign-in for command-line tools")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in through the identity provider and print the token
    Login(LoginArgs),

    /// Print the token stored by the last successful login
    Cached {
        /// Application base URL
        #[arg(long)]
        app_url: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct LoginArgs {
    /// Application base URL
    #[arg(long)]
    app_url: Option<String>,

    /// Identity provider metadata URL
    #[arg(long, conflicts_with = "metadata_file")]
    metadata_url: Option<String>,

    /// Identity provider metadata file
    #[arg(long)]
    metadata_file: Option<PathBuf>,

    /// Service provider entity ID
    #[arg(long)]
    issuer: Option<String>,

    /// Local callback port
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds to wait for the browser to come back
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Print the sign-in URL instead of opening a browser
    #[arg(long)]
    no_browser: bool,

    /// Do not store the token in the credential cache
    #[arg(long)]
    no_cache: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl LoginArgs {
    fn overrides(&self) -> LoginOverrides {
        LoginOverrides {
            app_url: self.app_url.clone(),
            metadata_url: self.metadata_url.clone(),
            metadata_file: self.metadata_file.clone(),
            issuer: self.issuer.clone(),
            port: self.port,
            timeout_secs: self.timeout,
            no_cache: self.no_cache,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config(cli.config.as_deref())?;
    init_logging(if cli.verbose { "debug" } else { &config.log_level });

    if let Some(path) = &config.config_path {
        debug!("Loaded configuration from {:?}", path);
    }

    match cli.command {
        Commands::Login(args) => login(&config, args).await,
        Commands::Cached { app_url, format } => cached(&config, app_url, format).await,
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn login(config: &CliConfig, args: LoginArgs) -> Result<()> {
    let settings = config.resolve_login(args.overrides())?;

    let descriptor = match &settings.metadata {
        MetadataSource::Url(url) => metadata::load_from_url(url).await,
        MetadataSource::File(path) => metadata::load_from_file(path).await,
    }
    .context("Failed to load identity provider metadata")?;

    let opener: Box<dyn BrowserOpener> = if args.no_browser {
        Box::new(NoBrowser)
    } else if let Some(command) = CommandBrowser::from_argv(&settings.browser) {
        Box::new(command)
    } else {
        Box::new(SystemBrowser::detect())
    };

    let flow_config = FlowConfig::new(settings.app_url.as_str(), settings.issuer.as_str())
        .with_callback_port(settings.callback_port)
        .with_timeout(settings.timeout);
    let flow = SamlFlow::new(flow_config, opener);

    let auth = flow
        .authenticate_until(&descriptor, ctrl_c())
        .await
        .context("SAML authentication failed")?;

    let cache = create_cache(settings.use_cache);
    match cache.put(&session_key(&settings.app_url), &auth.auth_token).await {
        Ok(()) => debug!("Cached session token"),
        Err(e) => warn!("Failed to cache session token: {}", e),
    }

    print_auth(&auth, args.format)
}

async fn cached(config: &CliConfig, app_url: Option<String>, format: OutputFormat) -> Result<()> {
    let app_url = config.resolve_app_url(app_url)?;
    let cache = create_cache(config.use_cache);

    let Some(token) = cache.get(&session_key(&app_url)).await? else {
        bail!("No cached session for {}; run `samlgate login` first", app_url);
    };

    print_auth(&AuthData::new(token), format)
}

fn print_auth(auth: &AuthData, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(auth)?),
        OutputFormat::Text => println!("{}", auth.auth_token.expose()),
    }
    Ok(())
}

/// Completes on Ctrl-C; never completes if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Interrupted, cancelling sign-in");
}
