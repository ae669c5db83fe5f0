use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use owo_colors::OwoColorize;
use reqwest::header::LOCATION;
use supports_color::Stream as ColorStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use pooled_http::config::{ConfigManager, HttpConfig};
use pooled_http::report::reason_phrase;
use pooled_http::{check_timeout, log_error_response};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Issue requests through pooled, preconfigured HTTP clients."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a GET request. Redirects are reported, never followed.
    Get(GetArgs),
    /// Inspect or change the stored client configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct GetArgs {
    /// Absolute URL to request.
    url: String,
    /// Connect/read/write timeout in milliseconds. Defaults to the configured value.
    #[arg(long)]
    timeout: Option<u64>,
    /// Accept any certificate/hostname pairing. Only use against hosts you trust.
    #[arg(long)]
    insecure: bool,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the configuration file location and effective values.
    Show,
    /// Store the default timeout in milliseconds.
    SetTimeout { millis: u64 },
}

fn main() -> Result<()> {
    init_tracing();

    let Cli { command } = Cli::parse();
    let config = ConfigManager::new()?;

    match command {
        Commands::Get(args) => handle_get(args, &config),
        Commands::Config(ConfigCommand::Show) => handle_show(&config),
        Commands::Config(ConfigCommand::SetTimeout { millis }) => {
            handle_set_timeout(millis, &config)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pooled_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn handle_get(args: GetArgs, manager: &ConfigManager) -> Result<()> {
    let url = Url::parse(&args.url).with_context(|| format!("invalid URL {}", args.url))?;
    let config = manager.load().context("failed to load configuration")?;
    let factory = config.factory().context("failed to prepare HTTP clients")?;
    let timeout = args
        .timeout
        .map(Duration::from_millis)
        .unwrap_or(factory.timeout());
    let timeout = check_timeout(timeout).context("invalid --timeout")?;

    let client = if args.insecure {
        factory.secure_client_with_timeout(timeout)
    } else {
        factory.client_with_timeout(timeout)
    }
    .context("failed to initialize HTTP client")?;

    tracing::info!(%url, timeout_ms = timeout.as_millis() as u64, "sending request");
    let response = client
        .get(url.clone())
        .send()
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        let report = log_error_response(response).context("failed to read error response")?;
        println!("{}", paint_failure(&report.status_line()));
        if let Some(body) = &report.body {
            println!("{body}");
        }
        bail!("{url} responded with {}", report.status_line());
    }

    let status_line = match reason_phrase(&response) {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    };
    println!("{}", paint_success(&status_line));
    if status.is_redirection() {
        if let Some(location) = response.headers().get(LOCATION) {
            println!("Location: {}", location.to_str().unwrap_or("<non-ascii>"));
        }
    }
    let body = response.text().context("failed to read response body")?;
    if !body.is_empty() {
        println!("{body}");
    }
    Ok(())
}

fn handle_show(manager: &ConfigManager) -> Result<()> {
    let config = manager.load().context("failed to load configuration")?;
    let pool = config.pool_settings();

    println!("config file: {}", manager.config_file().display());
    println!("timeout: {} ms", config.timeout().as_millis());
    println!("max idle per host: {}", pool.max_idle_per_host);
    println!("idle timeout: {} s", pool.idle_timeout.as_secs());
    match config.proxy() {
        Some(proxy) => println!("proxy: {proxy}"),
        None => println!("proxy: none"),
    }
    if let Some(ca_file) = &config.ca_file {
        println!("extra root certificate: {}", ca_file.display());
    }
    Ok(())
}

fn handle_set_timeout(millis: u64, manager: &ConfigManager) -> Result<()> {
    check_timeout(Duration::from_millis(millis))?;
    let config = HttpConfig {
        timeout_ms: Some(millis),
        ..manager.load().context("failed to load configuration")?
    };
    manager
        .save(&config)
        .context("failed to save configuration")?;
    println!(
        "Timeout set to {millis} ms in {}",
        manager.config_file().display()
    );
    Ok(())
}

fn color_enabled() -> bool {
    supports_color::on_cached(ColorStream::Stdout)
        .map(|level| level.has_basic)
        .unwrap_or(false)
}

fn paint_success(text: &str) -> String {
    if color_enabled() {
        format!("{}", text.green().bold())
    } else {
        text.to_string()
    }
}

fn paint_failure(text: &str) -> String {
    if color_enabled() {
        format!("{}", text.red().bold())
    } else {
        text.to_string()
    }
}
