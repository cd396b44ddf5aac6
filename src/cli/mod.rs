//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- run the bot and the health server
//! - `config show|get|path` -- inspect the loaded configuration
//! - `resolve <url>` -- resolve and size-probe a link, print JSON
//! - `status` -- query a running instance's health endpoint
//! - `version` -- print build/version info

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::config::{self, CONFIG_PATH_ENV, DEFAULT_PORT};
use crate::links::SourceLinkValidator;
use crate::media::{HttpSource, SizeProber};
use crate::resolver::{MetadataResolver, ZylaResolver};

/// Telegram media relay.
#[derive(Parser, Debug)]
#[command(
    name = "reelay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Reelay - resolves video links and relays the media to Telegram"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the bot (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Resolve a source link and print the variants with probed sizes.
    Resolve {
        /// Source link, e.g. https://fb.watch/abc
        url: String,
    },

    /// Query a running instance's health endpoint.
    Status {
        /// Port of the running instance (default: from config or 10000).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host of the running instance.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Print version, build date, and git commit information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration (secrets masked) as JSON.
    Show,

    /// Print one value by dot-notation path.
    Get {
        /// Dot-notation key (e.g. "limits.hardCeilingBytes").
        key: String,
    },

    /// Print the configuration file path, if one is set.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `config show` subcommand.
pub fn handle_config_show() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_unchecked()?;
    println!("{}", serde_json::to_string_pretty(&cfg.redacted())?);
    Ok(())
}

/// Run the `config get <key>` subcommand.
pub fn handle_config_get(key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_unchecked()?;
    match get_value_at_path(&cfg.redacted(), key) {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => {
            eprintln!("Key not found: {}", key);
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path() {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => println!("{}", path),
        _ => println!("(none; set {} to use a config file)", CONFIG_PATH_ENV),
    }
}

/// Run the `resolve <url>` subcommand.
pub async fn handle_resolve(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config_unchecked()?;
    let link = SourceLinkValidator::new(&cfg.links.allowed_domains).validate(url)?;

    let resolver = ZylaResolver::new(&cfg.resolver.api_url, &cfg.resolver.api_key);
    let mut resolution = resolver.resolve(link).await?;

    let source = HttpSource::with_connect_timeout(Duration::from_secs(
        cfg.telegram.connect_timeout_secs,
    ));
    let prober = SizeProber::with_timeout(Arc::new(source), cfg.limits.probe_timeout());
    prober.annotate(&mut resolution).await;

    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

/// Run the `status` subcommand -- connect to a running instance's health endpoint.
pub async fn handle_status(host: &str, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let port = resolve_port(port);
    let url = format!("http://{}:{}/health", host, port);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Could not connect to reelay at {}:{}", host, port);
            eprintln!("  Error: {}", e);
            eprintln!();
            eprintln!("Is the bot running? Start it with: reelay start");
            std::process::exit(1);
        }
    };

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        eprintln!("Health endpoint returned HTTP {}: {}", status, body);
        std::process::exit(1);
    }

    println!("Reelay status");
    println!("=============");
    println!("  Address:  {}:{}", host, port);
    println!("  Health:   {}", body.trim());
    Ok(())
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("reelay {}", env!("CARGO_PKG_VERSION"));
    println!("  Build date: {}", env!("REELAY_BUILD_DATE"));
    println!("  Git commit: {}", env!("REELAY_GIT_HASH"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Navigate a JSON value by dot-notation path and return the leaf value.
fn get_value_at_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

/// Explicit flag, then config, then [`DEFAULT_PORT`].
fn resolve_port(explicit: Option<u16>) -> u16 {
    if let Some(p) = explicit {
        return p;
    }
    config::load_config_unchecked()
        .map(|cfg| cfg.server.port)
        .unwrap_or(DEFAULT_PORT)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
