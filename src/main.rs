use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use reelay::bot::RelayBot;
use reelay::channels::TelegramChannel;
use reelay::cli::{self, Cli, Command, ConfigCommand};
use reelay::config::{self, RelayConfig};
use reelay::delivery::DeliveryOrchestrator;
use reelay::links::SourceLinkValidator;
use reelay::logging::init_logging;
use reelay::media::{BoundedFetcher, HttpSource, MediaSource, SizeProber, StagingArea};
use reelay::relay::RelayUploader;
use reelay::resolver::ZylaResolver;
use reelay::server;
use reelay::sessions::SessionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => run().await,
        Command::Config(ConfigCommand::Show) => cli::handle_config_show(),
        Command::Config(ConfigCommand::Get { key }) => cli::handle_config_get(&key),
        Command::Config(ConfigCommand::Path) => {
            cli::handle_config_path();
            Ok(())
        }
        Command::Resolve { url } => cli::handle_resolve(&url).await,
        Command::Status { port, host } => cli::handle_status(&host, port).await,
        Command::Version => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_config()?;
    init_logging(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting reelay");

    let staging = StagingArea::new(&config.staging.dir);
    let swept = staging.prepare().await?;
    if swept > 0 {
        info!(swept, dir = %config.staging.dir.display(), "removed leftover staging files");
    }

    let connect_timeout = Duration::from_secs(config.telegram.connect_timeout_secs);
    let channel = TelegramChannel::new(
        &config.telegram.bot_token,
        &config.telegram.api_base,
        connect_timeout,
    );
    let me = channel.get_me().await?;
    info!(
        bot = me.username.as_deref().unwrap_or(me.first_name.as_str()),
        "bot authenticated"
    );

    let bot = Arc::new(build_bot(&config, channel, staging, connect_timeout));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr = server::parse_bind_address(&config.server.bind, config.server.port)?;
    let health = tokio::spawn(server::serve(addr, shutdown_rx.clone()));
    let mut polling = tokio::spawn(Arc::clone(&bot).run(shutdown_rx));

    let finished_early = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            None
        }
        joined = &mut polling => Some(joined),
    };

    let _ = shutdown_tx.send(true);
    let bot_result = match finished_early {
        Some(joined) => joined,
        None => polling.await,
    };
    let health_result = health.await;

    // Cancelled deliveries still owe their users a link.
    let grace = config.limits.shutdown_grace();
    if bot.drain(grace).await {
        info!("all update handlers finished");
    } else {
        warn!(grace_secs = grace.as_secs(), "stopping with update handlers still running");
    }

    bot_result??;
    health_result??;
    info!("reelay stopped");
    Ok(())
}

fn build_bot(
    config: &RelayConfig,
    channel: TelegramChannel,
    staging: StagingArea,
    connect_timeout: Duration,
) -> RelayBot {
    let source: Arc<dyn MediaSource> = Arc::new(HttpSource::with_connect_timeout(connect_timeout));
    let prober = SizeProber::with_timeout(source.clone(), config.limits.probe_timeout());
    let fetcher = BoundedFetcher::new(source, staging);
    let uploader = RelayUploader::new(Arc::new(channel.clone()))
        .with_timeouts(config.limits.reference_timeout(), config.limits.upload_timeout());
    let orchestrator =
        DeliveryOrchestrator::new(fetcher, uploader, config.limits.delivery_limits());

    if config.resolver.api_key.trim().is_empty() {
        warn!("ZYLA_API_KEY is not set; link lookups will fail");
    }
    let resolver = Arc::new(ZylaResolver::new(
        &config.resolver.api_url,
        &config.resolver.api_key,
    ));

    RelayBot::new(
        channel,
        resolver,
        prober,
        orchestrator,
        SessionStore::new(),
        SourceLinkValidator::new(&config.links.allowed_domains),
    )
    .with_session_idle(config.limits.session_idle())
}

/// Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
