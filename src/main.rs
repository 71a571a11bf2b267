//! Herald CLI: pair or resume a WhatsApp session, send to every recipient,
//! then collect receipts until interrupted or the drain timeout passes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use herald::config::Config;
use herald::dispatch::{DispatchOptions, Dispatcher, MessageTemplate};
use herald::ledger::{Ledger, Status};
use herald::recipients::load_recipients;
use herald::signal::OneShot;
use herald::whatsapp::client::{BridgeClient, MessagingClient};
use herald::whatsapp::events::{spawn_event_listener, EventHandler};
use herald::whatsapp::session::{self, PairingOutput, SessionError};

/// Send a templated WhatsApp message to every number in a CSV file.
#[derive(Debug, Parser)]
#[command(name = "herald", version, about)]
struct Cli {
    /// Log out from the current session and delete session data.
    #[arg(long)]
    logout: bool,

    /// Config file (default: ./herald.toml or $HERALD_CONFIG_PATH).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Recipients CSV, overrides `paths.recipients`.
    #[arg(long)]
    recipients: Option<PathBuf>,

    /// Status ledger CSV, overrides `paths.status`.
    #[arg(long)]
    status: Option<PathBuf>,

    /// Image or video to attach, overrides `message.media`.
    #[arg(long)]
    media: Option<PathBuf>,

    /// Template file, overrides `message.template_file`.
    #[arg(long)]
    message: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(p) = &self.recipients {
            config.paths.recipients = p.clone();
        }
        if let Some(p) = &self.status {
            config.paths.status = p.clone();
        }
        if let Some(p) = &self.media {
            config.message.media = Some(p.clone());
        }
        if let Some(p) = &self.message {
            config.message.template_file = Some(p.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply(&mut config);

    let _log_guard = herald::logging::init(&config.logging)?;

    let client = Arc::new(BridgeClient::new(config.bridge.url.clone()));

    if cli.logout {
        info!("logging out and deleting session data");
        session::logout(client.as_ref(), &config.paths.session_dir)
            .await
            .context("logout failed")?;
        println!("Successfully logged out. Session data deleted.");
        return Ok(());
    }

    if let Err(e) = run(&config, client).await {
        error!(error = %format!("{e:#}"), "run aborted");
        return Err(e);
    }
    Ok(())
}

async fn run(config: &Config, client: Arc<BridgeClient>) -> Result<()> {
    let recipients = load_recipients(&config.paths.recipients)?;
    let template = MessageTemplate::new(config.message.template_text()?);
    let ledger = Arc::new(
        Ledger::initialize(&config.paths.status).context("failed to initialise status ledger")?,
    );
    let readiness = Arc::new(OneShot::new());
    let shutdown = Arc::new(OneShot::new());

    // Events must flow before connecting so the first Connected is seen.
    let (event_tx, event_rx) = mpsc::channel(config.bridge.event_buffer);
    let poller = spawn_event_listener(client.base_url().to_owned(), event_tx);
    let handler = EventHandler::new(Arc::clone(&ledger), Arc::clone(&readiness));
    let handler_task = tokio::spawn(async move {
        match handler.run(event_rx).await {
            Err(SessionError::ForcedLogout) => std::process::exit(0),
            other => other,
        }
    });

    {
        let shutdown = Arc::clone(&shutdown);
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("received shutdown signal, disconnecting after current send");
            shutdown.fire();
        });
    }

    let pairing = PairingOutput {
        qr_png_path: Some(config.paths.qr_png.clone()),
    };
    let ready_timeout = Duration::from_secs(config.bridge.ready_timeout_secs);
    tokio::select! {
        res = session::establish(client.as_ref(), &readiness, &pairing, ready_timeout) => res?,
        () = shutdown.wait() => {
            info!("interrupted during session setup");
            poller.abort();
            return Ok(());
        }
    }

    tokio::time::sleep(Duration::from_secs(config.dispatch.settle_secs)).await;
    if !client.is_connected().await {
        anyhow::bail!("not connected to WhatsApp, try again");
    }

    let options = DispatchOptions {
        template,
        media_path: config.message.media.clone(),
        delay: config.dispatch.delay_window(),
    };
    let dispatcher = Dispatcher::new(Arc::clone(&client), Arc::clone(&ledger), options);
    let summary = dispatcher.run(&recipients, &shutdown).await;
    info!(
        total = summary.total(),
        sent = summary.count(Status::Sent),
        send_failed = summary.count(Status::SendFailed),
        not_on_whatsapp = summary.count(Status::NotOnWhatsapp),
        invalid = summary.count(Status::InvalidNumber),
        check_failed = summary.count(Status::CheckFailed),
        "dispatch finished"
    );

    let drain = Duration::from_secs(config.dispatch.drain_timeout_secs);
    if !shutdown.wait_timeout(drain).await {
        info!("receipt collection window elapsed");
    }

    tokio::time::sleep(Duration::from_secs(config.dispatch.disconnect_grace_secs)).await;
    if client.is_connected().await {
        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "disconnect failed");
        }
    }

    poller.abort();
    match handler_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "event handler stopped"),
        Err(e) => warn!(error = %e, "event handler task failed"),
    }
    info!(path = %ledger.path().display(), entries = ledger.len(), "status ledger written");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
