//! dictation-daemon: background daemon for voice dictation
//!
//! Runs as a LaunchAgent (or any user service) and provides:
//! - Global hotkeys for push-to-talk and microphone mode shortcuts
//! - The Off/On/Sleep session controller with inactivity timers
//! - An assistant command queue backed by a local command
//! - An IPC socket for the menu bar app and the external recognizer

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dictation_daemon::assistant::{AssistantBackend, CliBackend, UnconfiguredBackend};
use dictation_daemon::config::Config;
use dictation_daemon::hotkey::HotkeyListener;
use dictation_daemon::inject::platform_injector;
use dictation_daemon::ipc::Server;
use dictation_daemon::lifecycle::ShutdownSignal;
use dictation_daemon::recognizer::IpcFeedTransport;
use dictation_daemon::session::SessionCoordinator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "dictation-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");

    let mut shutdown = ShutdownSignal::new()?;

    let backend: Arc<dyn AssistantBackend> = match config
        .settings
        .assistant
        .command
        .as_deref()
        .and_then(CliBackend::from_command)
    {
        Some(cli) => {
            info!(?config.settings.assistant.command, "assistant backend configured");
            Arc::new(cli)
        }
        None => {
            warn!("no assistant command configured, commands will fail");
            Arc::new(UnconfiguredBackend)
        }
    };

    let feed = Arc::new(IpcFeedTransport::new());
    let (coordinator, handle) = SessionCoordinator::new(
        config.settings.session_config(),
        feed.clone(),
        platform_injector(),
        backend,
    );

    // Hotkey listener -> coordinator
    let (hotkey_tx, hotkey_rx) = mpsc::channel(32);
    let hotkey_listener = HotkeyListener::new(hotkey_tx);
    let hotkeys_available = match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
            true
        }
        Err(e) => {
            error!(%e, "failed to start hotkey listener");
            warn!("continuing without global hotkeys - shortcuts remain available over IPC");
            false
        }
    };

    let server = Server::new(&config.socket_path, handle.clone(), feed, hotkeys_available)?;
    let mut coordinator_task = tokio::spawn(coordinator.run(hotkey_rx));

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = &mut coordinator_task => {
            error!("session coordinator exited unexpectedly");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    // Microphone off, captures cancelled, running assistant turn aborted
    if let Err(e) = handle.shutdown().await {
        warn!(%e, "session already stopped");
    }
    if !coordinator_task.is_finished() {
        let _ = coordinator_task.await;
    }

    hotkey_listener.stop();
    server.shutdown().await;

    info!("dictation-daemon stopped");

    Ok(())
}
