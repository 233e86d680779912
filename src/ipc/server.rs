//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! session events to subscribed clients. The external recognizer uses the
//! same socket to feed word events into the daemon.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::recognizer::IpcFeedTransport;
use crate::session::SessionHandle;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// What every client handler needs
struct Shared {
    handle: SessionHandle,
    feed: Arc<IpcFeedTransport>,
    start_time: Instant,
    hotkeys_available: bool,
}

impl Server {
    /// Bind the socket, replacing a stale one left by a previous run
    pub fn new(
        socket_path: &Path,
        handle: SessionHandle,
        feed: Arc<IpcFeedTransport>,
        hotkeys_available: bool,
    ) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared: Arc::new(Shared {
                handle,
                feed,
                start_time: Instant::now(),
                hotkeys_available,
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Disconnect clients and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Serve one connection. Requests are read on a separate task so pushed
/// events can be written while the client is idle.
async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (request_tx, mut request_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(read_requests(reader, request_tx));
    let mut events: Option<broadcast::Receiver<SessionEvent>> = None;

    let result = loop {
        tokio::select! {
            request = request_rx.recv() => {
                let Some(request) = request else {
                    break Ok(());
                };
                let response = match request {
                    Ok(request) => {
                        debug!(?request, "received request");
                        shared.process_request(request, &mut events).await
                    }
                    Err(message) => Response::Error {
                        code: "invalid_request".into(),
                        message,
                    },
                };
                if let Err(e) = send_message(&mut writer, &response).await {
                    break Err(e);
                }
            }
            event = next_event(&mut events) => match event {
                Some(event) => {
                    if let Err(e) = send_message(&mut writer, &Notification::Event { event }).await {
                        break Err(e);
                    }
                }
                None => events = None,
            },
        }
    };

    reader_task.abort();
    result
}

/// Read length-prefixed requests until the client goes away
async fn read_requests(
    mut reader: OwnedReadHalf,
    requests: mpsc::Sender<Result<Request, String>>,
) -> Result<()> {
    let mut len_buf = [0u8; 4];
    loop {
        match reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_MESSAGE_LEN {
            warn!(len, "message too large, disconnecting");
            return Ok(());
        }

        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;

        let request = serde_json::from_slice::<Request>(&msg_buf).map_err(|e| {
            warn!(%e, "unparseable request");
            format!("failed to parse request: {e}")
        });
        if requests.send(request).await.is_err() {
            return Ok(());
        }
    }
}

/// Next event for a subscribed client; never resolves when not subscribed
async fn next_event(events: &mut Option<broadcast::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    let Some(rx) = events.as_mut() else {
        return std::future::pending().await;
    };
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Send a length-prefixed JSON message
async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

impl Shared {
    async fn process_request(
        &self,
        request: Request,
        events: &mut Option<broadcast::Receiver<SessionEvent>>,
    ) -> Response {
        let handle = &self.handle;
        let result = match request {
            Request::Ping => return Response::Pong,

            Request::GetStatus => return Response::Status(self.status()),

            Request::Subscribe => {
                *events = Some(handle.subscribe());
                debug!("client subscribed to notifications");
                return Response::Subscribed;
            }

            Request::SetMode { mode } => handle.set_mode(mode).await,
            Request::SetBehavior { behavior } => handle.set_behavior(behavior).await,
            Request::SetProfile { profile } => handle.set_profile(profile).await,
            Request::SetCustomProfile {
                confidence_threshold,
                silence_threshold_ms,
            } => {
                handle
                    .set_custom_profile(confidence_threshold, silence_threshold_ms)
                    .await
            }
            Request::ForceEndUtterance => handle.force_end_utterance().await,
            Request::BeginPtt { sticky } => handle.begin_ptt(sticky).await,
            Request::EndPtt => handle.end_ptt().await,
            Request::SubmitCommand { text } => handle.submit_command(text).await,
            Request::InterruptCommand => handle.interrupt_command().await,
            Request::SwitchAssistantSession { session_id } => {
                handle.switch_assistant_session(session_id).await
            }
            Request::Reconnect => handle.reconnect().await,

            Request::FeedWord { word } => {
                self.feed.push_word(word).await;
                Ok(())
            }
            Request::FeedDisconnected { reason } => {
                self.feed.disconnect_all(&reason).await;
                Ok(())
            }
        };

        match result {
            Ok(()) => Response::Ok,
            Err(err) => err.into(),
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            hotkeys_available: self.hotkeys_available,
            session: self.handle.snapshot(),
        }
    }
}
