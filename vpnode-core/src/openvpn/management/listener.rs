//! Management listener
//!
//! Binds a local TCP address, accepts the single control connection opened by
//! the tunnel process and serves it until shutdown or until the process hangs
//! up. Middlewares are started as soon as the connection is accepted and
//! stopped before the connection is dropped, so their teardown commands still
//! reach the process.

use crate::error::ManagementError;
use crate::openvpn::management::{
    deliver_line, start_middlewares, stop_middlewares, CommandWriter, Middleware,
};
use crate::utils::Cancelable;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Queues commands for the serving task, which owns the socket
struct ChannelCommandWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl CommandWriter for ChannelCommandWriter {
    fn write_line(&self, command: &str) -> Result<(), ManagementError> {
        self.tx
            .send(command.to_string())
            .map_err(|_| ManagementError::ConnectionClosed)
    }
}

/// Listener and server of the tunnel process management channel
pub struct Management {
    bind_address: SocketAddr,
    middlewares: Mutex<Option<Vec<Box<dyn Middleware>>>>,
    shutdown: Cancelable,
    connected: watch::Sender<Option<bool>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Management {
    pub fn new(bind_address: SocketAddr, middlewares: Vec<Box<dyn Middleware>>) -> Self {
        let (connected, _) = watch::channel(None);
        Self {
            bind_address,
            middlewares: Mutex::new(Some(middlewares)),
            shutdown: Cancelable::new(),
            connected,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Bind the listener and start waiting for the process to connect
    ///
    /// Returns the address actually bound (with the real port when the
    /// configured port is zero). Can only be called once.
    pub async fn listen(&self) -> Result<SocketAddr, ManagementError> {
        let middlewares = self
            .middlewares
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(ManagementError::AlreadyListening)?;

        info!("Binding management socket: {}", self.bind_address);
        let listener = TcpListener::bind(self.bind_address).await?;
        let bound = listener.local_addr()?;
        info!("Waiting for incoming management connection on: {}", bound);

        let handle = tokio::spawn(accept_and_serve(
            listener,
            middlewares,
            self.shutdown.clone(),
            self.connected.clone(),
        ));
        *self.task.lock().await = Some(handle);

        Ok(bound)
    }

    /// Wait until the process connected, or the listener gave up
    pub async fn wait_connected(&self, timeout: Duration) -> Result<(), ManagementError> {
        let mut rx = self.connected.subscribe();
        let outcome = tokio::time::timeout(timeout, async {
            rx.wait_for(Option::is_some).await.map(|accepted| *accepted)
        })
        .await;

        match outcome {
            Ok(Ok(Some(true))) => Ok(()),
            Ok(_) => Err(ManagementError::ConnectionRefused),
            Err(_) => Err(ManagementError::AcceptTimeout {
                seconds: timeout.as_secs(),
            }),
        }
    }

    /// Request shutdown and wait for the serving task to finish
    ///
    /// Safe to call more than once.
    pub async fn stop(&self) {
        info!("Management shutdown");
        self.shutdown.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Management task failed: {}", e);
            }
        }
        info!("Management shutdown finished");
    }
}

async fn accept_and_serve(
    listener: TcpListener,
    middlewares: Vec<Box<dyn Middleware>>,
    shutdown: Cancelable,
    connected: watch::Sender<Option<bool>>,
) {
    let stream = tokio::select! {
        accepted = listener.accept() => match accepted {
            Ok((stream, peer)) => {
                info!("Management connection accepted from {}", peer);
                stream
            }
            Err(e) => {
                error!("Management connection accept error: {}", e);
                connected.send_replace(Some(false));
                return;
            }
        },
        _ = shutdown.cancelled() => {
            connected.send_replace(Some(false));
            return;
        }
    };
    drop(listener);

    connected.send_replace(Some(true));
    serve(stream, middlewares, shutdown).await;
}

/// Serve one management connection
///
/// Reads notification lines and writes queued commands on the same task, so
/// the socket has a single owner.
pub(crate) async fn serve<S>(stream: S, mut middlewares: Vec<Box<dyn Middleware>>, shutdown: Cancelable)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let (tx, mut commands) = mpsc::unbounded_channel::<String>();
    let command_writer: Arc<dyn CommandWriter> = Arc::new(ChannelCommandWriter { tx });

    start_middlewares(&mut middlewares, &command_writer);

    let mut lines = BufReader::new(reader).lines();
    loop {
        // lines already received are delivered before shutdown is honoured
        tokio::select! {
            biased;

            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    trace!("Line received: {}", line);
                    if line.starts_with('>') {
                        deliver_line(&mut middlewares, &line);
                    } else {
                        debug!("Command reply: {}", line);
                    }
                }
                Ok(None) => {
                    info!("Management connection closed by process");
                    break;
                }
                Err(e) => {
                    warn!("Management connection failed to read: {}", e);
                    break;
                }
            },
            Some(command) = commands.recv() => {
                if let Err(e) = write_command(&mut writer, &command).await {
                    warn!("Failed to write management command: {}", e);
                    break;
                }
            }
            _ = shutdown.cancelled() => {
                debug!("Management shutdown requested");
                break;
            }
        }
    }

    stop_middlewares(&mut middlewares, command_writer.as_ref());
    while let Ok(command) = commands.try_recv() {
        if let Err(e) = write_command(&mut writer, &command).await {
            debug!("Dropping management command {:?}: {}", command, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn write_command<W: AsyncWrite + Unpin>(writer: &mut W, command: &str) -> std::io::Result<()> {
    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
