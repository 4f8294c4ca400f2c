//! Control server over a Unix domain socket.
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode
//! body. One request/response exchange per connection; the socket file
//! is created owner-only and removed on shutdown.

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::broadcast,
};
use tracing::{debug, error, info, warn};

use drover_common::Signal;

use crate::{
    auth::ControlAuthConfig,
    error::{ControlError, Result},
    protocol::{Request, Response},
};

/// Upper bound on a single frame.
const MAX_FRAME_SIZE: u32 = 1_000_000;

/// Per-exchange timeout.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handler for decoded control requests.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handle a request. Errors are converted into error responses for
    /// the client.
    async fn handle_request(&self, request: Request) -> Result<Response>;
}

/// The control server.
pub struct ControlServer {
    socket_path: String,
    auth: ControlAuthConfig,
    handler: Arc<dyn CommandHandler>,
}

impl ControlServer {
    #[must_use]
    pub fn new(
        socket_path: impl Into<String>,
        auth: ControlAuthConfig,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            auth,
            handler,
        }
    }

    /// Serve until shutdown.
    ///
    /// # Errors
    /// Fails when the socket cannot be bound, or when another live
    /// instance already owns it.
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<()> {
        let socket_path = Path::new(&self.socket_path);
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ControlError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrInUse,
                    format!("control socket already in use: {}", self.socket_path),
                )));
            }
            info!(path = %self.socket_path, "removing stale control socket");
            tokio::fs::remove_file(socket_path).await?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        #[cfg(unix)]
        {
            let metadata = tokio::fs::metadata(&self.socket_path).await?;
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            tokio::fs::set_permissions(&self.socket_path, perms).await?;
        }
        info!(path = %self.socket_path, "control server listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let handler = Arc::clone(&self.handler);
                            let auth = self.auth.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, &auth, handler).await {
                                    error!(error = %e, "control connection failed");
                                }
                            });
                        }
                        Err(e) => error!(error = %e, "control accept failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("control server shutting down");
                    break;
                }
            }
        }

        if socket_path.exists() {
            let _ = tokio::fs::remove_file(socket_path).await;
        }
        Ok(())
    }

    async fn handle_connection(
        mut stream: UnixStream,
        auth: &ControlAuthConfig,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<()> {
        let request = tokio::time::timeout(EXCHANGE_TIMEOUT, read_frame::<Request>(&mut stream))
            .await
            .map_err(|_| ControlError::Timeout)??;

        debug!(command = ?request.command, "control request");

        let response = if request.version != crate::PROTOCOL_VERSION {
            Response::error(format!("unsupported protocol version {}", request.version))
        } else if !auth.validate(request.token.as_deref()) {
            warn!("control request rejected: invalid token");
            Response::error("unauthorized")
        } else {
            match handler.handle_request(request).await {
                Ok(response) => response,
                Err(e) => Response::error(e.to_string()),
            }
        };

        tokio::time::timeout(EXCHANGE_TIMEOUT, write_frame(&mut stream, &response))
            .await
            .map_err(|_| ControlError::Timeout)??;
        Ok(())
    }
}

pub(crate) async fn read_frame<T: serde::de::DeserializeOwned>(
    stream: &mut UnixStream,
) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ControlError::ConnectionClosed
        } else {
            ControlError::Io(e)
        }
    })?;

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(ControlError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;

    let (value, _) = bincode::serde::decode_from_slice(&body, bincode::config::legacy())?;
    Ok(value)
}

pub(crate) async fn write_frame<T: serde::Serialize>(
    stream: &mut UnixStream,
    value: &T,
) -> Result<()> {
    let body = bincode::serde::encode_to_vec(value, bincode::config::legacy())?;
    let len = u32::try_from(body.len())
        .map_err(|_| ControlError::FrameTooLarge(u32::MAX))?;

    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}
