//! Control client: one connection per request.

use tokio::net::UnixStream;

use crate::{
    error::{ControlError, Result},
    protocol::{Request, RequestCommand, Response},
    server::{read_frame, write_frame},
};

/// Thin client for the control socket, used by `droverctl` and tests.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: String,
    token: Option<String>,
}

impl ControlClient {
    #[must_use]
    pub fn new(socket_path: impl Into<String>, token: Option<String>) -> Self {
        Self {
            socket_path: socket_path.into(),
            token,
        }
    }

    /// Send one command and await the response.
    ///
    /// # Errors
    /// I/O and protocol failures, or a version mismatch with the
    /// server.
    pub async fn send(&self, command: RequestCommand) -> Result<Response> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;

        let request = Request::new(command, self.token.clone());
        write_frame(&mut stream, &request).await?;

        let response: Response = read_frame(&mut stream).await?;
        if !response.is_version_compatible() {
            return Err(ControlError::Version(response.version));
        }
        Ok(response)
    }
}
