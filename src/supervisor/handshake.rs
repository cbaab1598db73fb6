//! Start-up handshake between the launcher and its detached daemon.
//!
//! The launcher listens on a fresh Unix socket and passes its path to the
//! child. The child connects before it writes the PID file and reports one
//! byte once service initialisation has finished: [`HANDSHAKE_SUCCESS`] or
//! any other value for failure.

use std::fs;
use std::future::Future;
use std::io;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;
use uuid::Uuid;

use super::SupervisorError;

/// Status byte reporting a successful start.
pub const HANDSHAKE_SUCCESS: u8 = 0;

/// Status byte reporting a failed start.
pub const HANDSHAKE_FAILURE: u8 = 1;

const LATE_REPORT_GRACE: Duration = Duration::from_millis(500);

fn handshake_error(context: &str, err: &io::Error) -> SupervisorError {
    SupervisorError::Handshake(format!("{context}: {err}"))
}

/// Launcher side of the handshake. The socket file is removed on drop.
#[derive(Debug)]
pub struct HandshakeListener {
    listener: UnixListener,
    path: Utf8PathBuf,
}

impl HandshakeListener {
    /// Binds a randomly named socket inside `dir`. Must run inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Handshake`] when binding fails.
    pub fn bind_in(dir: &Utf8Path) -> Result<Self, SupervisorError> {
        let path = dir.join(format!("{}.sock", Uuid::new_v4().simple()));
        let listener = UnixListener::bind(&path)
            .map_err(|err| handshake_error(&format!("bind {path}"), &err))?;
        debug!(socket = %path, "listening for startup handshake");
        Ok(Self { listener, path })
    }

    /// Path the child must connect to.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    async fn accept(&self) -> Result<UnixStream, SupervisorError> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|err| handshake_error("accept", &err))?;
        debug!(socket = %self.path, "accepted handshake connection");
        Ok(stream)
    }

    /// Accepts one connection and reads the status byte, waiting at most
    /// `timeout` when one is given.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Handshake`] when the exchange fails, the
    /// peer closes without reporting, or the timeout expires.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<u8, SupervisorError> {
        within(timeout, async { read_status(self.accept().await?).await }).await
    }

    /// Like [`receive`](Self::receive), but stops waiting for a connection
    /// once `exited` resolves with a description of how the peer ended.
    ///
    /// A connection that was already accepted is always read to the end, so
    /// a status written just before the peer exits is still returned. A
    /// connection still queued when the peer exits is picked up within a
    /// short grace period.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Handshake`] when the peer exits without
    /// connecting, closes without reporting, or the timeout expires.
    pub async fn receive_unless_exited<F>(
        &self,
        timeout: Option<Duration>,
        exited: F,
    ) -> Result<u8, SupervisorError>
    where
        F: Future<Output = String>,
    {
        let exchange = async {
            let stream = tokio::select! {
                biased;
                accepted = self.accept() => accepted?,
                detail = exited => {
                    match tokio::time::timeout(LATE_REPORT_GRACE, self.accept()).await {
                        Ok(accepted) => accepted?,
                        Err(_) => {
                            return Err(SupervisorError::Handshake(format!(
                                "daemon exited before reporting: {detail}"
                            )));
                        }
                    }
                }
            };
            read_status(stream).await
        };
        within(timeout, exchange).await
    }
}

async fn read_status(mut stream: UnixStream) -> Result<u8, SupervisorError> {
    let mut buffer = [0_u8; 1];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|err| handshake_error("read status", &err))?;
    let [status] = buffer;
    Ok(status)
}

async fn within<F>(timeout: Option<Duration>, exchange: F) -> Result<u8, SupervisorError>
where
    F: Future<Output = Result<u8, SupervisorError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, exchange).await.map_err(|_| {
            SupervisorError::Handshake(format!("no status within {}s", limit.as_secs()))
        })?,
        None => exchange.await,
    }
}

impl Drop for HandshakeListener {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            debug!(socket = %self.path, error = %err, "failed to remove handshake socket");
        }
    }
}

/// Child side of the handshake.
#[derive(Debug)]
pub struct HandshakeClient {
    stream: UnixStream,
}

impl HandshakeClient {
    /// Connects to the launcher's socket.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Handshake`] when the socket is unreachable.
    pub async fn connect(socket: &Utf8Path) -> Result<Self, SupervisorError> {
        debug!(socket = %socket, "dialing startup handshake");
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|err| handshake_error(&format!("connect {socket}"), &err))?;
        Ok(Self { stream })
    }

    /// Sends the status byte and closes the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Handshake`] when the write fails.
    pub async fn report(mut self, success: bool) -> Result<(), SupervisorError> {
        let status = if success {
            HANDSHAKE_SUCCESS
        } else {
            HANDSHAKE_FAILURE
        };
        self.stream
            .write_all(&[status])
            .await
            .map_err(|err| handshake_error("write status", &err))?;
        self.stream
            .shutdown()
            .await
            .map_err(|err| handshake_error("close", &err))
    }
}
