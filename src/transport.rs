use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::TransportError;

/// A connected byte stream with bounded-time, all-or-nothing I/O.
///
/// Generic over the stream so tests can drive it with an in-memory pipe.
pub struct Connection<S = TcpStream> {
    stream: Option<S>,
    io_timeout: Duration,
}

impl Connection<TcpStream> {
    /// Open a TCP connection to `host:port`, giving up after `timeout`.
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
            Err(_) => return Err(TransportError::ConnectTimeout { addr, timeout }),
        };
        // Frames are small and written whole; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay on {addr} failed: {e}");
        }
        debug!("Connected to {addr}");
        Ok(Self::from_stream(stream, timeout))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S, io_timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            io_timeout,
        }
    }

    /// Applies to both directions, starting with the next call.
    pub fn set_io_timeout(&mut self, timeout: Duration) {
        self.io_timeout = timeout;
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Read exactly `n` bytes. A peer close before `n` bytes arrive is an
    /// error, never a short success.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf).await?;
        Ok(buf)
    }

    /// Fill `buf` completely from the stream.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> Result<(), TransportError> {
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let expected = buf.len();

        let fill = async {
            let mut filled = 0;
            while filled < expected {
                match stream.read(&mut buf[filled..]).await {
                    Ok(0) => {
                        return Err(TransportError::Closed {
                            op: "read",
                            transferred: filled,
                            expected,
                        });
                    }
                    Ok(n) => filled += n,
                    Err(source) => return Err(TransportError::Io { op: "read", source }),
                }
            }
            Ok(())
        };

        tokio::time::timeout(timeout, fill)
            .await
            .map_err(|_| TransportError::Timeout { op: "read", timeout })?
    }

    /// Write all of `bytes`, looping over partial writes.
    pub async fn write_exact(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let expected = bytes.len();

        let drain = async {
            let mut written = 0;
            while written < expected {
                match stream.write(&bytes[written..]).await {
                    Ok(0) => {
                        return Err(TransportError::Closed {
                            op: "write",
                            transferred: written,
                            expected,
                        });
                    }
                    Ok(n) => written += n,
                    Err(source) => return Err(TransportError::Io { op: "write", source }),
                }
            }
            stream
                .flush()
                .await
                .map_err(|source| TransportError::Io { op: "write", source })
        };

        tokio::time::timeout(timeout, drain)
            .await
            .map_err(|_| TransportError::Timeout { op: "write", timeout })?
    }

    /// Release the stream. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = tokio::time::timeout(self.io_timeout, stream.shutdown()).await;
        }
    }
}
