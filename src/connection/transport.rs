//! Transport abstraction (TCP with optional TLS vs Unix socket)

use super::tls::{parse_server_name, TlsConfig};
use crate::{Error, Result};
use bytes::BytesMut;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

/// TCP stream variant: plain or TLS-encrypted
#[allow(clippy::large_enum_variant)]
pub enum TcpVariant {
    /// Plain TCP connection
    Plain(TcpStream),
    /// TLS-encrypted TCP connection
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

impl std::fmt::Debug for TcpVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcpVariant::Plain(_) => f.write_str("TcpVariant::Plain(TcpStream)"),
            TcpVariant::Tls(_) => f.write_str("TcpVariant::Tls(TlsStream)"),
        }
    }
}

/// Transport layer abstraction
#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Transport {
    /// TCP socket (plain or TLS)
    Tcp(TcpVariant),
    /// Unix domain socket
    Unix(UnixStream),
}

/// Dispatch an I/O call to whichever stream is underneath
macro_rules! with_stream {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Transport::Tcp(TcpVariant::Plain($s)) => $body,
            Transport::Tcp(TcpVariant::Tls($s)) => $body,
            Transport::Unix($s) => $body,
        }
    };
}

impl Transport {
    /// Connect via plain TCP, optionally bounded by `timeout`
    pub async fn connect_tcp(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let connect = TcpStream::connect((host, port));
        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| Error::ConnectTimeout(limit))??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        Ok(Transport::Tcp(TcpVariant::Plain(stream)))
    }

    /// Connect via Unix socket
    pub async fn connect_unix(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await?;
        Ok(Transport::Unix(stream))
    }

    /// Whether the stream is TLS-encrypted
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tcp(TcpVariant::Tls(_)))
    }

    /// Write bytes and flush
    pub async fn send(&mut self, buf: &[u8]) -> Result<()> {
        with_stream!(self, s => {
            s.write_all(buf).await?;
            s.flush().await?;
        });
        Ok(())
    }

    /// Read bytes into buffer, returning how many arrived (0 = EOF)
    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = with_stream!(self, s => s.read_buf(buf).await?);
        Ok(n)
    }

    /// Upgrade a plain TCP transport to TLS after SSLRequest negotiation.
    ///
    /// Consumes `self`; Unix sockets and already-encrypted streams are rejected.
    pub async fn upgrade_to_tls(self, tls_config: &TlsConfig, hostname: &str) -> Result<Self> {
        match self {
            Transport::Tcp(TcpVariant::Plain(tcp_stream)) => {
                let server_name = parse_server_name(hostname)?;
                let server_name = rustls_pki_types::ServerName::try_from(server_name)
                    .map_err(|_| Error::Tls(format!("invalid hostname for TLS: {}", hostname)))?;

                let connector = tokio_rustls::TlsConnector::from(tls_config.client_config());
                let tls_stream = connector
                    .connect(server_name, tcp_stream)
                    .await
                    .map_err(|e| Error::Tls(format!("TLS handshake failed: {}", e)))?;

                Ok(Transport::Tcp(TcpVariant::Tls(tls_stream)))
            }
            Transport::Tcp(TcpVariant::Tls(_)) => {
                Err(Error::Tls("transport is already TLS-encrypted".into()))
            }
            Transport::Unix(_) => Err(Error::Tls("cannot upgrade Unix socket to TLS".into())),
        }
    }

    /// Shutdown the transport
    pub async fn shutdown(&mut self) -> Result<()> {
        with_stream!(self, s => s.shutdown().await?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Transport::connect_tcp("127.0.0.1", port, None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_tcp_send_and_read() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut transport = Transport::connect_tcp("127.0.0.1", port, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(!transport.is_tls());
        transport.send(b"ping").await.unwrap();

        let mut buf = BytesMut::new();
        while buf.len() < 4 {
            assert!(transport.read_buf(&mut buf).await.unwrap() > 0);
        }
        assert_eq!(&buf[..], b"ping");
        server.await.unwrap();
    }
}
