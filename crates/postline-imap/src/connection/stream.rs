//! Stream types for IMAP connections.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::config::{Config, Security};
use crate::{Error, Result};

/// Any byte stream the engine can run over: TCP, a duplex pipe in tests, a
/// proxy tunnel.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// A stream that can be either plaintext or TLS.
pub enum ImapStream {
    /// Plaintext stream.
    Plain(Box<dyn Transport>),
    /// TLS-encrypted stream (boxed to reduce enum size).
    Tls(Box<TlsStream<Box<dyn Transport>>>),
}

impl std::fmt::Debug for ImapStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.is_tls() { "ImapStream::Tls" } else { "ImapStream::Plain" })
    }
}

impl ImapStream {
    /// Wraps a plaintext transport.
    pub fn plain(transport: impl Transport) -> Self {
        Self::Plain(Box::new(transport))
    }

    /// Upgrades a plaintext stream to TLS using STARTTLS.
    pub async fn upgrade_to_tls(
        self,
        host: &str,
        tls: Option<Arc<rustls::ClientConfig>>,
    ) -> Result<Self> {
        match self {
            Self::Plain(transport) => {
                let stream = handshake(transport, host, tls).await?;
                Ok(Self::Tls(Box::new(stream)))
            }
            Self::Tls(_) => Err(Error::Negotiation("Stream is already TLS".to_string())),
        }
    }

    /// Returns true if the stream is TLS-encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for ImapStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ImapStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Creates a TLS connector with default root certificates.
pub fn create_tls_connector() -> Result<TlsConnector> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn handshake(
    transport: Box<dyn Transport>,
    host: &str,
    tls: Option<Arc<rustls::ClientConfig>>,
) -> Result<TlsStream<Box<dyn Transport>>> {
    let connector = match tls {
        Some(config) => TlsConnector::from(config),
        None => create_tls_connector()?,
    };
    let server_name = ServerName::try_from(host.to_string())?;
    let stream = connector.connect(server_name, transport).await?;
    tracing::debug!(host, "TLS handshake complete");
    Ok(stream)
}

/// Opens the TCP connection and, for implicit TLS, runs the handshake.
pub async fn connect(config: &Config) -> Result<ImapStream> {
    let addr = format!("{}:{}", config.host, config.port);
    let tcp = TcpStream::connect(&addr).await?;
    tcp.set_nodelay(true)?;
    tracing::info!(%addr, security = ?config.security, "connected");

    let transport: Box<dyn Transport> = Box::new(tcp);
    match config.security {
        Security::Implicit => {
            let stream = handshake(transport, &config.host, config.tls.clone()).await?;
            Ok(ImapStream::Tls(Box::new(stream)))
        }
        Security::None | Security::StartTls => Ok(ImapStream::Plain(transport)),
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[test]
    fn test_create_tls_connector() {
        let connector = create_tls_connector();
        assert!(connector.is_ok());
    }

    #[tokio::test]
    async fn test_plain_stream_passes_bytes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = ImapStream::plain(client);
        assert!(!stream.is_tls());

        stream.write_all(b"A0 NOOP\r\n").await.unwrap();
        let mut buf = [0u8; 9];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"A0 NOOP\r\n");

        server.write_all(b"A0 OK\r\n").await.unwrap();
        let mut buf = [0u8; 7];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"A0 OK\r\n");
    }

    #[tokio::test]
    async fn test_invalid_server_name_is_rejected() {
        let (client, _server) = tokio::io::duplex(64);
        let err = ImapStream::plain(client)
            .upgrade_to_tls("not a host name!", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDnsName(_)));
    }
}
