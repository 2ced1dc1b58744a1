//! Connected stream transports.
//!
//! A [`Transport`] is a framed line stream over plain TCP or client-side
//! TLS. The session owns exactly one live transport at a time; nothing else
//! touches it directly.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_util::codec::Framed;
use tracing::warn;

use crate::codec::LineCodec;
use crate::error::{LineError, SessionError};

/// Framed IRC transport over TCP or TLS.
pub enum Transport {
    Tcp(Framed<TcpStream, LineCodec>),
    Tls(Box<Framed<TlsStream<TcpStream>, LineCodec>>),
}

impl Transport {
    /// Open a connection with a bounded connect (and handshake) timeout,
    /// optionally negotiating TLS.
    pub async fn connect(
        host: &str,
        port: u16,
        tls: bool,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let addr = format!("{host}:{port}");
        let connect = async {
            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|source| SessionError::Connect {
                    addr: addr.clone(),
                    source,
                })?;
            if let Err(e) = stream.set_nodelay(true) {
                warn!(error = %e, "failed to set TCP_NODELAY");
            }

            if tls {
                let name = ServerName::try_from(host.to_string()).map_err(|_| {
                    SessionError::ServerName {
                        host: host.to_string(),
                    }
                })?;
                let stream = tls_connector().connect(name, stream).await.map_err(
                    |source| SessionError::Tls {
                        host: host.to_string(),
                        source,
                    },
                )?;
                Ok(Self::Tls(Box::new(Framed::new(stream, LineCodec::new()))))
            } else {
                Ok(Self::Tcp(Framed::new(stream, LineCodec::new())))
            }
        };

        match tokio::time::timeout(timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectTimeout { addr }),
        }
    }

    /// Next complete line, terminator stripped. `None` means the server
    /// closed the connection.
    pub async fn next_line(&mut self) -> Option<Result<String, LineError>> {
        match self {
            Self::Tcp(framed) => framed.next().await,
            Self::Tls(framed) => framed.next().await,
        }
    }

    /// Write one line; the codec appends the terminator.
    pub async fn send_line(&mut self, line: String) -> Result<(), LineError> {
        match self {
            Self::Tcp(framed) => framed.send(line).await,
            Self::Tls(framed) => framed.send(line).await,
        }
    }
}

fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "skipping unreadable native root certificate");
    }
    for cert in native.certs {
        if let Err(e) = roots.add(cert) {
            warn!(error = %e, "rejected native root certificate");
        }
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
