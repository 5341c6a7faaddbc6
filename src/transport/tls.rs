use super::{set_nodelay, Inbound, Outbound, Transport};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::io;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::{rustls, TlsAcceptor, TlsConnector};
use tracing::debug;

/// mTLS 出站：拨号后以客户端身份握手，出示本地证书并验证服务器
pub struct TlsOutbound {
    peer_addr: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
}

impl TlsOutbound {
    pub fn new(peer_addr: String, server_name: ServerName<'static>, connector: TlsConnector) -> Self {
        Self {
            peer_addr,
            server_name,
            connector,
        }
    }
}

#[async_trait]
impl Outbound for TlsOutbound {
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>> {
        let tcp_stream = TcpStream::connect(&self.peer_addr)
            .await
            .map_err(|e| ProxyError::dial(&self.peer_addr, e))?;
        set_nodelay(&tcp_stream);

        let tls_stream = self
            .connector
            .connect(self.server_name.clone(), tcp_stream)
            .await
            .map_err(|e| ProxyError::handshake(&self.peer_addr, e))?;

        debug!("TLS connection established to {}", self.peer_addr);
        Ok(Box::pin(tls_stream))
    }

    fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    fn kind(&self) -> &'static str {
        "mtls"
    }
}

/// 入站握手的最长等待时间，超时的连接直接丢弃
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// mTLS 入站：以服务器身份握手，要求并验证客户端证书
pub struct TlsInbound {
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
}

impl TlsInbound {
    pub fn new(acceptor: TlsAcceptor) -> Self {
        Self {
            acceptor,
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl Inbound for TlsInbound {
    async fn establish(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<Pin<Box<dyn Transport>>> {
        set_nodelay(&stream);

        let tls_stream = tokio::time::timeout(self.handshake_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| {
                ProxyError::handshake(
                    peer.to_string(),
                    io::Error::new(io::ErrorKind::TimedOut, "TLS handshake timed out"),
                )
            })?
            .map_err(|e| ProxyError::handshake(peer.to_string(), e))?;

        debug!("TLS handshake completed with {}", peer);
        Ok(Box::pin(tls_stream))
    }

    fn kind(&self) -> &'static str {
        "mtls"
    }
}
