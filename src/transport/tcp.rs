use super::{set_nodelay, Inbound, Outbound, Transport};
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::net::TcpStream;
use tracing::debug;

/// 明文入站：已接受的 TCP 连接直接作为外侧连接
pub struct PlainInbound;

#[async_trait]
impl Inbound for PlainInbound {
    async fn establish(
        &self,
        stream: TcpStream,
        _peer: SocketAddr,
    ) -> Result<Pin<Box<dyn Transport>>> {
        set_nodelay(&stream);
        Ok(Box::pin(stream))
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}

/// 明文出站：直接拨号到后端
pub struct PlainOutbound {
    peer_addr: String,
}

impl PlainOutbound {
    pub fn new(peer_addr: String) -> Self {
        Self { peer_addr }
    }
}

#[async_trait]
impl Outbound for PlainOutbound {
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>> {
        let stream = TcpStream::connect(&self.peer_addr)
            .await
            .map_err(|e| ProxyError::dial(&self.peer_addr, e))?;
        set_nodelay(&stream);

        debug!("Connected to {}", self.peer_addr);
        Ok(Box::pin(stream))
    }

    fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}
