mod factory;
mod tcp;
mod tls;

pub use factory::{create_topology, Topology};
pub use tcp::{PlainInbound, PlainOutbound};
pub use tls::{TlsInbound, TlsOutbound};

use crate::error::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// 隧道两端的连接抽象
///
/// 统一封装明文 TCP 与 TLS 连接，转发逻辑不关心具体类型
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

// 为所有满足条件的类型自动实现 Transport
impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// 外侧（监听侧）连接的建立方式
#[async_trait]
pub trait Inbound: Send + Sync {
    /// 将刚接受的 TCP 连接转换为外侧连接（服务器模式下在此完成 mTLS 握手）
    async fn establish(&self, stream: TcpStream, peer: SocketAddr)
        -> Result<Pin<Box<dyn Transport>>>;

    /// 传输类型名称，用于日志
    fn kind(&self) -> &'static str;
}

/// 内侧（对端）连接的拨号方式
#[async_trait]
pub trait Outbound: Send + Sync {
    /// 拨号到对端并返回内侧连接
    async fn dial(&self) -> Result<Pin<Box<dyn Transport>>>;

    /// 对端地址
    fn peer_addr(&self) -> &str;

    /// 传输类型名称，用于日志
    fn kind(&self) -> &'static str;
}

/// 为低延迟转发关闭 Nagle 算法，失败不影响连接
pub(crate) fn set_nodelay(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY: {}", e);
    }
}
