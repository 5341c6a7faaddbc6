/// 隧道任务与双向转发
///
/// 每个被接受的连接对应一个任务：建立外侧连接、拨号内侧连接、双向转发，
/// 任一方向结束后两端一起关闭
use crate::error::{ProxyError, Result};
use crate::transport::Topology;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// 关闭写半部（FIN / close_notify）的最长等待时间
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 转发方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// outer → inner
    Upstream,
    /// inner → outer
    Downstream,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upstream => "outer -> inner",
            Direction::Downstream => "inner -> outer",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 先结束的方向及其转发字节数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySummary {
    pub finished: Direction,
    pub bytes: u64,
}

/// 在两条连接之间双向转发字节，直到任一方向遇到 EOF 或错误
///
/// 两个方向在同一任务中并发执行。先结束的方向决定隧道结束：
/// 随后关闭两侧写半部并释放两条连接，另一方向即使仍有数据也不再等待
pub async fn relay<O, I>(outer: O, inner: I) -> Result<RelaySummary>
where
    O: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + AsyncWrite + Unpin,
{
    let (mut outer_read, mut outer_write) = tokio::io::split(outer);
    let (mut inner_read, mut inner_write) = tokio::io::split(inner);

    let (direction, result) = {
        let upstream = tokio::io::copy(&mut outer_read, &mut inner_write);
        let downstream = tokio::io::copy(&mut inner_read, &mut outer_write);
        tokio::pin!(upstream, downstream);

        tokio::select! {
            result = &mut upstream => (Direction::Upstream, result),
            result = &mut downstream => (Direction::Downstream, result),
        }
    };

    close_write(&mut inner_write, "inner").await;
    close_write(&mut outer_write, "outer").await;

    result
        .map(|bytes| RelaySummary {
            finished: direction,
            bytes,
        })
        .map_err(|source| ProxyError::Relay {
            direction: direction.as_str(),
            source,
        })
}

async fn close_write<W>(writer: &mut W, side: &str)
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Shutdown of {} connection failed: {}", side, e),
        Err(_) => debug!("Shutdown of {} connection timed out", side),
    }
}

/// 单条隧道的完整生命周期
///
/// 所有错误都只影响本隧道，记录日志后丢弃
pub async fn run_tunnel(stream: TcpStream, peer: SocketAddr, topology: Topology) {
    let outer = match topology.inbound.establish(stream, peer).await {
        Ok(outer) => outer,
        Err(e) => {
            warn!("Rejected connection from {}: {}", peer, e);
            return;
        }
    };

    let inner = match topology.outbound.dial().await {
        Ok(inner) => inner,
        Err(e) => {
            warn!("can not dial server for {}; {}", peer, e);
            let mut outer = outer;
            close_write(&mut outer, "outer").await;
            return;
        }
    };

    info!(
        "Tunnel opened: {} ({}) <-> {} ({})",
        peer,
        topology.inbound.kind(),
        topology.outbound.peer_addr(),
        topology.outbound.kind()
    );

    match relay(outer, inner).await {
        Ok(summary) => info!(
            "Tunnel closed: {} ({} finished after {} bytes)",
            peer, summary.finished, summary.bytes
        ),
        Err(e) => warn!("Tunnel {} closed with error: {}", peer, e),
    }
}
