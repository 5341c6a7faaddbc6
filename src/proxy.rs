/// 监听与 accept 循环
///
/// 启动流程：材料加载 → TLS 上下文 → 模式选择 → 绑定监听 → accept 循环，
/// 每个被接受的连接交给独立的隧道任务
use crate::config::{ProxyConfig, Settings};
use crate::error::{ProxyError, Result};
use crate::material::TlsMaterial;
use crate::tls::TlsContext;
use crate::transport::{create_topology, Topology};
use crate::tunnel::run_tunnel;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// 已完成模式选择、尚未绑定的代理
pub struct Proxy {
    config: ProxyConfig,
    topology: Topology,
}

impl Proxy {
    /// 根据配置和 TLS 上下文组合传输层，不打开任何套接字
    pub fn new(config: ProxyConfig, tls: &TlsContext) -> Result<Self> {
        let topology = create_topology(&config, tls)?;
        Ok(Self { config, topology })
    }

    /// 从原始材料构建 TLS 上下文并组合传输层
    pub fn from_material(config: ProxyConfig, material: &TlsMaterial) -> Result<Self> {
        let tls = TlsContext::build(material, config.mode, &config.peer_server_name)?;
        Self::new(config, &tls)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// 绑定监听地址
    pub async fn bind(self) -> Result<BoundProxy> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(|e| ProxyError::listen(&self.config.listen_addr, e))?;
        let local_addr = listener.local_addr()?;

        info!(
            "start mTLS Proxy {} mode on {}",
            self.config.mode, local_addr
        );

        Ok(BoundProxy {
            listener,
            local_addr,
            topology: self.topology,
        })
    }
}

/// 已绑定监听套接字的代理
pub struct BoundProxy {
    listener: TcpListener,
    local_addr: SocketAddr,
    topology: Topology,
}

impl BoundProxy {
    /// 实际监听地址（绑定端口 0 时用于获取分配的端口）
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// 持续接受连接，直到 accept 失败
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// 持续接受连接，直到 accept 失败或 `shutdown` 完成
    ///
    /// accept 失败会结束循环并返回 [`ProxyError::Accept`]（排队期间被对端重置的连接除外）；
    /// 已建立的隧道不受循环结束影响，各自运行到连接关闭
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let topology = self.topology.clone();
                            tokio::spawn(run_tunnel(stream, peer, topology));
                        }
                        Err(e) if is_retryable_accept_error(&e) => {
                            debug!("Connection aborted before accept: {}", e);
                        }
                        Err(e) => {
                            error!("accept connection error; {}", e);
                            return Err(ProxyError::Accept(e));
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping proxy...");
                    break;
                }
            }
        }

        info!("Proxy on {} stopped", self.local_addr);
        Ok(())
    }
}

/// 连接在监听队列中被对端重置（ECONNABORTED）时 accept 可直接重试，
/// 其余错误均视为监听套接字失效
fn is_retryable_accept_error(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::ConnectionAborted)
}

/// 从配置层启动代理：解析 → 加载材料 → 构建上下文 → 绑定 → 服务
///
/// 所有配置错误都在绑定监听之前返回
pub async fn launch<F>(settings: Settings, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let resolved = settings.resolve()?;
    let material = resolved.material.load()?;
    let proxy = Proxy::from_material(resolved.proxy, &material)?;
    drop(material);

    proxy.bind().await?.serve_with_shutdown(shutdown).await
}
