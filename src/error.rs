/// 自定义错误类型
///
/// 按照失败的影响范围划分：启动阶段的致命错误（配置、监听、接受连接）
/// 与只影响单条隧道的可恢复错误（拨号、握手、转发）
use std::io;
use thiserror::Error;

/// mTLS Proxy 的主要错误类型
#[derive(Error, Debug)]
pub enum ProxyError {
    /// 配置错误（模式非法、证书材料无法解析、密钥不匹配等）
    #[error("Configuration error: {0}")]
    Config(String),

    /// 无法绑定监听地址
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 接受新连接失败，终止 accept 循环
    #[error("Failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// 拨号到对端失败
    #[error("Failed to connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// TLS 握手失败
    #[error("TLS handshake with {peer} failed: {source}")]
    Handshake {
        peer: String,
        #[source]
        source: io::Error,
    },

    /// 转发过程中的读写错误
    #[error("Relay error ({direction}): {source}")]
    Relay {
        direction: &'static str,
        #[source]
        source: io::Error,
    },

    /// I/O 错误
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// 其他错误（保留与 anyhow 的兼容性）
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// 创建监听错误
    pub fn listen(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Listen {
            addr: addr.into(),
            source,
        }
    }

    /// 创建拨号错误
    pub fn dial(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Dial {
            addr: addr.into(),
            source,
        }
    }

    /// 创建握手错误
    pub fn handshake(peer: impl Into<String>, source: io::Error) -> Self {
        Self::Handshake {
            peer: peer.into(),
            source,
        }
    }

    /// 检查是否为配置错误
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// 致命错误会终止进程；其余错误只影响所属的隧道
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Listen { .. } | Self::Accept(_) | Self::Other(_)
        )
    }
}

impl From<rustls::Error> for ProxyError {
    fn from(err: rustls::Error) -> Self {
        Self::Config(format!("TLS: {err}"))
    }
}
