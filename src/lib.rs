/// mTLS Proxy 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod config;
pub mod error;
pub mod material;
pub mod proxy;
pub mod tls;
pub mod transport;
pub mod tunnel;

// 重新导出常用类型
pub use config::{Mode, ProxyConfig, ResolvedConfig, Settings};
pub use error::{ProxyError, Result};
pub use material::{MaterialSource, MaterialSources, TlsMaterial};
pub use proxy::{launch, BoundProxy, Proxy};
pub use tls::{MtlsBundle, TlsContext};
pub use tunnel::{relay, Direction, RelaySummary};
