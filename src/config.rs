// 配置解析 - 文件 < 命令行参数 < 环境变量，最终生成不可变的 ProxyConfig

use crate::error::{ProxyError, Result};
use crate::material::{MaterialSource, MaterialSources};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "MTLS_PROXY_";
/// 默认运行模式
pub const DEFAULT_MODE: &str = "client";
/// 默认监听地址
pub const DEFAULT_ADDR: &str = ":3000";

/// 运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// 本地明文监听，经 mTLS 拨号到对端
    Client,
    /// 监听并终结 mTLS，明文拨号到后端
    Server,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Client => write!(f, "client"),
            Mode::Server => write!(f, "server"),
        }
    }
}

impl FromStr for Mode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            _ => Err(ProxyError::config(format!(
                "invalid mode '{}': expected 'client' or 'server'",
                s
            ))),
        }
    }
}

/// 代理运行配置，解析完成后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub mode: Mode,
    /// 本地监听地址
    pub listen_addr: String,
    /// 每条隧道需要拨号的对端地址
    pub peer_addr: String,
    /// 客户端模式下期望的对端证书名称（为空时取 peer_addr 的主机部分）
    pub peer_server_name: String,
}

/// 解析结果：运行配置 + 证书材料来源
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub proxy: ProxyConfig,
    pub material: MaterialSources,
}

/// 未解析的配置层
///
/// 每个来源（TOML 文件、命令行、环境变量）各产生一层，通过 [`Settings::overlay`] 叠加
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub mode: Option<String>,
    pub addr: Option<String>,
    pub ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub server_addr: Option<String>,
    pub server_name: Option<String>,
    pub ca_base64: Option<String>,
    pub cert_base64: Option<String>,
    pub key_base64: Option<String>,
}

impl Settings {
    /// 从 TOML 文件加载配置层
    pub fn from_file(path: &str) -> Result<Self> {
        let path = expand_path(path);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ProxyError::config(format!("can not read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// 解析 TOML 文本
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ProxyError::config(format!("can not parse config file: {}", e)))
    }

    /// 从环境变量构建配置层；空值视为未设置
    ///
    /// `lookup` 通常是 `|k| std::env::var(k).ok()`，测试中可以替换
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        Self {
            mode: var("MODE"),
            addr: var("ADDR"),
            ca: var("CA"),
            cert: var("CERT"),
            key: var("KEY"),
            server_addr: var("SERVER_ADDR"),
            server_name: var("SERVER_NAME"),
            ca_base64: var("CA_BASE64"),
            cert_base64: var("CERT_BASE64"),
            key_base64: var("KEY_BASE64"),
        }
    }

    /// 用 `upper` 中已设置的字段覆盖当前层
    pub fn overlay(self, upper: Settings) -> Settings {
        Settings {
            mode: upper.mode.or(self.mode),
            addr: upper.addr.or(self.addr),
            ca: upper.ca.or(self.ca),
            cert: upper.cert.or(self.cert),
            key: upper.key.or(self.key),
            server_addr: upper.server_addr.or(self.server_addr),
            server_name: upper.server_name.or(self.server_name),
            ca_base64: upper.ca_base64.or(self.ca_base64),
            cert_base64: upper.cert_base64.or(self.cert_base64),
            key_base64: upper.key_base64.or(self.key_base64),
        }
    }

    /// 生成最终配置；任何错误都发生在打开套接字之前
    pub fn resolve(self) -> Result<ResolvedConfig> {
        let mode: Mode = self.mode.as_deref().unwrap_or(DEFAULT_MODE).parse()?;

        let server_addr = self
            .server_addr
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProxyError::config("-server-addr required"))?;

        let addr = self.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        if addr.trim().is_empty() {
            return Err(ProxyError::config("listen address cannot be empty"));
        }

        let material = MaterialSources {
            certificate: pick_source(self.cert_base64, self.cert, "certificate", "CERT")?,
            private_key: pick_source(self.key_base64, self.key, "private key", "KEY")?,
            ca_bundle: pick_source(self.ca_base64, self.ca, "CA bundle", "CA")?,
        };

        Ok(ResolvedConfig {
            proxy: ProxyConfig {
                mode,
                listen_addr: normalize_listen_addr(&addr),
                peer_addr: normalize_peer_addr(&server_addr),
                peer_server_name: self.server_name.unwrap_or_default(),
            },
            material,
        })
    }
}

/// 内联 base64 优先于文件路径
fn pick_source(
    inline: Option<String>,
    path: Option<String>,
    what: &str,
    env_name: &str,
) -> Result<MaterialSource> {
    match (inline, path) {
        (Some(encoded), _) => Ok(MaterialSource::Inline(encoded)),
        (None, Some(path)) if !path.trim().is_empty() => {
            Ok(MaterialSource::File(PathBuf::from(expand_path(&path))))
        }
        _ => Err(ProxyError::config(format!(
            "{} required: set -{} or {}{}_BASE64",
            what,
            env_name.to_lowercase(),
            ENV_PREFIX,
            env_name
        ))),
    }
}

/// Expand path with tilde (~)
pub fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

/// `:3000` 形式表示监听所有接口
pub fn normalize_listen_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    }
}

/// `:9000` 形式的对端地址指向本机
pub fn normalize_peer_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("127.0.0.1:{}", port),
        None => addr.to_string(),
    }
}

/// 取地址中的主机部分，去掉端口与 IPv6 方括号
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}
