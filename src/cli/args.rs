use clap::{Args, Parser, Subcommand};

use crate::config::Settings;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "mtls-proxy")]
#[command(author, version, about = "Mutual-TLS tunneling proxy", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,

    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// 运行代理所需的参数；环境变量 MTLS_PROXY_* 会覆盖这里的值
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// TOML 配置文件路径（优先级最低）
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<String>,

    /// [MTLS_PROXY_MODE] run mtls proxy as 'client' or 'server' mode
    #[arg(long)]
    pub mode: Option<String>,

    /// [MTLS_PROXY_ADDR] tcp address
    #[arg(long)]
    pub addr: Option<String>,

    /// [MTLS_PROXY_CA] ca cert file
    #[arg(long, value_name = "PATH")]
    pub ca: Option<String>,

    /// [MTLS_PROXY_CERT] cert file
    #[arg(long, value_name = "PATH")]
    pub cert: Option<String>,

    /// [MTLS_PROXY_KEY] key file
    #[arg(long, value_name = "PATH")]
    pub key: Option<String>,

    /// [MTLS_PROXY_SERVER_ADDR] server address
    #[arg(long)]
    pub server_addr: Option<String>,

    /// [MTLS_PROXY_SERVER_NAME] server name
    #[arg(long)]
    pub server_name: Option<String>,
}

impl RunArgs {
    /// 命令行参数层
    pub fn to_settings(&self) -> Settings {
        Settings {
            mode: self.mode.clone(),
            addr: self.addr.clone(),
            ca: self.ca.clone(),
            cert: self.cert.clone(),
            key: self.key.clone(),
            server_addr: self.server_addr.clone(),
            server_name: self.server_name.clone(),
            ..Default::default()
        }
    }

    /// 叠加全部配置层：配置文件 < 命令行 < 环境变量
    pub fn layered_settings<F>(&self, env: F) -> Result<Settings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match &self.config {
            Some(path) => Settings::from_file(path)?,
            None => Settings::default(),
        };

        Ok(file
            .overlay(self.to_settings())
            .overlay(Settings::from_env(env)))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成一套 mTLS 证书（CA、服务器证书、客户端证书）
    Cert {
        /// 输出目录
        #[arg(short, long, default_value = ".")]
        out_dir: String,

        /// CA 的 Common Name
        #[arg(long, default_value = "mtls-proxy CA")]
        ca_name: String,

        /// 服务器证书的 SubjectAltName（用逗号分隔多个）
        #[arg(
            long,
            value_delimiter = ',',
            value_name = "DNS,...",
            default_values = ["localhost", "127.0.0.1"]
        )]
        server_names: Vec<String>,

        /// 客户端证书的 Common Name
        #[arg(long, default_value = "mtls-proxy-client")]
        client_name: String,
    },
    /// 检查配置与证书材料，不打开任何套接字
    Check {
        #[command(flatten)]
        run: RunArgs,
    },
}
