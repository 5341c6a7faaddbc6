// 传输层工厂 - 根据运行模式组合入站/出站传输

use crate::config::{Mode, ProxyConfig};
use crate::error::{ProxyError, Result};
use crate::tls::TlsContext;
use crate::transport::{Inbound, Outbound, PlainInbound, PlainOutbound, TlsInbound, TlsOutbound};
use std::sync::Arc;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// 一种运行模式对应的 (入站, 出站) 组合
#[derive(Clone)]
pub struct Topology {
    pub inbound: Arc<dyn Inbound>,
    pub outbound: Arc<dyn Outbound>,
}

/// 按模式组合传输层
///
/// - client: 明文入站 + mTLS 出站
/// - server: mTLS 入站 + 明文出站
pub fn create_topology(config: &ProxyConfig, tls: &TlsContext) -> Result<Topology> {
    let topology = match (config.mode, tls) {
        (Mode::Client, TlsContext::Client { config: client, .. }) => {
            let server_name = tls.server_name_for(&config.peer_addr)?;
            Topology {
                inbound: Arc::new(PlainInbound),
                outbound: Arc::new(TlsOutbound::new(
                    config.peer_addr.clone(),
                    server_name,
                    TlsConnector::from(client.clone()),
                )),
            }
        }
        (Mode::Server, TlsContext::Server { config: server }) => Topology {
            inbound: Arc::new(TlsInbound::new(TlsAcceptor::from(server.clone()))),
            outbound: Arc::new(PlainOutbound::new(config.peer_addr.clone())),
        },
        (mode, _) => {
            return Err(ProxyError::config(format!(
                "TLS context was built for {} mode but proxy runs in {} mode",
                tls.mode(),
                mode
            )))
        }
    };

    Ok(topology)
}
