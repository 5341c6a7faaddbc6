// Common utilities for integration tests

use mtls_proxy::{Mode, MtlsBundle, Proxy, ProxyConfig, TlsMaterial};
use std::net::{SocketAddr, TcpListener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Generate a fresh CA with server/client leaves for testing
pub fn generate_test_bundle() -> MtlsBundle {
    MtlsBundle::generate(
        "mtls-proxy test CA",
        &["localhost".to_string(), "127.0.0.1".to_string()],
        "mtls-proxy-client",
    )
    .expect("Failed to generate test certificates")
}

/// Create a simple echo server for testing
pub async fn start_echo_server() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) => break, // Connection closed
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
            });
        }
    });

    (addr, accepted)
}

/// Start a proxy on an ephemeral local port
pub async fn start_proxy(
    mode: Mode,
    peer_addr: SocketAddr,
    material: &TlsMaterial,
) -> (SocketAddr, JoinHandle<mtls_proxy::Result<()>>) {
    let config = ProxyConfig {
        mode,
        listen_addr: "127.0.0.1:0".to_string(),
        peer_addr: peer_addr.to_string(),
        peer_server_name: String::new(),
    };

    let proxy = Proxy::from_material(config, material).expect("Failed to build proxy");
    let bound = proxy.bind().await.expect("Failed to bind proxy");
    let addr = bound.local_addr();
    (addr, tokio::spawn(bound.serve()))
}

/// Start a server-mode proxy in front of `backend` and a client-mode proxy in front of it
pub async fn start_tunnel_pair(
    bundle: &MtlsBundle,
    backend: SocketAddr,
) -> (SocketAddr, Vec<JoinHandle<mtls_proxy::Result<()>>>) {
    let (server_addr, server) = start_proxy(Mode::Server, backend, &bundle.server_material()).await;
    let (client_addr, client) =
        start_proxy(Mode::Client, server_addr, &bundle.client_material()).await;
    (client_addr, vec![server, client])
}

fn tls12_only() -> rustls::ConfigBuilder<rustls::ClientConfig, rustls::WantsVerifier> {
    rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS12])
    .expect("TLS 1.2 not supported by provider")
}

/// TLS 1.2-only connector presenting the bundle's (otherwise valid) client certificate
pub fn tls12_client_connector(bundle: &MtlsBundle) -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut bundle.ca_cert_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let certs = rustls_pemfile::certs(&mut bundle.client_cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut bundle.client_key_pem.as_bytes())
        .unwrap()
        .expect("client key missing");

    let config = tls12_only()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .expect("Failed to build TLS 1.2 client config");
    TlsConnector::from(Arc::new(config))
}

/// Start a TLS 1.2-only server using the bundle's server certificate;
/// returns the number of completed handshakes
pub async fn start_tls12_server(bundle: &MtlsBundle) -> (SocketAddr, Arc<AtomicUsize>) {
    let certs = rustls_pemfile::certs(&mut bundle.server_cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut bundle.server_key_pem.as_bytes())
        .unwrap()
        .expect("server key missing");
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_protocol_versions(&[&rustls::version::TLS12])
    .expect("TLS 1.2 not supported by provider")
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .expect("Failed to build TLS 1.2 server config");
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind TLS 1.2 server");
    let addr = listener.local_addr().unwrap();
    let handshakes = Arc::new(AtomicUsize::new(0));
    let counter = handshakes.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                if let Ok(mut tls) = acceptor.accept(socket).await {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tls.shutdown().await;
                }
            });
        }
    });

    (addr, handshakes)
}

/// Test data transmission through proxy
pub async fn test_proxy_connection(
    proxy_addr: SocketAddr,
    test_data: &[u8],
    timeout_duration: Duration,
) -> Result<Vec<u8>, String> {
    let result = timeout(timeout_duration, async {
        let mut stream = TcpStream::connect(proxy_addr)
            .await
            .map_err(|e| format!("Failed to connect to proxy: {}", e))?;

        stream
            .write_all(test_data)
            .await
            .map_err(|e| format!("Failed to write data: {}", e))?;

        let mut response = Vec::new();
        let mut buf = vec![0u8; 8192];

        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    response.extend_from_slice(&buf[..n]);
                    if response.len() >= test_data.len() {
                        break;
                    }
                }
                Err(e) => return Err(format!("Failed to read response: {}", e)),
            }
        }

        Ok(response)
    })
    .await
    .map_err(|_| "Timeout waiting for response".to_string())?;

    result
}

/// Cleanup function for test resources
pub struct TestCleanup {
    dir: Option<PathBuf>,
}

impl TestCleanup {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir: Some(dir) }
    }
}

impl Drop for TestCleanup {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Unique temporary directory for certificate files
pub fn temp_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    std::env::temp_dir().join(format!(
        "mtls-proxy-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ))
}
