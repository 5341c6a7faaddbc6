use crate::config::{host_of, Mode};
use crate::error::{ProxyError, Result};
use crate::material::TlsMaterial;
use anyhow::Context;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_rustls::rustls;

/// 唯一允许协商的协议版本
pub static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// 进程内唯一的 TLS 上下文，构建后只读共享
#[derive(Debug, Clone)]
pub enum TlsContext {
    /// 客户端模式：出站拨号时出示本地证书并验证服务器
    Client {
        config: Arc<rustls::ClientConfig>,
        /// 期望的服务器名称，为空时使用拨号地址的主机部分
        server_name: Option<String>,
    },
    /// 服务器模式：入站握手时强制验证客户端证书
    Server { config: Arc<rustls::ServerConfig> },
}

impl TlsContext {
    /// 从原始 PEM 材料构建 mTLS 上下文
    ///
    /// 证书与私钥必须配对，CA 至少包含一张可用证书；否则返回配置错误
    pub fn build(material: &TlsMaterial, mode: Mode, expected_peer_name: &str) -> Result<Self> {
        let certs = parse_certificates(&material.certificate_pem)?;
        let key = parse_private_key(&material.private_key_pem)?;
        let roots = parse_ca_bundle(&material.ca_bundle_pem)?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        check_key_pair(&provider, &certs, &key)?;

        match mode {
            Mode::Client => {
                let config = rustls::ClientConfig::builder_with_provider(provider)
                    .with_protocol_versions(PROTOCOL_VERSIONS)?
                    .with_root_certificates(roots)
                    .with_client_auth_cert(certs, key)?;

                let server_name = Some(expected_peer_name.trim())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string);

                Ok(Self::Client {
                    config: Arc::new(config),
                    server_name,
                })
            }
            Mode::Server => {
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider.clone())
                        .build()
                        .map_err(|e| {
                            ProxyError::config(format!("can not build client verifier; {}", e))
                        })?;

                let config = rustls::ServerConfig::builder_with_provider(provider)
                    .with_protocol_versions(PROTOCOL_VERSIONS)?
                    .with_client_cert_verifier(verifier)
                    .with_single_cert(certs, key)?;

                Ok(Self::Server {
                    config: Arc::new(config),
                })
            }
        }
    }

    /// 该上下文服务的运行模式
    pub fn mode(&self) -> Mode {
        match self {
            Self::Client { .. } => Mode::Client,
            Self::Server { .. } => Mode::Server,
        }
    }

    /// 计算出站握手使用的 SNI / 证书校验名称
    pub fn server_name_for(&self, peer_addr: &str) -> Result<ServerName<'static>> {
        let name = match self {
            Self::Client {
                server_name: Some(name),
                ..
            } => name.as_str(),
            _ => host_of(peer_addr),
        };

        ServerName::try_from(name.to_string())
            .map_err(|e| ProxyError::config(format!("invalid server name '{}': {}", name, e)))
    }
}

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::config(format!("can not parse certificate; {}", e)))?;

    if certs.is_empty() {
        return Err(ProxyError::config("can not load x509 key pair; no certificate found"));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ProxyError::config(format!("can not parse private key; {}", e)))?
        .ok_or_else(|| ProxyError::config("can not load x509 key pair; no private key found"))
}

fn parse_ca_bundle(pem: &[u8]) -> Result<rustls::RootCertStore> {
    let mut reader = pem;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|cert| cert.ok())
        .collect();

    let mut roots = rustls::RootCertStore::empty();
    let (added, _ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(ProxyError::config("can not load ca"));
    }
    Ok(roots)
}

/// 确认私钥与证书链首张证书的公钥一致
fn check_key_pair(
    provider: &CryptoProvider,
    certs: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<()> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|e| ProxyError::config(format!("can not load x509 key pair; {}", e)))?;

    let certified = rustls::sign::CertifiedKey::new(certs.to_vec(), signing_key);
    match certified.keys_match() {
        Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(ProxyError::config(format!(
            "can not load x509 key pair; {}",
            e
        ))),
    }
}

/// 一套互信的 mTLS 证书：CA + 由其签发的服务器证书和客户端证书
#[derive(Clone)]
pub struct MtlsBundle {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
}

impl MtlsBundle {
    /// 生成新的 CA 及两张叶子证书
    pub fn generate(
        ca_name: &str,
        server_names: &[String],
        client_name: &str,
    ) -> anyhow::Result<Self> {
        // rcgen 至少需要一个 SAN
        let server_names: Vec<String> = if server_names.is_empty() {
            vec!["localhost".to_string(), "127.0.0.1".to_string()]
        } else {
            server_names.to_vec()
        };

        let ca_key = KeyPair::generate().context("Failed to generate CA key")?;
        let mut ca_params =
            CertificateParams::new(Vec::<String>::new()).context("Invalid CA parameters")?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.distinguished_name = common_name(ca_name);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params
            .self_signed(&ca_key)
            .context("Failed to self-sign CA certificate")?;
        let issuer = Issuer::from_params(&ca_params, &ca_key);

        let issue_leaf = |names: Vec<String>,
                          cn: &str,
                          usage: ExtendedKeyUsagePurpose|
         -> anyhow::Result<(String, String)> {
            let key = KeyPair::generate().context("Failed to generate leaf key")?;
            let mut params = CertificateParams::new(names).context("Invalid certificate names")?;
            params.distinguished_name = common_name(cn);
            params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
            params.extended_key_usages = vec![usage];

            let cert = params
                .signed_by(&key, &issuer)
                .context("Failed to sign leaf certificate")?;
            Ok((cert.pem(), key.serialize_pem()))
        };

        let (server_cert_pem, server_key_pem) = issue_leaf(
            server_names.clone(),
            &server_names[0],
            ExtendedKeyUsagePurpose::ServerAuth,
        )?;
        let (client_cert_pem, client_key_pem) = issue_leaf(
            vec![client_name.to_string()],
            client_name,
            ExtendedKeyUsagePurpose::ClientAuth,
        )?;

        Ok(Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem,
            server_key_pem,
            client_cert_pem,
            client_key_pem,
        })
    }

    /// 服务器模式使用的材料
    pub fn server_material(&self) -> TlsMaterial {
        TlsMaterial::from_pem(
            self.server_cert_pem.as_bytes(),
            self.server_key_pem.as_bytes(),
            self.ca_cert_pem.as_bytes(),
        )
    }

    /// 客户端模式使用的材料
    pub fn client_material(&self) -> TlsMaterial {
        TlsMaterial::from_pem(
            self.client_cert_pem.as_bytes(),
            self.client_key_pem.as_bytes(),
            self.ca_cert_pem.as_bytes(),
        )
    }

    /// 写入目录，私钥文件权限为 0600
    pub fn write_to(&self, dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {:?}", dir))?;

        let files = [
            ("ca.pem", &self.ca_cert_pem, false),
            ("server.pem", &self.server_cert_pem, false),
            ("server-key.pem", &self.server_key_pem, true),
            ("client.pem", &self.client_cert_pem, false),
            ("client-key.pem", &self.client_key_pem, true),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, content, secret) in files {
            let path = dir.join(name);
            write_pem(&path, content, secret)
                .with_context(|| format!("Failed to write {:?}", path))?;
            written.push(path);
        }
        Ok(written)
    }
}

fn common_name(name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(name.to_string()));
    dn
}

fn write_pem(path: &Path, content: &str, secret: bool) -> std::io::Result<()> {
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = secret;

    let mut file = options.open(path)?;
    // mode() 只在创建时生效，覆盖已有文件时需要显式收紧权限
    #[cfg(unix)]
    if secret {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(content.as_bytes())
}
