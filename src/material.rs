/// TLS 证书材料加载
///
/// 证书、私钥与 CA 可以来自 PEM 文件，也可以是内联的 base64 文本。
/// 加载结果只在构建 TLS 上下文时使用一次
use crate::error::{ProxyError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

/// 单项材料的来源
#[derive(Clone, PartialEq, Eq)]
pub enum MaterialSource {
    /// PEM 文件路径
    File(PathBuf),
    /// base64 编码的 PEM 内容
    Inline(String),
}

impl fmt::Debug for MaterialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialSource::File(path) => f.debug_tuple("File").field(path).finish(),
            MaterialSource::Inline(text) => write!(f, "Inline(<{} chars>)", text.len()),
        }
    }
}

impl MaterialSource {
    /// 读取原始 PEM 字节
    pub fn read(&self, what: &str) -> Result<Vec<u8>> {
        match self {
            MaterialSource::File(path) => std::fs::read(path).map_err(|e| {
                ProxyError::config(format!("can not load {} file {:?}; {}", what, path, e))
            }),
            MaterialSource::Inline(encoded) => STANDARD.decode(encoded.trim()).map_err(|e| {
                ProxyError::config(format!("can not decode base64 {}; {}", what, e))
            }),
        }
    }
}

/// 三项材料的来源集合
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialSources {
    pub certificate: MaterialSource,
    pub private_key: MaterialSource,
    pub ca_bundle: MaterialSource,
}

impl MaterialSources {
    /// 读取全部材料
    pub fn load(&self) -> Result<TlsMaterial> {
        if let MaterialSource::File(path) = &self.private_key {
            check_key_file_permissions(path);
        }

        Ok(TlsMaterial {
            certificate_pem: self.certificate.read("cert")?,
            private_key_pem: self.private_key.read("key")?,
            ca_bundle_pem: self.ca_bundle.read("ca")?,
        })
    }
}

/// 原始 PEM 材料
#[derive(Clone)]
pub struct TlsMaterial {
    pub certificate_pem: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub ca_bundle_pem: Vec<u8>,
}

impl TlsMaterial {
    pub fn from_pem(
        certificate_pem: impl Into<Vec<u8>>,
        private_key_pem: impl Into<Vec<u8>>,
        ca_bundle_pem: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            certificate_pem: certificate_pem.into(),
            private_key_pem: private_key_pem.into(),
            ca_bundle_pem: ca_bundle_pem.into(),
        }
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("certificate_pem", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .field("ca_bundle_pem", &self.ca_bundle_pem.len())
            .finish()
    }
}

/// 检查私钥文件权限（仅Unix系统）
#[cfg(unix)]
pub fn check_key_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    let Ok(metadata) = std::fs::metadata(path) else {
        // 读取时会报告真正的错误
        return;
    };
    let mode = metadata.permissions().mode();

    // o+r / g+r
    if mode & 0o044 != 0 {
        warn!(
            "Private key file {:?} is readable by group or others (permissions: {:o}); \
             consider chmod 600",
            path,
            mode & 0o777
        );
    }
}

/// Windows系统不进行权限检查
#[cfg(not(unix))]
pub fn check_key_file_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn temp_file(content: &[u8]) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let path = std::env::temp_dir().join(format!(
            "mtls-proxy-material-{}-{}.pem",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_inline_source() {
        let source = MaterialSource::Inline(STANDARD.encode(b"-----BEGIN CERTIFICATE-----"));
        assert_eq!(source.read("cert").unwrap(), b"-----BEGIN CERTIFICATE-----");
    }

    #[test]
    fn test_inline_source_invalid_base64() {
        let source = MaterialSource::Inline("not base64 !!".to_string());
        let err = source.read("ca").unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("base64 ca"));
    }

    #[test]
    fn test_file_source() {
        let path = temp_file(b"pem bytes");
        let source = MaterialSource::File(path.clone());
        assert_eq!(source.read("cert").unwrap(), b"pem bytes");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file() {
        let source = MaterialSource::File(PathBuf::from("/nonexistent/mtls/key.pem"));
        let err = source.read("key").unwrap_err();
        assert!(err.to_string().contains("can not load key file"));
    }

    #[test]
    fn test_load_mixed_sources() {
        let cert = temp_file(b"cert");
        let sources = MaterialSources {
            certificate: MaterialSource::File(cert.clone()),
            private_key: MaterialSource::Inline(STANDARD.encode(b"key")),
            ca_bundle: MaterialSource::Inline(STANDARD.encode(b"ca")),
        };

        let material = sources.load().unwrap();
        assert_eq!(material.certificate_pem, b"cert");
        assert_eq!(material.private_key_pem, b"key");
        assert_eq!(material.ca_bundle_pem, b"ca");
        assert!(format!("{:?}", material).contains("<redacted>"));
        let _ = std::fs::remove_file(cert);
    }

    #[test]
    fn test_debug_hides_inline_key() {
        let source = MaterialSource::Inline("c2VjcmV0".to_string());
        assert_eq!(format!("{:?}", source), "Inline(<8 chars>)");
    }
}
