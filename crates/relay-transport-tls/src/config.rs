use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use relay_core::{PipelineError, Result};
use rustls::{
    ClientConfig, RootCertStore, ServerConfig,
    crypto::{CryptoProvider, ring},
    pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject},
};
use serde::{Deserialize, Serialize};

use crate::error::{CONFIGURE, TlsError};

/// 节点在握手中扮演的角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRole {
    Server,
    Client,
}

impl fmt::Display for TlsRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsRole::Server => f.write_str("server"),
            TlsRole::Client => f.write_str("client"),
        }
    }
}

/// 已装配好的 rustls 配置，角色由变体决定。
///
/// 证书链、私钥与信任锚对节点是不透明的；节点只在 `Allocate` 阶段用它创建连接引擎。
#[derive(Clone)]
pub enum TlsCredentials {
    Server(Arc<ServerConfig>),
    Client(Arc<ClientConfig>),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

impl TlsCredentials {
    /// 以证书链与私钥构造服务端配置，不校验客户端证书。
    pub fn server(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let config = ServerConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|err| TlsError::engine(CONFIGURE, err))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|err| TlsError::engine(CONFIGURE, err))?;
        Ok(TlsCredentials::Server(Arc::new(config)))
    }

    /// 以给定信任锚构造客户端配置。
    pub fn client(
        anchors: impl IntoIterator<Item = CertificateDer<'static>>,
    ) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for anchor in anchors {
            roots
                .add(anchor)
                .map_err(|err| TlsError::engine(CONFIGURE, err))?;
        }
        if roots.is_empty() {
            return Err(TlsError::Settings(
                "a client needs at least one trust anchor".to_owned(),
            ));
        }
        let config = ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()
            .map_err(|err| TlsError::engine(CONFIGURE, err))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(TlsCredentials::Client(Arc::new(config)))
    }

    pub fn server_from_pem_files(
        chain: impl AsRef<Path>,
        key: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        let chain = load_certificates(chain.as_ref(), "certificate chain")?;
        let key_path = key.as_ref();
        let key = PrivateKeyDer::from_pem_file(key_path).map_err(|source| match source {
            rustls::pki_types::pem::Error::NoItemsFound => TlsError::MissingPem {
                what: "private key",
                path: key_path.to_path_buf(),
            },
            source => TlsError::Pem {
                what: "private key",
                path: key_path.to_path_buf(),
                source,
            },
        })?;
        Self::server(chain, key)
    }

    pub fn client_from_pem_file(anchors: impl AsRef<Path>) -> Result<Self, TlsError> {
        Self::client(load_certificates(anchors.as_ref(), "trust anchors")?)
    }

    pub fn role(&self) -> TlsRole {
        match self {
            TlsCredentials::Server(_) => TlsRole::Server,
            TlsCredentials::Client(_) => TlsRole::Client,
        }
    }
}

impl fmt::Debug for TlsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TlsCredentials").field(&self.role()).finish()
    }
}

fn load_certificates(
    path: &Path,
    what: &'static str,
) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem_error = |source| TlsError::Pem {
        what,
        path: path.to_path_buf(),
        source,
    };
    let certificates = CertificateDer::pem_file_iter(path)
        .map_err(pem_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error)?;
    if certificates.is_empty() {
        return Err(TlsError::MissingPem {
            what,
            path: path.to_path_buf(),
        });
    }
    Ok(certificates)
}

const DEFAULT_PLAINTEXT_CAPACITY: usize = 16 * 1024;

/// TLS 节点的完整配置。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 角色由 [`TlsCredentials`] 的变体决定；客户端必须给出 `server_name`，用于 SNI 与证书校验；
/// - `validate_on_handshake` 为真时，握手完成即调用 `Pipeline::validate`，默认关闭；
/// - `plaintext_capacity` 同时决定入站明文累积区与出站明文暂存区的容量。
#[derive(Clone, Debug)]
pub struct TlsNodeConfig {
    pub credentials: TlsCredentials,
    pub validate_on_handshake: bool,
    pub server_name: Option<String>,
    pub plaintext_capacity: usize,
}

impl TlsNodeConfig {
    pub fn new(credentials: TlsCredentials) -> Self {
        Self {
            credentials,
            validate_on_handshake: false,
            server_name: None,
            plaintext_capacity: DEFAULT_PLAINTEXT_CAPACITY,
        }
    }

    pub fn with_validate_on_handshake(mut self, validate: bool) -> Self {
        self.validate_on_handshake = validate;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn with_plaintext_capacity(mut self, capacity: usize) -> Self {
        self.plaintext_capacity = capacity;
        self
    }

    pub fn role(&self) -> TlsRole {
        self.credentials.role()
    }

    pub fn validate(&self) -> Result<(), TlsError> {
        if self.plaintext_capacity == 0 {
            return Err(TlsError::Settings(
                "plaintext_capacity must be greater than zero".to_owned(),
            ));
        }
        if self.role() == TlsRole::Client
            && self.server_name.as_deref().is_none_or(|name| name.trim().is_empty())
        {
            return Err(TlsError::Settings(
                "a client node needs a server_name".to_owned(),
            ));
        }
        Ok(())
    }
}

/// 以文件路径描述 TLS 材料的可序列化配置。
///
/// ```toml
/// role = "server"
/// certificate_chain = "/etc/relay/server.pem"
/// private_key = "/etc/relay/server.key"
/// validate_on_handshake = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsPemConfig {
    pub role: TlsRole,
    #[serde(default)]
    pub certificate_chain: Option<PathBuf>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub trust_anchors: Option<PathBuf>,
    #[serde(default)]
    pub server_name: Option<String>,
    #[serde(default)]
    pub validate_on_handshake: bool,
    #[serde(default = "default_plaintext_capacity")]
    pub plaintext_capacity: usize,
}

fn default_plaintext_capacity() -> usize {
    DEFAULT_PLAINTEXT_CAPACITY
}

impl TlsPemConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| PipelineError::Config(err.to_string()))
    }

    /// 读取 PEM 文件并装配节点配置。
    pub fn load(&self) -> Result<TlsNodeConfig, TlsError> {
        let required = |value: &Option<PathBuf>, field: &str| {
            value.clone().ok_or_else(|| {
                TlsError::Settings(format!("a {} node needs `{field}`", self.role))
            })
        };
        let credentials = match self.role {
            TlsRole::Server => TlsCredentials::server_from_pem_files(
                required(&self.certificate_chain, "certificate_chain")?,
                required(&self.private_key, "private_key")?,
            )?,
            TlsRole::Client => {
                TlsCredentials::client_from_pem_file(required(&self.trust_anchors, "trust_anchors")?)?
            }
        };
        let config = TlsNodeConfig {
            credentials,
            validate_on_handshake: self.validate_on_handshake,
            server_name: self.server_name.clone(),
            plaintext_capacity: self.plaintext_capacity,
        };
        config.validate()?;
        Ok(config)
    }
}
