use std::{fmt, io, path::PathBuf};

use relay_core::PipelineError;
use rustls::Error as RustlsError;
use thiserror::Error;

/// 描述一次 TLS 操作的错误码及默认文案。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 记录层失败统一携带稳定错误码，日志与测试据此区分握手、解密与加密阶段，而无需解析 rustls 文案。
///
/// ## 契约（What）
/// - 引擎与 IO 错误在进入 Pipeline 时映射为 [`PipelineError::Protocol`]，迫使 Pipeline 进入 `Invalid`；
/// - 证书、私钥与服务名等装配错误映射为 [`PipelineError::Config`]。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsOperation {
    pub code: &'static str,
    pub message: &'static str,
}

impl fmt::Display for TlsOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message)
    }
}

pub(crate) const HANDSHAKE: TlsOperation = TlsOperation {
    code: "relay.transport.tls.handshake_failed",
    message: "tls handshake",
};

pub(crate) const READ: TlsOperation = TlsOperation {
    code: "relay.transport.tls.read_failed",
    message: "tls read",
};

pub(crate) const WRITE: TlsOperation = TlsOperation {
    code: "relay.transport.tls.write_failed",
    message: "tls write",
};

pub(crate) const CONFIGURE: TlsOperation = TlsOperation {
    code: "relay.transport.tls.configure_failed",
    message: "tls configure",
};

/// TLS 节点与其配置加载过程中的错误。
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("{operation} failed: {source}")]
    Engine {
        operation: TlsOperation,
        #[source]
        source: RustlsError,
    },
    #[error("{operation} failed: {source}")]
    Io {
        operation: TlsOperation,
        #[source]
        source: io::Error,
    },
    #[error("failed to load {what} from `{}`: {source}", path.display())]
    Pem {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: rustls::pki_types::pem::Error,
    },
    #[error("no {what} found in `{}`", path.display())]
    MissingPem { what: &'static str, path: PathBuf },
    #[error("invalid server name `{0}`")]
    ServerName(String),
    #[error("invalid tls settings: {0}")]
    Settings(String),
    #[error("tls engine is not allocated")]
    NotAllocated,
}

impl TlsError {
    pub(crate) fn engine(operation: TlsOperation, source: RustlsError) -> Self {
        TlsError::Engine { operation, source }
    }

    pub(crate) fn io(operation: TlsOperation, source: io::Error) -> Self {
        TlsError::Io { operation, source }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            TlsError::Engine { operation, .. } | TlsError::Io { operation, .. } => operation.code,
            TlsError::Pem { .. } | TlsError::MissingPem { .. } => "relay.transport.tls.pem",
            TlsError::ServerName(_) => "relay.transport.tls.server_name",
            TlsError::Settings(_) => "relay.transport.tls.settings",
            TlsError::NotAllocated => "relay.transport.tls.not_allocated",
        }
    }

    /// 是否由对端发来的告警触发。
    pub fn is_peer_alert(&self) -> bool {
        matches!(
            self,
            TlsError::Engine {
                source: RustlsError::AlertReceived(_),
                ..
            }
        )
    }

    fn is_configuration(&self) -> bool {
        matches!(
            self,
            TlsError::Pem { .. }
                | TlsError::MissingPem { .. }
                | TlsError::ServerName(_)
                | TlsError::Settings(_)
        ) || matches!(self, TlsError::Engine { operation, .. } if *operation == CONFIGURE)
    }
}

impl From<TlsError> for PipelineError {
    fn from(err: TlsError) -> Self {
        if err.is_configuration() {
            PipelineError::Config(err.to_string())
        } else {
            PipelineError::protocol_with(err.code(), err)
        }
    }
}
