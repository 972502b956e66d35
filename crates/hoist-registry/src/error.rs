//! レジストリのエラー型

use thiserror::Error;

/// レジストリ設定の読み込みや解決、バックエンドとの通信で起きるエラー
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid registry configuration: {0}")]
    Config(String),

    #[error("Ambiguous registry configuration: '{first}' and '{second}' both own {domain}")]
    AmbiguousRegistry {
        first: String,
        second: String,
        domain: String,
    },

    #[error("Registry not found: {0}")]
    RegistryNotFound(String),

    #[error("unknown registry")]
    UnknownRegistry,

    #[error("{registry}: {operation} failed: {message}")]
    Auth {
        registry: String,
        operation: String,
        message: String,
    },

    #[error("{registry}: {operation} failed: {message}")]
    Api {
        registry: String,
        operation: String,
        message: String,
    },

    #[error("{registry}: repo '{repo}' has no image")]
    RepoHasNoImage { registry: String, repo: String },

    #[error("{registry}: image '{repo}' has no tag")]
    ImageHasNoTag { registry: String, repo: String },

    #[error("Failed to decode registry config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RegistryError {
    pub(crate) fn auth(
        registry: impl Into<String>,
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Auth {
            registry: registry.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn api(
        registry: impl Into<String>,
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::Api {
            registry: registry.into(),
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// API の失敗を認証エラーとして付け替える
    pub(crate) fn into_auth(self) -> Self {
        match self {
            Self::Api {
                registry,
                operation,
                message,
            } => Self::Auth {
                registry,
                operation,
                message,
            },
            other => other,
        }
    }

    /// ネットワークアクセス前の設定エラーか
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::AmbiguousRegistry { .. }
                | Self::RegistryNotFound(_)
                | Self::UnknownRegistry
                | Self::Yaml(_)
        )
    }

    /// タグ一覧が空だったことによるエラーか
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RepoHasNoImage { .. } | Self::ImageHasNoTag { .. })
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
