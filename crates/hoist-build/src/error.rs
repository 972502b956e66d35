use hoist_registry::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Session transport error: {0}")]
    Transport(String),

    #[error("Failed to decode build output: {0}")]
    Decode(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Build cancelled")]
    Cancelled,

    #[error("Failed to push {image}: {message}")]
    PushFailed { image: String, message: String },

    #[error("Failed to pull {image}: {message}")]
    PullFailed { image: String, message: String },

    #[error("Invalid tag: {tag}")]
    InvalidTag { tag: String },

    #[error("Invalid build option: {0}")]
    InvalidOption(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. Dockerfileのパスを確認してください\n\
                     2. -f オプションで明示的に指定してください:\n\
                        hoist build -f path/to/Dockerfile",
                    path.display()
                )
            }
            BuildError::BuildFailed(msg) => {
                format!(
                    "ビルドに失敗しました: {}\n\
                     \n\
                     Dockerfileの内容を確認してください。",
                    msg
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     hoist build の PATH 引数を確認してください。",
                    path.display()
                )
            }
            BuildError::DockerConnection(e) => {
                format!(
                    "Dockerデーモンに接続できません: {}\n\
                     \n\
                     Dockerが起動しているか確認してください。",
                    e
                )
            }
            BuildError::Registry(e) if e.is_config_error() => {
                format!(
                    "レジストリ設定エラー: {}\n\
                     \n\
                     hoist config check で設定を確認してください。",
                    e
                )
            }
            BuildError::Registry(RegistryError::Auth { registry, .. }) => {
                format!(
                    "{}\n\
                     \n\
                     レジストリ '{}' の認証情報（access_key / password）を確認してください。",
                    self, registry
                )
            }
            BuildError::Cancelled => "ビルドがキャンセルされました".to_string(),
            _ => format!("{}", self),
        }
    }

    /// 呼び出し元のキャンセルによる終了か
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BuildError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
