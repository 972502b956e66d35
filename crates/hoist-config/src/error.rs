use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ホームディレクトリが見つかりません")]
    HomeDirNotFound,

    #[error(
        "設定ファイルが見つかりません。以下の場所を確認してください:\n\
        - ./.hoist.yaml\n\
        - ~/.hoist.yaml\n\
        - ~/.config/hoist/config.yaml\n\
        --config オプションまたは HOIST_CONFIG 環境変数で直接指定できます。\n\
        `hoist config init --save` で雛形を作成できます"
    )]
    ConfigNotFound,

    #[error("指定された設定ファイルが存在しません: {0}")]
    ExplicitNotFound(PathBuf),

    #[error("設定ファイルは既に存在します: {0}")]
    AlreadyExists(PathBuf),

    #[error("エディタの起動に失敗しました ({editor}): {message}")]
    Editor { editor: String, message: String },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
