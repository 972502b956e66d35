//! レジストリの認証情報

use serde::{Deserialize, Serialize};
use std::fmt;

/// レジストリホスト1つ分のユーザー名とシークレット
///
/// どちらも空なら匿名アクセス。
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// 認証情報が有効なアドレス（例: `https://index.docker.io/v1/`）
    #[serde(rename = "serveraddress", default, skip_serializing_if = "String::is_empty")]
    pub server_address: String,

    #[serde(default)]
    pub username: String,

    #[serde(rename = "password", default)]
    pub secret: String,
}

impl Credentials {
    pub fn new(
        server_address: impl Into<String>,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            server_address: server_address.into(),
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// 空の認証情報（パブリックイメージ用）
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.secret.is_empty()
    }
}

// secret は出力しない
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("server_address", &self.server_address)
            .field("username", &self.username)
            .field("secret", &if self.secret.is_empty() { "" } else { "***" })
            .finish()
    }
}
