//! Docker Hub と Docker Hub 互換レジストリ

use super::{RegistryBackend, RegistryKind};
use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::image::DEFAULT_TAG;
use crate::model::DockerHubConfig;
use async_trait::async_trait;

/// Docker Hub の認証情報としてエンジンが参照するアドレス
pub const DOCKER_HUB_AUTH_ADDRESS: &str = "https://index.docker.io/v1/";

/// Docker Hub のレジストリ API のホスト
pub const DOCKER_HUB_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Clone)]
pub struct DockerHubRegistry {
    name: String,
    config: DockerHubConfig,
}

impl DockerHubRegistry {
    pub fn new(name: impl Into<String>, config: DockerHubConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn prefix(&self) -> String {
        let cfg = &self.config;
        if cfg.server.is_empty() {
            cfg.username.clone()
        } else if cfg.namespace.is_empty() {
            cfg.server.clone()
        } else {
            format!("{}/{}", cfg.server, cfg.namespace)
        }
    }
}

#[async_trait]
impl RegistryBackend for DockerHubRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::DockerHub
    }

    async fn create_repo_if_not_exists(&self, _repo: &str) -> Result<()> {
        Ok(())
    }

    async fn domain_prefix(&self) -> Result<String> {
        Ok(self.prefix())
    }

    async fn host(&self) -> Result<String> {
        if self.config.server.is_empty() {
            Ok(DOCKER_HUB_HOST.to_string())
        } else {
            Ok(self.config.server.clone())
        }
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        let address = if self.config.server.is_empty() {
            DOCKER_HUB_AUTH_ADDRESS
        } else {
            self.config.server.as_str()
        };
        Ok(Credentials::new(
            address,
            &self.config.username,
            &self.config.password,
        ))
    }

    async fn latest_tag(&self, _repo: &str) -> Result<String> {
        Ok(DEFAULT_TAG.to_string())
    }

    async fn matches_image(&self, image: &str) -> bool {
        let cfg = &self.config;
        if cfg.server.is_empty() {
            if cfg.username.is_empty() {
                return false;
            }
            let user = format!("{}/", cfg.username);
            let qualified = format!("docker.io/{}/", cfg.username);
            image.starts_with(&user) || image.starts_with(&qualified)
        } else {
            image.starts_with(&self.prefix())
        }
    }

    fn verify(&self) -> Result<()> {
        if self.config.username.is_empty() || self.config.password.is_empty() {
            return Err(RegistryError::Config(format!(
                "{}: empty username or password",
                self.name
            )));
        }
        Ok(())
    }
}
