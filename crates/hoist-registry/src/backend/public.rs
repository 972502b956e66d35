//! 匿名レジストリ（設定に無いもの）

use super::{RegistryBackend, RegistryKind};
use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::image::DEFAULT_TAG;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct PublicRegistry {
    name: String,
}

impl PublicRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl RegistryBackend for PublicRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::Public
    }

    async fn create_repo_if_not_exists(&self, _repo: &str) -> Result<()> {
        Ok(())
    }

    async fn domain_prefix(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn host(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        Ok(Credentials::anonymous())
    }

    async fn latest_tag(&self, _repo: &str) -> Result<String> {
        Ok(DEFAULT_TAG.to_string())
    }

    async fn matches_image(&self, _image: &str) -> bool {
        false
    }

    fn verify(&self) -> Result<()> {
        Err(RegistryError::UnknownRegistry)
    }
}
