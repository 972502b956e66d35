//! Alibaba Cloud Container Registry（個人版）

use super::{RegistryBackend, RegistryKind, require_fields};
use crate::acs::{self, AcsClient};
use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::model::AliCloudConfig;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AliCloudRegistry {
    name: String,
    config: AliCloudConfig,
}

impl AliCloudRegistry {
    pub fn new(name: impl Into<String>, config: AliCloudConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// 名前空間のパブリック・VPC・内部アドレス
    pub fn namespace_domains(&self) -> [String; 3] {
        let (region, ns) = (&self.config.region, &self.config.namespace);
        [
            format!("registry.{}.aliyuncs.com/{}", region, ns),
            format!("registry-vpc.{}.aliyuncs.com/{}", region, ns),
            format!("registry-internal.{}.aliyuncs.com/{}", region, ns),
        ]
    }

    fn registry_host(&self) -> String {
        format!("registry.{}.aliyuncs.com", self.config.region)
    }

    fn prefix(&self) -> String {
        format!("{}/{}", self.registry_host(), self.config.namespace)
    }

    fn client(&self, operation: &str) -> Result<AcsClient> {
        if !self.config.has_access_key() {
            return Err(RegistryError::auth(
                &self.name,
                operation,
                "access_key and secret_access_key are required",
            ));
        }
        let endpoint = self
            .config
            .endpoint
            .clone()
            .unwrap_or_else(|| acs::default_endpoint(&self.config.region));
        Ok(AcsClient::new(
            &self.name,
            endpoint,
            &self.config.region,
            &self.config.access_key,
            &self.config.secret_access_key,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    data: TokenData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenData {
    authorization_token: String,
    temp_user_name: String,
}

#[derive(Debug, Deserialize)]
struct RepoTagsResponse {
    data: RepoTagsData,
}

#[derive(Debug, Deserialize)]
struct RepoTagsData {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    tags: Vec<RepoTag>,
}

#[derive(Debug, Deserialize)]
struct RepoTag {
    tag: String,
}

#[async_trait]
impl RegistryBackend for AliCloudRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::AliCloud
    }

    async fn create_repo_if_not_exists(&self, _repo: &str) -> Result<()> {
        // リポジトリは初回プッシュ時に作られる
        Ok(())
    }

    async fn domain_prefix(&self) -> Result<String> {
        Ok(self.prefix())
    }

    async fn host(&self) -> Result<String> {
        Ok(self.registry_host())
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        if self.config.has_static_credentials() {
            return Ok(Credentials::new(
                self.prefix(),
                &self.config.username,
                &self.config.password,
            ));
        }

        let operation = "GetAuthorizationToken";
        let response: TokenResponse = self
            .client(operation)?
            .roa_get(operation, "/tokens")
            .await
            .map_err(RegistryError::into_auth)?;

        tracing::debug!(registry = %self.name, user = %response.data.temp_user_name, "obtained temporary token");
        Ok(Credentials::new(
            self.prefix(),
            response.data.temp_user_name,
            response.data.authorization_token,
        ))
    }

    async fn latest_tag(&self, repo: &str) -> Result<String> {
        let operation = "GetRepoTags";
        let path = format!("/repos/{}/{}/tags", self.config.namespace, repo);
        let response: RepoTagsResponse = self.client(operation)?.roa_get(operation, &path).await?;

        if response.data.total == 0 {
            return Err(RegistryError::RepoHasNoImage {
                registry: self.name.clone(),
                repo: repo.to_string(),
            });
        }
        response
            .data
            .tags
            .into_iter()
            .next()
            .map(|t| t.tag)
            .ok_or_else(|| RegistryError::ImageHasNoTag {
                registry: self.name.clone(),
                repo: repo.to_string(),
            })
    }

    async fn matches_image(&self, image: &str) -> bool {
        // `ns` が `ns1` のイメージを拾わないこと
        self.namespace_domains()
            .iter()
            .any(|prefix| image.starts_with(&format!("{}/", prefix)))
    }

    fn verify(&self) -> Result<()> {
        verify_alicloud(&self.name, &self.config)
    }
}

/// リージョン、名前空間、揃った認証情報の組が1つ必要
pub(crate) fn verify_alicloud(name: &str, config: &AliCloudConfig) -> Result<()> {
    require_fields(
        name,
        &[
            ("region", config.region.as_str()),
            ("namespace", config.namespace.as_str()),
        ],
    )?;
    if !config.has_static_credentials() && !config.has_access_key() {
        return Err(RegistryError::Config(format!(
            "{}: neither username and password nor access_key and secret_access_key are specified",
            name
        )));
    }
    Ok(())
}
