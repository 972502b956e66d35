//! Alibaba Cloud Container Registry（企業版）

use super::alicloud::verify_alicloud;
use super::{RegistryBackend, RegistryKind};
use crate::acs::{self, AcsClient};
use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::model::AliCloudEeConfig;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::OnceCell;

#[derive(Debug)]
pub struct AliCloudEeRegistry {
    name: String,
    config: AliCloudEeConfig,
    /// インスタンスのインターネット向けエンドポイント（一度だけ取得）
    endpoints: OnceCell<Vec<Endpoint>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Endpoint {
    domain: String,
    #[serde(rename = "Type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RpcStatus {
    #[serde(default = "default_success")]
    is_success: bool,
    #[serde(default)]
    code: String,
}

fn default_success() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointResponse {
    #[serde(flatten)]
    status: RpcStatus,
    #[serde(default)]
    domains: Vec<Endpoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TokenResponse {
    #[serde(flatten)]
    status: RpcStatus,
    #[serde(default)]
    authorization_token: String,
    #[serde(default)]
    temp_username: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepositoryResponse {
    #[serde(flatten)]
    status: RpcStatus,
    #[serde(default)]
    repo_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepoTagsResponse {
    #[serde(flatten)]
    status: RpcStatus,
    #[serde(default)]
    total_count: String,
    #[serde(default)]
    images: Vec<TagImage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagImage {
    tag: String,
}

impl AliCloudEeRegistry {
    pub fn new(name: impl Into<String>, config: AliCloudEeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            endpoints: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn client(&self, operation: &str) -> Result<AcsClient> {
        let base = &self.config.base;
        if !base.has_access_key() {
            return Err(RegistryError::auth(
                &self.name,
                operation,
                "access_key and secret_access_key are required",
            ));
        }
        let endpoint = base
            .endpoint
            .clone()
            .unwrap_or_else(|| acs::default_endpoint(&base.region));
        Ok(AcsClient::new(
            &self.name,
            endpoint,
            &base.region,
            &base.access_key,
            &base.secret_access_key,
        ))
    }

    fn check(&self, operation: &str, status: &RpcStatus) -> Result<()> {
        if status.is_success {
            Ok(())
        } else {
            Err(RegistryError::api(
                &self.name,
                operation,
                format!("request was not successful ({})", status.code),
            ))
        }
    }

    async fn endpoints(&self) -> Result<&[Endpoint]> {
        let endpoints = self
            .endpoints
            .get_or_try_init(|| async {
                let operation = "GetInstanceEndpoint";
                let response: EndpointResponse = self
                    .client(operation)?
                    .rpc_get(
                        operation,
                        &[
                            ("InstanceId", self.config.instance_id.as_str()),
                            ("EndpointType", "internet"),
                            ("ModuleName", "Registry"),
                        ],
                    )
                    .await?;
                self.check(operation, &response.status)?;
                if response.domains.is_empty() {
                    return Err(RegistryError::api(
                        &self.name,
                        operation,
                        "instance has no endpoints",
                    ));
                }
                Ok(response.domains)
            })
            .await?;
        Ok(endpoints.as_slice())
    }

    async fn registry_host(&self) -> Result<String> {
        if !self.config.instance_host.is_empty() {
            return Ok(self.config.instance_host.clone());
        }
        let endpoints = self.endpoints().await?;
        let host = endpoints
            .iter()
            .find(|e| e.kind == "USER")
            .or_else(|| endpoints.last())
            .map(|e| e.domain.clone())
            .unwrap_or_default();
        Ok(host)
    }

    async fn repo_id(&self, repo: &str) -> Result<String> {
        let operation = "GetRepository";
        let response: RepositoryResponse = self
            .client(operation)?
            .rpc_get(
                operation,
                &[
                    ("InstanceId", self.config.instance_id.as_str()),
                    ("RepoName", repo),
                    ("RepoNamespaceName", self.config.base.namespace.as_str()),
                ],
            )
            .await?;
        self.check(operation, &response.status)?;
        Ok(response.repo_id)
    }
}

#[async_trait]
impl RegistryBackend for AliCloudEeRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::AliCloudEnterprise
    }

    async fn create_repo_if_not_exists(&self, _repo: &str) -> Result<()> {
        Ok(())
    }

    async fn domain_prefix(&self) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.registry_host().await?,
            self.config.base.namespace
        ))
    }

    async fn host(&self) -> Result<String> {
        self.registry_host().await
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        let prefix = self.domain_prefix().await?;
        let base = &self.config.base;
        if base.has_static_credentials() {
            return Ok(Credentials::new(prefix, &base.username, &base.password));
        }

        let operation = "GetAuthorizationToken";
        let response: TokenResponse = self
            .client(operation)?
            .rpc_get(
                operation,
                &[("InstanceId", self.config.instance_id.as_str())],
            )
            .await
            .map_err(RegistryError::into_auth)?;
        self.check(operation, &response.status)
            .map_err(RegistryError::into_auth)?;

        Ok(Credentials::new(
            prefix,
            response.temp_username,
            response.authorization_token,
        ))
    }

    async fn latest_tag(&self, repo: &str) -> Result<String> {
        let repo_id = self.repo_id(repo).await?;

        let operation = "ListRepoTag";
        let response: RepoTagsResponse = self
            .client(operation)?
            .rpc_get(
                operation,
                &[
                    ("InstanceId", self.config.instance_id.as_str()),
                    ("RepoId", repo_id.as_str()),
                    ("PageNo", "1"),
                    ("PageSize", "1"),
                ],
            )
            .await?;
        self.check(operation, &response.status)?;

        if response.total_count == "0" {
            return Err(RegistryError::RepoHasNoImage {
                registry: self.name.clone(),
                repo: repo.to_string(),
            });
        }
        response
            .images
            .into_iter()
            .next()
            .map(|image| image.tag)
            .ok_or_else(|| RegistryError::ImageHasNoTag {
                registry: self.name.clone(),
                repo: repo.to_string(),
            })
    }

    async fn matches_image(&self, image: &str) -> bool {
        if !self.config.instance_host.is_empty() {
            return image.starts_with(&self.config.instance_host);
        }
        match self.endpoints().await {
            Ok(endpoints) => endpoints.iter().any(|e| image.starts_with(&e.domain)),
            Err(e) => {
                tracing::warn!(registry = %self.name, error = %e, "failed to look up instance endpoints");
                false
            }
        }
    }

    fn verify(&self) -> Result<()> {
        verify_alicloud(&self.name, &self.config.base)?;
        if self.config.instance_host.is_empty() && self.config.instance_id.is_empty() {
            return Err(RegistryError::Config(format!(
                "{}: instance_id cannot be empty when instance_host is not set",
                self.name
            )));
        }
        Ok(())
    }
}
