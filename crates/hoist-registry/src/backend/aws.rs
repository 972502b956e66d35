//! Amazon Elastic Container Registry（ECR）

use super::lifecycle::default_lifecycle_policy;
use super::{RegistryBackend, RegistryKind, require_fields};
use crate::credentials::Credentials;
use crate::error::{RegistryError, Result};
use crate::model::AwsConfig;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecr::error::DisplayErrorContext;
use base64::Engine;
use tokio::sync::OnceCell;

#[derive(Debug)]
pub struct AwsEcrRegistry {
    name: String,
    config: AwsConfig,
    client: OnceCell<aws_sdk_ecr::Client>,
}

impl AwsEcrRegistry {
    pub fn new(name: impl Into<String>, config: AwsConfig) -> Self {
        Self {
            name: name.into(),
            config,
            client: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn account_id(&self) -> &str {
        &self.config.account_id
    }

    /// `<account>.dkr.ecr.<region>.amazonaws.com`（中国リージョンは `.cn` 付き）
    pub fn registry_domain(&self) -> String {
        let domain = format!(
            "{}.dkr.ecr.{}.amazonaws.com",
            self.config.account_id, self.config.region
        );
        if self.config.region.starts_with("cn-") {
            format!("{}.cn", domain)
        } else {
            domain
        }
    }

    async fn client(&self) -> &aws_sdk_ecr::Client {
        self.client
            .get_or_init(|| async {
                let credentials = aws_sdk_ecr::config::Credentials::new(
                    &self.config.access_key,
                    &self.config.secret_access_key,
                    None,
                    None,
                    "hoist",
                );
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.config.region.clone()))
                    .credentials_provider(credentials);
                if let Some(endpoint) = &self.config.endpoint {
                    loader = loader.endpoint_url(endpoint);
                }
                let sdk_config = loader.load().await;
                aws_sdk_ecr::Client::new(&sdk_config)
            })
            .await
    }

    fn sdk_error<E>(&self, operation: &str, err: E) -> RegistryError
    where
        E: std::error::Error,
    {
        RegistryError::api(&self.name, operation, DisplayErrorContext(err))
    }
}

/// ECR の認証トークン（`base64("user:password")`）をデコードする
///
/// 最初のコロンでだけ分割する。パスワードにはコロンが含まれうる。
pub fn decode_authorization_token(token: &str) -> Option<(String, String)> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(token.trim())
        .ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

#[async_trait]
impl RegistryBackend for AwsEcrRegistry {
    fn kind(&self) -> RegistryKind {
        RegistryKind::AwsEcr
    }

    async fn create_repo_if_not_exists(&self, repo: &str) -> Result<()> {
        let client = self.client().await;

        match client
            .describe_repositories()
            .repository_names(repo)
            .send()
            .await
        {
            Ok(output) if !output.repositories().is_empty() => {
                tracing::debug!(registry = %self.name, repo, "repository exists");
                return Ok(());
            }
            Ok(_) => {}
            Err(err) => {
                let not_found = err
                    .as_service_error()
                    .is_some_and(|e| e.is_repository_not_found_exception());
                if !not_found {
                    return Err(self.sdk_error("DescribeRepositories", err));
                }
            }
        }

        client
            .create_repository()
            .repository_name(repo)
            .send()
            .await
            .map_err(|e| self.sdk_error("CreateRepository", e))?;
        tracing::info!(registry = %self.name, repo, "created repository");

        let policy = match &self.config.lifecycle_policy_text {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => default_lifecycle_policy().to_json(),
        };
        client
            .put_lifecycle_policy()
            .repository_name(repo)
            .lifecycle_policy_text(policy)
            .send()
            .await
            .map_err(|e| self.sdk_error("PutLifecyclePolicy", e))?;

        Ok(())
    }

    async fn domain_prefix(&self) -> Result<String> {
        Ok(self.registry_domain())
    }

    async fn host(&self) -> Result<String> {
        Ok(self.registry_domain())
    }

    async fn fetch_credentials(&self) -> Result<Credentials> {
        let operation = "GetAuthorizationToken";
        let output = self
            .client()
            .await
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| self.sdk_error(operation, e).into_auth())?;

        let token = output
            .authorization_data()
            .first()
            .and_then(|data| data.authorization_token())
            .ok_or_else(|| RegistryError::auth(&self.name, operation, "missing token from ecr"))?;

        let (username, secret) = decode_authorization_token(token).ok_or_else(|| {
            RegistryError::auth(&self.name, operation, "malformed authorization token")
        })?;
        Ok(Credentials::new(self.registry_domain(), username, secret))
    }

    async fn latest_tag(&self, repo: &str) -> Result<String> {
        let operation = "DescribeImages";
        let mut pages = self
            .client()
            .await
            .describe_images()
            .repository_name(repo)
            .into_paginator()
            .items()
            .send();

        // 結果は順不同。最も新しくプッシュされたイメージを使う
        let mut newest: Option<((i64, u32), Vec<String>)> = None;
        while let Some(item) = pages.next().await {
            let detail = item.map_err(|e| self.sdk_error(operation, e))?;
            let pushed = detail
                .image_pushed_at()
                .map(|t| (t.secs(), t.subsec_nanos()))
                .unwrap_or_default();
            if newest.as_ref().is_none_or(|(at, _)| pushed >= *at) {
                newest = Some((pushed, detail.image_tags().to_vec()));
            }
        }

        let Some((_, tags)) = newest else {
            return Err(RegistryError::RepoHasNoImage {
                registry: self.name.clone(),
                repo: repo.to_string(),
            });
        };
        tags.into_iter()
            .next()
            .ok_or_else(|| RegistryError::ImageHasNoTag {
                registry: self.name.clone(),
                repo: repo.to_string(),
            })
    }

    async fn matches_image(&self, image: &str) -> bool {
        image.starts_with(&self.registry_domain())
    }

    fn verify(&self) -> Result<()> {
        let cfg = &self.config;
        require_fields(
            &self.name,
            &[
                ("region", cfg.region.as_str()),
                ("account_id", cfg.account_id.as_str()),
                ("access_key", cfg.access_key.as_str()),
                ("secret_access_key", cfg.secret_access_key.as_str()),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(region: &str, account: &str) -> AwsEcrRegistry {
        AwsEcrRegistry::new(
            "aws",
            AwsConfig {
                region: region.into(),
                account_id: account.into(),
                access_key: "AK".into(),
                secret_access_key: "SK".into(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_prefix_china_region() {
        let reg = registry("cn-north-1", "1234");
        assert_eq!(
            reg.domain_prefix().await.unwrap(),
            "1234.dkr.ecr.cn-north-1.amazonaws.com.cn"
        );
        assert!(reg.matches_image("1234.dkr.ecr.cn-north-1.amazonaws.com.cn/foo:dev").await);
        assert!(!reg.matches_image("4321.dkr.ecr.cn-north-1.amazonaws.com.cn/foo:dev").await);
    }

    #[tokio::test]
    async fn test_prefix_global_region() {
        let reg = registry("ap-northeast-1", "1234");
        assert_eq!(reg.host().await.unwrap(), "1234.dkr.ecr.ap-northeast-1.amazonaws.com");
    }

    #[test]
    fn test_decode_token_splits_on_first_colon() {
        let token = base64::engine::general_purpose::STANDARD.encode("AWS:pass:with:colons");
        let (user, password) = decode_authorization_token(&token).unwrap();
        assert_eq!(user, "AWS");
        assert_eq!(password, "pass:with:colons");
    }

    #[test]
    fn test_decode_token_rejects_garbage() {
        assert!(decode_authorization_token("!!!not-base64").is_none());
        let no_colon = base64::engine::general_purpose::STANDARD.encode("AWS");
        assert!(decode_authorization_token(&no_colon).is_none());
    }

    #[test]
    fn test_verify() {
        assert!(registry("cn-north-1", "1234").verify().is_ok());
        let err = registry("cn-north-1", "").verify().unwrap_err();
        assert!(err.to_string().contains("account_id cannot be empty"));
    }
}
