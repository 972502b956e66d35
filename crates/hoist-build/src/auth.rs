//! セッション単位のレジストリ認証情報キャッシュ
//!
//! セッション中、ビルドエンジンはレジストリのホスト名で認証情報を要求する。
//! 結果はホストごとに保持し、同じホストへの同時要求は実行中の1回の取得を共有する。
//! バックエンドへの問い合わせはセッションあたりホストごとに高々1回。

use crate::error::Result;
use async_trait::async_trait;
use bollard::auth::DockerCredentials;
use hoist_registry::{
    Credentials, DOCKER_HUB_AUTH_ADDRESS, DOCKER_HUB_HOST, RegistryBackend, Resolver,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;

/// キャッシュが認証情報を取得する先
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// `host` の認証情報。どのレジストリも担当しなければ `None`
    async fn lookup(&self, host: &str) -> Result<Option<Credentials>>;

    /// `image` を持つレジストリのホスト名
    async fn host_of(&self, image: &str) -> Result<Option<String>>;
}

#[async_trait]
impl CredentialSource for Resolver {
    async fn lookup(&self, host: &str) -> Result<Option<Credentials>> {
        match self.backend_for_host(host).await? {
            Some(backend) => {
                tracing::debug!(host, registry = backend.name(), "fetching credentials");
                Ok(Some(backend.fetch_credentials().await?))
            }
            None => Ok(None),
        }
    }

    async fn host_of(&self, image: &str) -> Result<Option<String>> {
        let backend = self.resolve_by_image_reference(image).await;
        if backend.is_public() {
            return Ok(None);
        }
        let host = backend.host().await?;
        Ok((!host.is_empty()).then_some(host))
    }
}

type Slot = Arc<OnceCell<Credentials>>;

/// ホスト名をキーにした、取得を1回にまとめる認証情報キャッシュ
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    entries: Mutex<HashMap<String, Slot>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, host: &str) -> Slot {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.entry(host.to_string()).or_default().clone()
    }

    /// `host` の認証情報
    ///
    /// 担当するレジストリが無いホストは匿名。取得に失敗した場合は何も保持せず、
    /// 次の要求で取り直す。
    pub async fn credentials_for(&self, host: &str) -> Result<Credentials> {
        let slot = self.slot(host);
        let credentials = slot
            .get_or_try_init(|| async {
                let found = self.source.lookup(host).await?;
                if found.is_none() {
                    tracing::debug!(host, "no registry for host, using anonymous access");
                }
                Ok::<_, crate::error::BuildError>(found.unwrap_or_else(Credentials::anonymous))
            })
            .await?;
        Ok(credentials.clone())
    }

    /// `image` を持つレジストリの認証情報
    pub async fn credentials_for_image(&self, image: &str) -> Result<Credentials> {
        match self.source.host_of(image).await? {
            Some(host) => self.credentials_for(&host).await,
            None => Ok(Credentials::anonymous()),
        }
    }

    /// `images` を持つレジストリの認証情報を先に取得しておく
    ///
    /// 匿名以外の認証情報を、エンジンが参照するアドレスをキーにして返す。
    pub async fn prefetch<I, S>(&self, images: I) -> Result<HashMap<String, Credentials>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut hosts = Vec::new();
        for image in images {
            if let Some(host) = self.source.host_of(image.as_ref()).await?
                && !hosts.contains(&host)
            {
                hosts.push(host);
            }
        }

        let fetched =
            futures_util::future::try_join_all(hosts.iter().map(|h| self.credentials_for(h)))
                .await?;

        Ok(hosts
            .into_iter()
            .zip(fetched)
            .filter(|(_, c)| !c.is_anonymous())
            .map(|(host, c)| (auth_address(&host), c))
            .collect())
    }

    /// 取得済みのホスト数
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|s| s.initialized()).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Docker Hub はインデックスのアドレス、それ以外はホスト名がキー
pub fn auth_address(host: &str) -> String {
    if host == DOCKER_HUB_HOST {
        DOCKER_HUB_AUTH_ADDRESS.to_string()
    } else {
        host.to_string()
    }
}

/// bollard の認証情報に変換
pub fn docker_credentials(credentials: &Credentials) -> DockerCredentials {
    DockerCredentials {
        username: Some(credentials.username.clone()),
        password: Some(credentials.secret.clone()),
        serveraddress: (!credentials.server_address.is_empty())
            .then(|| credentials.server_address.clone()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use hoist_registry::{RegistryError, parse_registry_config};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSource {
        calls: AtomicUsize,
        fail_first: bool,
    }

    impl CountingSource {
        fn new(fail_first: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl CredentialSource for CountingSource {
        async fn lookup(&self, host: &str) -> Result<Option<Credentials>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                return Err(BuildError::Registry(RegistryError::Auth {
                    registry: "fake".into(),
                    operation: "GetAuthorizationToken".into(),
                    message: "throttled".into(),
                }));
            }
            if host == "public.example.com" {
                return Ok(None);
            }
            Ok(Some(Credentials::new(host, "user", format!("token-{n}"))))
        }

        async fn host_of(&self, image: &str) -> Result<Option<String>> {
            Ok(image
                .split_once('/')
                .map(|(host, _)| host.to_string())
                .filter(|h| h.contains('.') && h != "public.example.com"))
        }
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let source = Arc::new(CountingSource::new(false));
        let cache = Arc::new(CredentialCache::new(source.clone()));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.credentials_for("registry.example.com").await })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|c| c == &results[0]));
        assert_eq!(results[0].secret, "token-0");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_hosts_are_fetched_independently() {
        let source = Arc::new(CountingSource::new(false));
        let cache = CredentialCache::new(source.clone());

        let (a, b) = tokio::join!(
            cache.credentials_for("a.example.com"),
            cache.credentials_for("b.example.com")
        );
        assert_eq!(a.unwrap().server_address, "a.example.com");
        assert_eq!(b.unwrap().server_address, "b.example.com");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let source = Arc::new(CountingSource::new(true));
        let cache = CredentialCache::new(source.clone());

        let err = cache.credentials_for("registry.example.com").await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
        assert!(cache.is_empty());

        let creds = cache.credentials_for("registry.example.com").await.unwrap();
        assert_eq!(creds.secret, "token-1");
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_host_is_anonymous() {
        let source = Arc::new(CountingSource::new(false));
        let cache = CredentialCache::new(source);
        let creds = cache.credentials_for("public.example.com").await.unwrap();
        assert!(creds.is_anonymous());
    }

    #[tokio::test]
    async fn test_prefetch_deduplicates_hosts() {
        let source = Arc::new(CountingSource::new(false));
        let cache = CredentialCache::new(source.clone());

        let map = cache
            .prefetch([
                "registry.example.com/team/base:1",
                "registry.example.com/team/other:2",
                "public.example.com/library/alpine",
                "alpine:3",
            ])
            .await
            .unwrap();

        assert_eq!(map.len(), 1);
        assert_eq!(map["registry.example.com"].username, "user");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_source() {
        let resolver = Resolver::new(
            parse_registry_config(
                r#"
registries:
  - name: hub
    dockerhub: {username: alice, password: pw}
  - name: ali
    aliyun: {region: cn-hangzhou, namespace: team, username: u, password: p}
"#,
            )
            .unwrap(),
        );
        let cache = CredentialCache::new(Arc::new(resolver));

        let hub = cache.credentials_for(DOCKER_HUB_HOST).await.unwrap();
        assert_eq!(hub.username, "alice");
        assert_eq!(hub.server_address, DOCKER_HUB_AUTH_ADDRESS);

        let map = cache
            .prefetch([
                "alice/base:1",
                "registry.cn-hangzhou.aliyuncs.com/team/base:2",
                "docker.io/library/nginx",
            ])
            .await
            .unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[DOCKER_HUB_AUTH_ADDRESS].secret, "pw");
        assert_eq!(map["registry.cn-hangzhou.aliyuncs.com"].username, "u");

        assert!(cache.credentials_for("quay.io").await.unwrap().is_anonymous());
        assert!(
            cache
                .credentials_for_image("nginx:1.25")
                .await
                .unwrap()
                .is_anonymous()
        );
        let ali = cache
            .credentials_for_image("registry.cn-hangzhou.aliyuncs.com/team/base:2")
            .await
            .unwrap();
        assert_eq!(ali.username, "u");
    }

    #[tokio::test]
    async fn test_unresolvable_registry_host_is_not_cached() {
        let resolver = Resolver::new(
            parse_registry_config(
                r#"
registries:
  - name: ee
    aliyun_ee:
      region: cn-hangzhou
      namespace: team
      access_key: ak
      secret_access_key: sk
      instance_id: cri-123
      endpoint: http://127.0.0.1:1
"#,
            )
            .unwrap(),
        );
        let cache = CredentialCache::new(Arc::new(resolver));

        let host = "team-registry.cn-hangzhou.cr.aliyuncs.com";
        assert!(cache.credentials_for(host).await.is_err());
        assert!(cache.is_empty());
        assert!(cache.credentials_for(host).await.is_err());
    }

    #[test]
    fn test_docker_credentials() {
        let creds = Credentials::new("registry.example.com", "u", "s");
        let docker = docker_credentials(&creds);
        assert_eq!(docker.username.as_deref(), Some("u"));
        assert_eq!(docker.password.as_deref(), Some("s"));
        assert_eq!(docker.serveraddress.as_deref(), Some("registry.example.com"));
    }
}
