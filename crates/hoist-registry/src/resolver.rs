//! イメージ参照からレジストリを解決する

use crate::aggregate::RegistryAggregate;
use crate::backend::{Backend, RegistryBackend};
use crate::error::Result;
use crate::parser::parse_registry_file;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static AWS_ECR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<account>\d+)\.dkr\.ecr\.(?P<region>[\w-]+)\.amazonaws\.com(?:\.cn)?(?:/|$)")
        .expect("ECR regex is valid")
});

static ALICLOUD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^registry(?:-vpc|-internal)?\.(?P<region>[\w-]+)\.aliyuncs\.com(?:/|$)")
        .expect("AliCloud regex is valid")
});

/// イメージ参照や名前から設定済みのバックエンドを引く
///
/// コマンド開始時に一度読み込み、以後は読み取り専用。どのバックエンドにも
/// 一致しない参照は、リゾルバが持つ匿名のパブリックバックエンドになる。
#[derive(Debug)]
pub struct Resolver {
    aggregate: RegistryAggregate,
    public: Backend,
}

impl Resolver {
    pub fn new(aggregate: RegistryAggregate) -> Self {
        Self {
            aggregate,
            public: Backend::public(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(parse_registry_file(path)?))
    }

    pub fn aggregate(&self) -> &RegistryAggregate {
        &self.aggregate
    }

    pub fn resolve_by_name(&self, name: &str) -> Result<&Backend> {
        self.aggregate.select(Some(name))
    }

    pub fn default_backend(&self) -> &Backend {
        self.aggregate.default_backend()
    }

    /// `name` のレジストリ、省略時はデフォルト
    pub fn destination(&self, name: Option<&str>) -> Result<&Backend> {
        self.aggregate.select(name)
    }

    /// `reference` を持つバックエンド。設定順で最初に一致したもの
    pub async fn resolve_by_image_reference(&self, reference: &str) -> &Backend {
        if let Some(caps) = AWS_ECR.captures(reference) {
            let (account, region) = (&caps["account"], &caps["region"]);
            let found = self.aggregate.iter().find(|b| match b {
                Backend::AwsEcr(aws) => aws.account_id() == account && aws.region() == region,
                _ => false,
            });
            if let Some(backend) = found {
                tracing::debug!(reference, registry = backend.name(), "resolved ECR image");
                return backend;
            }
        } else if let Some(caps) = ALICLOUD.captures(reference) {
            let region = caps["region"].to_string();
            for backend in self.aggregate.iter() {
                if let Backend::AliCloud(ali) = backend
                    && ali.region() == region.as_str()
                    && ali.matches_image(reference).await
                {
                    tracing::debug!(reference, registry = backend.name(), "resolved AliCloud image");
                    return backend;
                }
            }
        }

        for backend in self.aggregate.iter() {
            if matches!(backend, Backend::AwsEcr(_) | Backend::AliCloud(_)) {
                continue;
            }
            if backend.matches_image(reference).await {
                tracing::debug!(reference, registry = backend.name(), "resolved image");
                return backend;
            }
        }

        tracing::debug!(reference, "no registry matched, using public registry");
        &self.public
    }

    /// `host` を担当するバックエンド
    ///
    /// ホスト名を決められないバックエンドがあれば、他が `host` を担当しない限りエラー。
    pub async fn backend_for_host(&self, host: &str) -> Result<Option<&Backend>> {
        let mut failure = None;
        for backend in self.aggregate.iter() {
            match backend.host().await {
                Ok(h) if !h.is_empty() && h == host => return Ok(Some(backend)),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(registry = backend.name(), error = %e, "failed to determine registry host");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
