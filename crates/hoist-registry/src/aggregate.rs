//! 設定済みレジストリの集合
//!
//! 設定ファイルの順序を保持し、名前の一意性とデフォルトの存在を保証する。

use crate::backend::{Backend, RegistryBackend};
use crate::error::{RegistryError, Result};

/// 名前付きバックエンドの集合とデフォルト選択
#[derive(Debug)]
pub struct RegistryAggregate {
    backends: Vec<Backend>,
    default_name: String,
}

impl RegistryAggregate {
    /// バックエンド一覧から集合を構築する
    ///
    /// - 1件以上必要
    /// - 名前の重複はエラー
    /// - 同じ AWS アカウント+リージョン、同じ AliCloud リージョン+名前空間の重複はエラー
    /// - `default_name` が `None` の場合は先頭のエントリ
    pub fn new(backends: Vec<Backend>, default_name: Option<String>) -> Result<Self> {
        if backends.is_empty() {
            return Err(RegistryError::Config("no registries found".to_string()));
        }

        for (i, backend) in backends.iter().enumerate() {
            if let Some(dup) = backends[..i].iter().find(|b| b.name() == backend.name()) {
                return Err(RegistryError::Config(format!(
                    "duplicate registry name: '{}'",
                    dup.name()
                )));
            }
        }
        check_ambiguity(&backends)?;

        let default_name = match default_name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => backends[0].name().to_string(),
        };
        if !backends.iter().any(|b| b.name() == default_name) {
            return Err(RegistryError::RegistryNotFound(default_name));
        }

        Ok(Self {
            backends,
            default_name,
        })
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn default_backend(&self) -> &Backend {
        // new() で存在を確認済み
        self.get(&self.default_name).unwrap_or(&self.backends[0])
    }

    pub fn get(&self, name: &str) -> Option<&Backend> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// 名前で選択（`None` ならデフォルト）
    pub fn select(&self, name: Option<&str>) -> Result<&Backend> {
        match name {
            Some(name) => self
                .get(name)
                .ok_or_else(|| RegistryError::RegistryNotFound(name.to_string())),
            None => Ok(self.default_backend()),
        }
    }

    /// 設定順のイテレータ
    pub fn iter(&self) -> impl Iterator<Item = &Backend> {
        self.backends.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// 全エントリを検証し、失敗したものを `(名前, エラー)` で返す
    pub fn verify_all(&self) -> Vec<(String, RegistryError)> {
        self.backends
            .iter()
            .filter_map(|b| b.verify().err().map(|e| (b.name().to_string(), e)))
            .collect()
    }
}

/// 同じドメインを2つのエントリが所有していないか
fn check_ambiguity(backends: &[Backend]) -> Result<()> {
    let mut owners: Vec<(String, &str)> = Vec::new();

    for backend in backends {
        let domain = match backend {
            Backend::AwsEcr(aws) => aws.registry_domain(),
            Backend::AliCloud(ali) => format!("registry.{}.aliyuncs.com/{}", ali.region(), ali.namespace()),
            _ => continue,
        };
        if let Some((_, first)) = owners.iter().find(|(d, _)| *d == domain) {
            return Err(RegistryError::AmbiguousRegistry {
                first: first.to_string(),
                second: backend.name().to_string(),
                domain,
            });
        }
        owners.push((domain, backend.name()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AliCloudRegistry, AwsEcrRegistry, PublicRegistry};
    use crate::model::{AliCloudConfig, AwsConfig};

    fn ali(name: &str, namespace: &str) -> Backend {
        Backend::AliCloud(AliCloudRegistry::new(
            name,
            AliCloudConfig {
                region: "cn-hangzhou".into(),
                namespace: namespace.into(),
                ..Default::default()
            },
        ))
    }

    fn aws(name: &str, account: &str) -> Backend {
        Backend::AwsEcr(AwsEcrRegistry::new(
            name,
            AwsConfig {
                region: "cn-north-1".into(),
                account_id: account.into(),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn test_default_is_first_entry() {
        let agg = RegistryAggregate::new(vec![ali("a1", "ns1"), aws("r1", "1234")], None).unwrap();
        assert_eq!(agg.default_name(), "a1");
        assert_eq!(agg.default_backend().name(), "a1");
        assert_eq!(agg.names(), vec!["a1", "r1"]);
    }

    #[test]
    fn test_explicit_default() {
        let agg = RegistryAggregate::new(
            vec![ali("a1", "ns1"), aws("r1", "1234")],
            Some("r1".to_string()),
        )
        .unwrap();
        assert_eq!(agg.default_backend().name(), "r1");
        assert_eq!(agg.select(Some("a1")).unwrap().name(), "a1");
        assert_eq!(agg.select(None).unwrap().name(), "r1");
    }

    #[test]
    fn test_missing_default() {
        let err = RegistryAggregate::new(vec![ali("a1", "ns1")], Some("nope".to_string())).unwrap_err();
        assert!(matches!(err, RegistryError::RegistryNotFound(name) if name == "nope"));
    }

    #[test]
    fn test_select_unknown_name() {
        let agg = RegistryAggregate::new(vec![ali("a1", "ns1")], None).unwrap();
        assert!(matches!(
            agg.select(Some("x")).unwrap_err(),
            RegistryError::RegistryNotFound(_)
        ));
    }

    #[test]
    fn test_empty_is_rejected() {
        assert!(RegistryAggregate::new(Vec::new(), None).is_err());
    }

    #[test]
    fn test_duplicate_names() {
        let err = RegistryAggregate::new(vec![ali("a", "ns1"), ali("a", "ns2")], None).unwrap_err();
        assert!(err.to_string().contains("duplicate registry name"));
    }

    #[test]
    fn test_ambiguous_aws_entries() {
        let err =
            RegistryAggregate::new(vec![aws("r1", "1234"), aws("r2", "1234")], None).unwrap_err();
        match err {
            RegistryError::AmbiguousRegistry { first, second, domain } => {
                assert_eq!(first, "r1");
                assert_eq!(second, "r2");
                assert_eq!(domain, "1234.dkr.ecr.cn-north-1.amazonaws.com.cn");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ambiguous_alicloud_entries() {
        let err =
            RegistryAggregate::new(vec![ali("a1", "ns1"), ali("a2", "ns1")], None).unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousRegistry { .. }));
    }

    #[test]
    fn test_verify_all_reports_failures() {
        let agg = RegistryAggregate::new(
            vec![
                aws("r1", "1234"),
                Backend::Public(PublicRegistry::new("anon")),
            ],
            None,
        )
        .unwrap();
        let failures = agg.verify_all();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "r1");
        assert!(matches!(failures[1].1, RegistryError::UnknownRegistry));
    }
}
