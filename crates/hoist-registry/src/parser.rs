//! レジストリ設定（YAML）パーサー
//!
//! `registries` リストを読み込み、各エントリを [`Backend`] に変換して
//! [`RegistryAggregate`] を生成する。

use crate::aggregate::RegistryAggregate;
use crate::backend::{Backend, RegistryBackend};
use crate::error::{RegistryError, Result};
use crate::model::RegistryFile;
use std::path::Path;

/// YAMLファイルを RegistryAggregate にパース
pub fn parse_registry_file(path: &Path) -> Result<RegistryAggregate> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RegistryError::Config(format!("failed to open {}: {}", path.display(), e))
    })?;
    parse_registry_config(&content)
}

/// YAML文字列を RegistryAggregate にパース
pub fn parse_registry_config(content: &str) -> Result<RegistryAggregate> {
    let file: RegistryFile = serde_yaml::from_str(content)?;
    build_aggregate(file)
}

/// デシリアライズ済みの設定から RegistryAggregate を構築
pub fn build_aggregate(file: RegistryFile) -> Result<RegistryAggregate> {
    let count = file.registries.len();

    let mut backends = Vec::with_capacity(count);
    for (i, entry) in file.registries.iter().enumerate() {
        // 名前の省略はエントリが1つの場合のみ許可
        if entry.name.is_empty() && count > 1 {
            return Err(RegistryError::Config(format!(
                "name of registry {} cannot be empty",
                i
            )));
        }
        let backend = Backend::from_entry(entry)?;
        tracing::debug!(name = %entry.name, kind = %backend.kind(), "loaded registry");
        backends.push(backend);
    }

    RegistryAggregate::new(backends, file.default_registry)
}
