pub mod build;
pub mod config;
pub mod cp;
pub mod pull;

use hoist_config::ConfigFlags;
use anyhow::Context;
use hoist_registry::{Backend, RegistryBackend, Resolver};

/// 設定ファイルからレジストリを読み込む
///
/// `--registry` が指定されていれば、その名前が定義済みかもここで確認する。
pub fn load_resolver(flags: &ConfigFlags) -> anyhow::Result<Resolver> {
    let path = flags.config_path()?;
    tracing::debug!(path = %path.display(), "loading registries");
    let resolver = Resolver::from_file(&path)?;
    if let Some(name) = flags.registry() {
        resolver.resolve_by_name(name)?;
    }
    Ok(resolver)
}

/// プッシュ先のレジストリ
///
/// 必須項目が欠けている設定は、ビルドやネットワークアクセスの前にここで弾く。
pub fn destination<'a>(
    resolver: &'a Resolver,
    name: Option<&str>,
) -> anyhow::Result<&'a Backend> {
    let backend = resolver.destination(name)?;
    backend
        .verify()
        .with_context(|| format!("{}: invalid config", backend.name()))?;
    Ok(backend)
}
