//! ビルドタグの決定に使う git 情報

use std::path::Path;
use std::process::{Command, Stdio};

fn output(dir: &Path, args: &[&str]) -> Option<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stderr(Stdio::null())
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// 作業ツリーに未コミットの変更があるか
///
/// git リポジトリでない場合は false。
pub fn has_changes(dir: &Path) -> bool {
    Command::new("git")
        .args(["diff", "--quiet"])
        .current_dir(dir)
        .stderr(Stdio::null())
        .status()
        .map(|s| s.code() == Some(1))
        .unwrap_or(false)
}

pub fn short_hash(dir: &Path) -> Option<String> {
    output(dir, &["rev-parse", "--short", "HEAD"])
}

pub fn current_branch(dir: &Path) -> Option<String> {
    output(dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// コミットをちょうど指すタグ
pub fn exact_tag(dir: &Path, commit: &str) -> Option<String> {
    output(dir, &["describe", "--exact-match", "--tags", commit])
}

/// `feature/Login` + `636e3c1` -> `feature-login-636e3c1`
pub fn branch_tag(branch: &str, hash: &str) -> String {
    format!("{}-{}", branch, hash)
        .replace('/', "-")
        .to_lowercase()
}

/// HEAD に対応するイメージタグ
///
/// 1. HEAD を指すタグ
/// 2. `<branch>-<shorthash>`
/// 3. git 情報が取れなければ `latest`
pub fn resolve_tag(dir: &Path) -> anyhow::Result<String> {
    let Some(hash) = short_hash(dir) else {
        tracing::warn!("cannot get current commit, using `latest` as tag");
        return Ok(hoist_registry::DEFAULT_TAG.to_string());
    };
    if let Some(tag) = exact_tag(dir, &hash) {
        return Ok(tag);
    }
    let branch = current_branch(dir)
        .ok_or_else(|| anyhow::anyhow!("現在のブランチを取得できません: {}", dir.display()))?;
    Ok(branch_tag(&branch, &hash))
}
