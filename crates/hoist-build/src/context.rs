use crate::dockerfile::{append_labels, read_dockerignore};
use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::{MatchOptions, Pattern};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header, HeaderMode};

/// `.dockerignore` の除外判定
#[derive(Debug, Default)]
pub struct IgnoreMatcher {
    rules: Vec<(Pattern, bool)>,
}

impl IgnoreMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut rules = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let (pattern, negated) = match raw.strip_prefix('!') {
                Some(rest) => (rest, true),
                None => (raw.as_str(), false),
            };
            let compiled = Pattern::new(pattern).map_err(|e| {
                BuildError::InvalidOption(format!("invalid .dockerignore pattern '{}': {}", raw, e))
            })?;
            rules.push((compiled, negated));
        }
        Ok(Self { rules })
    }

    /// コンテキスト相対パス（`/` 区切り）が除外対象か
    ///
    /// 最後にマッチしたルールが優先。親ディレクトリへのマッチは配下にも及ぶ。
    pub fn is_excluded(&self, rel: &str) -> bool {
        let options = MatchOptions {
            require_literal_separator: true,
            ..Default::default()
        };
        let mut excluded = false;
        for (pattern, negated) in &self.rules {
            let hit = ancestors(rel).any(|p| pattern.matches_with(p, options));
            if hit {
                excluded = !negated;
            }
        }
        excluded
    }
}

/// `a/b/c` -> `a`, `a/b`, `a/b/c`
fn ancestors(rel: &str) -> impl Iterator<Item = &str> {
    rel.match_indices('/')
        .map(move |(i, _)| &rel[..i])
        .chain(std::iter::once(rel))
}

/// 作成したビルドコンテキスト
#[derive(Debug)]
pub struct ContextArchive {
    /// tar.gz データ
    pub data: Vec<u8>,
    /// アーカイブ内の Dockerfile のパス
    pub dockerfile: String,
    pub entries: usize,
}

pub struct ContextBuilder {
    context_dir: PathBuf,
    dockerfile: PathBuf,
    labels: HashMap<String, String>,
    reset_ownership: bool,
}

impl ContextBuilder {
    pub fn new(context_dir: impl Into<PathBuf>, dockerfile: impl Into<PathBuf>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: dockerfile.into(),
            labels: HashMap::new(),
            reset_ownership: true,
        }
    }

    /// Dockerfile 末尾に追加するラベル
    pub fn labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// uid/gid を 0 に揃えるか（デフォルト: true）
    pub fn reset_ownership(mut self, reset: bool) -> Self {
        self.reset_ownership = reset;
        self
    }

    /// ビルドコンテキストをtar.gzアーカイブとして作成
    pub fn build(&self) -> Result<ContextArchive> {
        if !self.context_dir.is_dir() {
            return Err(BuildError::ContextNotFound(self.context_dir.clone()));
        }
        let dockerfile_content = std::fs::read_to_string(&self.dockerfile)
            .map_err(|_| BuildError::DockerfileNotFound(self.dockerfile.clone()))?;
        tracing::debug!("Creating build context from: {}", self.context_dir.display());

        let ignore = IgnoreMatcher::new(&read_dockerignore(&self.context_dir)?)?;

        // コンテキスト内の Dockerfile はその場所に、外部のものはルートに置く
        let dockerfile_entry = self
            .dockerfile
            .strip_prefix(&self.context_dir)
            .ok()
            .map(to_slash)
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "Dockerfile".to_string());

        let mut data = Vec::new();
        let mut entries = 0;
        {
            let encoder = GzEncoder::new(&mut data, Compression::default());
            let mut tar = Builder::new(encoder);

            self.append_tree(&mut tar, &self.context_dir, &ignore, &dockerfile_entry, &mut entries)?;

            let content = append_labels(&dockerfile_content, &self.labels);
            let mut header = Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_uid(0);
            header.set_gid(0);
            header.set_entry_type(EntryType::Regular);
            header.set_mtime(now_secs());
            tar.append_data(&mut header, &dockerfile_entry, content.as_bytes())?;
            entries += 1;

            tar.into_inner()?.finish()?;
        }

        tracing::debug!("Build context created: {} bytes, {} entries", data.len(), entries);
        check_context_size(data.len());

        Ok(ContextArchive {
            data,
            dockerfile: dockerfile_entry,
            entries,
        })
    }

    fn append_tree<W: std::io::Write>(
        &self,
        tar: &mut Builder<W>,
        dir: &Path,
        ignore: &IgnoreMatcher,
        dockerfile_entry: &str,
        entries: &mut usize,
    ) -> Result<()> {
        let mut children: Vec<_> = std::fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let path = child.path();
            let rel = match path.strip_prefix(&self.context_dir) {
                Ok(rel) => to_slash(rel),
                Err(_) => continue,
            };
            // .dockerignore と Dockerfile は除外指定されていても送る
            let always = rel == ".dockerignore";
            if rel == dockerfile_entry || (!always && ignore.is_excluded(&rel)) {
                continue;
            }

            let meta = std::fs::symlink_metadata(&path)?;
            let mut header = Header::new_gnu();
            header.set_metadata_in_mode(&meta, HeaderMode::Complete);
            if self.reset_ownership {
                header.set_uid(0);
                header.set_gid(0);
                header.set_username("")?;
                header.set_groupname("")?;
            }

            if meta.file_type().is_symlink() {
                let target = std::fs::read_link(&path)?;
                header.set_size(0);
                tar.append_link(&mut header, &rel, &target)?;
            } else if meta.is_dir() {
                header.set_size(0);
                tar.append_data(&mut header, format!("{}/", rel), std::io::empty())?;
                *entries += 1;
                self.append_tree(tar, &path, ignore, dockerfile_entry, entries)?;
                continue;
            } else if meta.is_file() {
                let file = std::fs::File::open(&path)?;
                tar.append_data(&mut header, &rel, file)?;
            } else {
                tracing::debug!(path = %rel, "skipping special file");
                continue;
            }
            *entries += 1;
        }
        Ok(())
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// コンテキストサイズのチェックと警告
fn check_context_size(size: usize) {
    const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

    if size > MAX_CONTEXT_SIZE {
        tracing::warn!(
            "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
             .dockerignoreファイルで不要なファイルを除外することを推奨します。",
            size / 1024 / 1024
        );
    }
}
