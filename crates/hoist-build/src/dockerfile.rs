//! Dockerfile と .dockerignore の解析

use crate::error::{BuildError, Result};
use std::collections::HashMap;
use std::path::Path;

/// Dockerfile の `FROM` 行からベースイメージを取り出す
///
/// `--platform=...` などのフラグ、`scratch`、前段ステージ名（`AS` で定義）は除外する。
/// 最初の `FROM` より前の `ARG` の既定値と `build_args` で変数を展開し、
/// それでも解決できない参照は無視する。
pub fn extract_base_images(
    content: &str,
    build_args: &HashMap<String, String>,
) -> Result<Vec<String>> {
    let mut images = Vec::new();
    let mut stages: Vec<String> = Vec::new();
    let mut globals: HashMap<String, String> = HashMap::new();
    let mut seen_from = false;

    for line in content.lines() {
        let line = line.trim();
        let line = match line.find('#') {
            Some(i) => &line[..i],
            None => line,
        };
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(keyword) if keyword.eq_ignore_ascii_case("ARG") => {
                if !seen_from {
                    for decl in parts {
                        let (name, default) = match decl.split_once('=') {
                            Some((name, value)) => (name, Some(unquote(value))),
                            None => (decl, None),
                        };
                        let value = build_args.get(name).cloned().or(default);
                        if let Some(value) = value {
                            globals.insert(name.to_string(), value);
                        }
                    }
                }
                continue;
            }
            Some(keyword) if keyword.eq_ignore_ascii_case("FROM") => seen_from = true,
            _ => continue,
        }

        let args: Vec<&str> = parts.filter(|p| !p.starts_with("--")).collect();
        let Some(raw) = args.first().copied() else {
            return Err(BuildError::InvalidOption(format!(
                "invalid FROM instruction: {}",
                line
            )));
        };
        let Some(image) = expand_vars(raw, &globals) else {
            tracing::debug!(image = raw, "skipping base image with unresolved build-time variable");
            continue;
        };

        let lowered = image.to_lowercase();
        let is_stage = stages.contains(&lowered);
        if let [_, keyword, stage, ..] = args.as_slice()
            && keyword.eq_ignore_ascii_case("AS")
        {
            stages.push(stage.to_lowercase());
        }

        if image.is_empty() || lowered == "scratch" || is_stage {
            continue;
        }
        if !images.contains(&image) {
            images.push(image);
        }
    }

    Ok(images)
}

fn unquote(value: &str) -> String {
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    value.to_string()
}

/// `$X` / `${X}` / `${X:-default}` を展開する。未定義の変数があれば None
fn expand_vars(input: &str, vars: &HashMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        if let Some(braced) = rest.strip_prefix('{') {
            let end = braced.find('}')?;
            let expr = &braced[..end];
            rest = &braced[end + 1..];
            let value = match expr.split_once(":-") {
                Some((name, default)) => vars
                    .get(name)
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .unwrap_or_else(|| default.to_string()),
                None => vars.get(expr)?.clone(),
            };
            out.push_str(&value);
        } else {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if end == 0 {
                out.push('$');
                continue;
            }
            out.push_str(vars.get(&rest[..end])?);
            rest = &rest[end..];
        }
    }
    out.push_str(rest);
    Some(out)
}

/// `.dockerignore` を読み込み、除外パターンの一覧を返す
///
/// ファイルが無い場合は空。先頭の BOM とコメント行を除き、各パターンを
/// コンテキスト相対の `/` 区切りパスに正規化する（`!` による否定は保持）。
pub fn read_dockerignore(context_dir: &Path) -> Result<Vec<String>> {
    let path = context_dir.join(".dockerignore");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BuildError::Io(e)),
    };
    Ok(parse_dockerignore(&content))
}

/// `.dockerignore` の内容を解析する
pub fn parse_dockerignore(content: &str) -> Vec<String> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut excludes = Vec::new();

    for raw in content.lines() {
        if raw.starts_with('#') {
            continue;
        }
        let mut pattern = raw.trim();
        if pattern.is_empty() {
            continue;
        }

        let invert = pattern.starts_with('!');
        if invert {
            pattern = pattern[1..].trim();
        }
        let mut cleaned = clean_path(pattern);
        if cleaned.len() > 1 && cleaned.starts_with('/') {
            cleaned.remove(0);
        }
        if cleaned.is_empty() {
            continue;
        }

        if invert {
            excludes.push(format!("!{}", cleaned));
        } else {
            excludes.push(cleaned);
        }
    }
    excludes
}

/// `.` と `..` を畳み込んだ最短の `/` 区切りパス
fn clean_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// `KEY=VALUE` のリストをマップに変換する（`=` が無ければ値は空）
pub fn parse_key_values(values: &[String]) -> HashMap<String, String> {
    values
        .iter()
        .map(|v| match v.split_once('=') {
            Some((k, val)) => (k.to_string(), val.to_string()),
            None => (v.clone(), String::new()),
        })
        .collect()
}

/// `--build-arg` を解析する
///
/// `KEY` だけの指定は同名の環境変数から値を取り、未設定なら渡さない。
pub fn parse_build_args(values: &[String]) -> HashMap<String, String> {
    values
        .iter()
        .filter_map(|v| match v.split_once('=') {
            Some((k, val)) => Some((k.to_string(), val.to_string())),
            None => std::env::var(v).ok().map(|val| (v.clone(), val)),
        })
        .collect()
}

/// ラベルを `LABEL` 命令として Dockerfile 末尾に追加する
pub fn append_labels(dockerfile: &str, labels: &HashMap<String, String>) -> String {
    if labels.is_empty() {
        return dockerfile.to_string();
    }

    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();

    let mut out = dockerfile.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("LABEL");
    for key in keys {
        out.push_str(&format!(
            " {}=\"{}\"",
            quote_label(key),
            quote_label(&labels[key])
        ));
    }
    out.push('\n');
    out
}

fn quote_label(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
