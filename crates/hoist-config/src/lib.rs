//! hoist の設定ファイル探索
//!
//! レジストリ定義は YAML ファイルに置く。ファイルの中身の解釈は
//! `hoist-registry` が行い、このクレートは場所の決定と雛形の扱いだけを受け持つ。

pub mod error;

pub use error::*;

use std::path::{Path, PathBuf};
use std::process::Command;

/// 設定ファイルのパスを指定する環境変数
pub const CONFIG_ENV: &str = "HOIST_CONFIG";

/// デフォルトのレジストリを上書きする環境変数
pub const REGISTRY_ENV: &str = "HOIST_REGISTRY";

/// カレント・ホームディレクトリに置く設定ファイル名
pub const CONFIG_FILE_NAME: &str = ".hoist.yaml";

/// `hoist config init` が出力する雛形
pub const DEFAULT_CONFIG: &str = r#"# hoist registry configuration
# default-registry: ali
registries:
  - name: ali
    aliyun:
      username: foo
      password: bar
      region: cn-hangzhou
      namespace: test
  - name: aws-tokyo
    aws:
      access_key: foo
      secret_access_key: bar
      region: ap-northeast-1
      account_id: "12345"
  - name: aws-bj
    aws:
      access_key: foo
      secret_access_key: bar
      region: cn-north-1
      account_id: "45678"
"#;

/// コマンドライン全体に効くオプション
#[derive(Debug, Clone, Default)]
pub struct ConfigFlags {
    /// `--config`
    pub config: Option<PathBuf>,
    /// `--registry`
    pub registry: Option<String>,
    /// `--platform`
    pub platform: Option<String>,
}

impl ConfigFlags {
    /// 読み込む設定ファイル
    pub fn config_path(&self) -> Result<PathBuf> {
        find_config_file(self.config.as_deref())
    }

    /// 書き込み先の設定ファイル（存在しなくてもよい）
    pub fn target_path(&self) -> Result<PathBuf> {
        default_config_path(self.config.as_deref())
    }

    /// 選択されたレジストリ名。未指定なら設定ファイルの default-registry を使う
    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref().filter(|r| !r.is_empty())
    }

    /// ビルド対象のプラットフォーム
    pub fn platform(&self) -> String {
        match self.platform.as_deref() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => default_platform(),
        }
    }
}

/// 実行中のマシンに対応する `linux/<arch>`
pub fn default_platform() -> String {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        other => other,
    };
    format!("linux/{}", arch)
}

fn env_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// 探索する場所（優先順）
///
/// 1. ./.hoist.yaml
/// 2. ~/.hoist.yaml
/// 3. ~/.config/hoist/config.yaml（OS の設定ディレクトリ）
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(CONFIG_FILE_NAME));
    }
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(CONFIG_FILE_NAME));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("hoist").join("config.yaml"));
    }
    paths
}

/// 設定ファイルを探す
///
/// 明示指定（`--config`、次に `HOIST_CONFIG`）があればそれだけを見る。
pub fn find_config_file(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit.map(Path::to_path_buf).or_else(env_path) {
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::ExplicitNotFound(path));
    }

    for path in search_paths() {
        if path.is_file() {
            tracing::debug!(path = %path.display(), "found config file");
            return Ok(path);
        }
    }

    Err(ConfigError::ConfigNotFound)
}

/// 雛形の書き込み先
///
/// 明示指定が無ければ既存の設定ファイル、それも無ければ `~/.hoist.yaml`。
pub fn default_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit.map(Path::to_path_buf).or_else(env_path) {
        return Ok(path);
    }
    if let Ok(found) = find_config_file(None) {
        return Ok(found);
    }
    dirs::home_dir()
        .map(|home| home.join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::HomeDirNotFound)
}

/// 雛形を書き込む。既存のファイルは上書きしない
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path.to_path_buf()));
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG)?;
    tracing::info!(path = %path.display(), "wrote default config");
    Ok(())
}

/// 設定ファイルの中身
pub fn read_config(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

/// `$EDITOR`（未設定なら vi、Windows では notepad）
pub fn editor() -> String {
    match std::env::var("EDITOR") {
        Ok(editor) if !editor.trim().is_empty() => editor,
        _ if cfg!(windows) => "notepad".to_string(),
        _ => "vi".to_string(),
    }
}

/// エディタで設定ファイルを開き、終了を待つ
pub fn edit_config(path: &Path) -> Result<()> {
    let editor = editor();
    // `code -w` のような引数付きの指定に対応
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or("vi");

    let status = Command::new(program)
        .args(parts)
        .arg(path)
        .status()
        .map_err(|e| ConfigError::Editor {
            editor: editor.clone(),
            message: e.to_string(),
        })?;

    if !status.success() {
        return Err(ConfigError::Editor {
            editor,
            message: format!("exited with {}", status),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// カレントディレクトリを一時的に移動する
    fn in_dir<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = f();
        std::env::set_current_dir(original).unwrap();
        result
    }

    #[test]
    #[serial]
    fn test_find_config_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), DEFAULT_CONFIG).unwrap();

        let found = temp_env::with_var_unset(CONFIG_ENV, || {
            in_dir(temp_dir.path(), || find_config_file(None).unwrap())
        });
        assert!(found.ends_with(CONFIG_FILE_NAME));
        assert_eq!(
            found.canonicalize().unwrap(),
            temp_dir.path().join(CONFIG_FILE_NAME).canonicalize().unwrap()
        );
    }

    #[test]
    #[serial]
    fn test_env_var_takes_priority() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "registries: []").unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, DEFAULT_CONFIG).unwrap();

        let found = temp_env::with_var(CONFIG_ENV, Some(&custom), || {
            in_dir(temp_dir.path(), || find_config_file(None).unwrap())
        });
        assert_eq!(found, custom);
    }

    #[test]
    #[serial]
    fn test_flag_takes_priority_over_env() {
        let temp_dir = tempfile::tempdir().unwrap();
        let from_env = temp_dir.path().join("env.yaml");
        let from_flag = temp_dir.path().join("flag.yaml");
        fs::write(&from_env, DEFAULT_CONFIG).unwrap();
        fs::write(&from_flag, DEFAULT_CONFIG).unwrap();

        let found = temp_env::with_var(CONFIG_ENV, Some(&from_env), || {
            find_config_file(Some(&from_flag)).unwrap()
        });
        assert_eq!(found, from_flag);
    }

    #[test]
    #[serial]
    fn test_explicit_missing_file() {
        let result = temp_env::with_var_unset(CONFIG_ENV, || {
            find_config_file(Some(Path::new("/nonexistent/hoist.yaml")))
        });
        assert!(matches!(result, Err(ConfigError::ExplicitNotFound(p)) if p.ends_with("hoist.yaml")));
    }

    #[test]
    #[serial]
    fn test_config_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let home = temp_dir.path().join("home");
        fs::create_dir(&home).unwrap();

        let result = temp_env::with_vars(
            [
                (CONFIG_ENV, None),
                ("HOME", Some(home.as_os_str())),
                ("XDG_CONFIG_HOME", Some(home.join(".config").as_os_str())),
            ],
            || in_dir(temp_dir.path(), || find_config_file(None)),
        );
        if cfg!(target_os = "linux") {
            assert!(matches!(result, Err(ConfigError::ConfigNotFound)));
        }
    }

    #[test]
    #[serial]
    fn test_init_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        init_config(&path).unwrap();
        assert_eq!(read_config(&path).unwrap(), DEFAULT_CONFIG);

        let err = init_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::AlreadyExists(_)));
    }

    #[test]
    #[serial]
    fn test_target_path_prefers_explicit() {
        let flags = ConfigFlags {
            config: Some(PathBuf::from("/tmp/hoist-target.yaml")),
            ..Default::default()
        };
        let target = temp_env::with_var_unset(CONFIG_ENV, || flags.target_path().unwrap());
        assert_eq!(target, PathBuf::from("/tmp/hoist-target.yaml"));
    }

    #[test]
    fn test_search_paths_order() {
        let paths = search_paths();
        assert!(paths[0].ends_with(CONFIG_FILE_NAME));
        assert!(paths.last().unwrap().ends_with("hoist/config.yaml"));
    }

    #[test]
    fn test_platform() {
        let flags = ConfigFlags {
            platform: Some("linux/arm64".into()),
            ..Default::default()
        };
        assert_eq!(flags.platform(), "linux/arm64");

        let flags = ConfigFlags::default();
        assert!(flags.platform().starts_with("linux/"));
        assert_eq!(flags.registry(), None);
    }

    #[test]
    #[serial]
    fn test_editor() {
        temp_env::with_var("EDITOR", Some("code -w"), || {
            assert_eq!(editor(), "code -w");
        });
        temp_env::with_var_unset("EDITOR", || {
            if !cfg!(windows) {
                assert_eq!(editor(), "vi");
            }
        });
    }

    #[test]
    #[serial]
    fn test_edit_config_with_true_editor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, DEFAULT_CONFIG).unwrap();

        if cfg!(unix) {
            temp_env::with_var("EDITOR", Some("true"), || edit_config(&path).unwrap());
            let err = temp_env::with_var("EDITOR", Some("false"), || edit_config(&path).unwrap_err());
            assert!(matches!(err, ConfigError::Editor { .. }));
        }
    }
}
