//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::auth::docker_credentials;
use crate::error::{BuildError, Result};
use bollard::Docker;
use bollard::models::PushImageInfo;
use colored::Colorize;
use futures_util::StreamExt;
use hoist_registry::{Credentials, Image};
use std::io::Write;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// イメージをレジストリにプッシュ
    ///
    /// # Returns
    /// プッシュ成功時は完全なイメージ名を返す
    pub async fn push(&self, image: &Image, credentials: &Credentials) -> Result<String> {
        let full_image = image.to_string();

        validate_tag(&image.tag)?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: image.tag.clone(),
        };
        let credentials = (!credentials.is_anonymous()).then(|| docker_credentials(credentials));

        println!("  → {}", full_image.cyan());

        #[allow(deprecated)]
        let mut stream = self
            .docker
            .push_image(&image.name(), Some(options), credentials);

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        handle_progress(&info, &mut last_status);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        image: full_image,
                        message: e.to_string(),
                    });
                }
            }
        }

        // 最終行の改行
        println!();

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed {
                image: full_image,
                message: err,
            });
        }

        tracing::info!(image = %full_image, "pushed image");
        Ok(full_image)
    }

    /// ローカルイメージに別名を付ける
    pub async fn tag(&self, source: &str, target: &Image) -> Result<()> {
        validate_tag(&target.tag)?;

        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions {
            repo: target.name(),
            tag: target.tag.clone(),
        };
        self.docker.tag_image(source, Some(options)).await?;
        tracing::debug!(source, target = %target, "tagged image");
        Ok(())
    }

    /// ローカルイメージを削除
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.docker
            .remove_image(
                name,
                None::<bollard::query_parameters::RemoveImageOptions>,
                None,
            )
            .await?;
        tracing::debug!(image = name, "removed local image");
        Ok(())
    }
}

/// タグのバリデーション
pub fn validate_tag(tag: &str) -> Result<()> {
    // Docker タグの制約:
    // - 128文字以下
    // - 英数字、ピリオド、ハイフン、アンダースコアのみ
    // - 先頭はピリオドまたはハイフンではない

    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '.' && *c != '-' && *c != '_')
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// プッシュ進捗を表示
fn handle_progress(info: &PushImageInfo, last_status: &mut String) {
    if let Some(status) = &info.status {
        let progress = info.progress.as_deref().unwrap_or("");

        match status.as_str() {
            "Pushing" => {
                print!("\r  ↑ {} {}     ", status, progress);
                std::io::stdout().flush().ok();
            }
            "Pushed" => {
                println!("\r  {} Pushed                    ", "✓".green());
            }
            "Layer already exists" => {
                println!("\r  {} Layer already exists      ", "✓".green());
            }
            "Preparing" | "Waiting" => {
                // 準備中は表示をスキップ（ノイズ軽減）
            }
            _ => {
                if status != last_status {
                    println!("\r  ℹ {}                    ", status);
                    *last_status = status.clone();
                }
            }
        }
    }
}
