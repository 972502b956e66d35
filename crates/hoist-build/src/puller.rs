//! イメージプル処理

use crate::auth::docker_credentials;
use crate::error::{BuildError, Result};
use bollard::Docker;
use bollard::models::CreateImageInfo;
use colored::Colorize;
use futures_util::StreamExt;
use hoist_registry::{Credentials, Image};
use std::io::Write;

/// レジストリからイメージを取得するハンドラ
pub struct ImagePuller {
    docker: Docker,
    quiet: bool,
}

impl ImagePuller {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            quiet: false,
        }
    }

    /// 進捗表示を抑止する
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// イメージの存在確認
    pub async fn exists(&self, reference: &str) -> Result<bool> {
        image_exists(&self.docker, reference).await
    }

    /// イメージをプル
    pub async fn pull(&self, image: &Image, credentials: &Credentials) -> Result<()> {
        let full_image = image.to_string();
        if !self.quiet {
            println!("  ↓ {}", full_image.cyan());
        }

        #[allow(deprecated)]
        let options = bollard::image::CreateImageOptions {
            from_image: image.name(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        let credentials = (!credentials.is_anonymous()).then(|| docker_credentials(credentials));

        #[allow(deprecated)]
        let mut stream = self.docker.create_image(Some(options), None, credentials);

        while let Some(info) = stream.next().await {
            match info {
                Ok(CreateImageInfo {
                    error: Some(message),
                    ..
                }) => {
                    return Err(BuildError::PullFailed {
                        image: full_image,
                        message,
                    });
                }
                Ok(CreateImageInfo {
                    status: Some(status),
                    progress,
                    ..
                }) if !self.quiet => {
                    // 進捗を表示（同じ行に上書き）
                    match progress {
                        Some(progress) => print!("\r  ↓ {}: {}", status, progress),
                        None => print!("\r  ↓ {}                    ", status),
                    }
                    std::io::stdout().flush().ok();
                }
                Err(e) => {
                    if !self.quiet {
                        println!();
                    }
                    return Err(BuildError::PullFailed {
                        image: full_image,
                        message: e.to_string(),
                    });
                }
                _ => {}
            }
        }

        if !self.quiet {
            println!();
            println!("  {} {}", "✓".green(), full_image);
        }
        tracing::info!(image = %full_image, "pulled image");
        Ok(())
    }
}

/// ローカルにイメージが存在するか
pub async fn image_exists(docker: &Docker, reference: &str) -> Result<bool> {
    match docker.inspect_image(reference).await {
        Ok(_) => Ok(true),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(false),
        Err(e) => Err(BuildError::DockerConnection(e)),
    }
}
