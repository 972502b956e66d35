//! hoist pull

use crate::commands::load_resolver;
use crate::docker;
use colored::Colorize;
use hoist_build::ImagePuller;
use hoist_config::ConfigFlags;
use hoist_registry::{Image, RegistryBackend};

pub async fn handle(image: &str, flags: &ConfigFlags) -> anyhow::Result<()> {
    let docker = docker::connect().await?;
    let puller = ImagePuller::new(docker);

    if puller.exists(image).await? {
        println!("{} {} はローカルに存在します", "✓".green(), image);
        return Ok(());
    }

    let resolver = load_resolver(flags)?;
    let backend = resolver.resolve_by_image_reference(image).await;
    tracing::debug!(image, registry = backend.name(), "resolved registry");

    let credentials = backend.fetch_credentials().await?;
    puller.pull(&Image::parse(image), &credentials).await?;
    Ok(())
}
