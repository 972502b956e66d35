//! hoist cp

use crate::commands::{destination, load_resolver};
use crate::docker;
use crate::utils::print_info;
use colored::Colorize;
use hoist_build::{ImagePuller, ImagePusher};
use hoist_config::ConfigFlags;
use hoist_registry::{Image, RegistryBackend, has_explicit_tag};

pub async fn handle(
    image: &str,
    registry: Option<&str>,
    save_image: bool,
    flags: &ConfigFlags,
) -> anyhow::Result<()> {
    let resolver = load_resolver(flags)?;
    let destination = destination(&resolver, registry.or(flags.registry()))?;

    let docker = docker::connect().await?;
    let puller = ImagePuller::new(docker.clone());
    let pusher = ImagePusher::new(docker);

    let mut source = image.to_string();
    if !puller.exists(&source).await? {
        // ローカルに無ければコピー元のレジストリから取得
        let backend = resolver.resolve_by_image_reference(&source).await;
        tracing::debug!(image = %source, registry = backend.name(), "resolved source registry");
        if !has_explicit_tag(&source) {
            let tag = backend.latest_tag(&Image::parse(&source).repo).await?;
            source = format!("{}:{}", source, tag);
        }
        let credentials = backend.fetch_credentials().await?;
        print_info(&format!("Pulling {}", source.cyan()));
        puller.pull(&Image::parse(&source), &credentials).await?;
    }

    let from = Image::parse(&source);
    destination.create_repo_if_not_exists(&from.repo).await?;
    let target = from.with_domain(destination.domain_prefix().await?);

    pusher.tag(&source, &target).await?;
    let credentials = destination.fetch_credentials().await?;
    print_info(&format!("Pushing {}", target.to_string().cyan()));
    let pushed = pusher.push(&target, &credentials).await?;

    if !save_image {
        for name in [source.as_str(), pushed.as_str()] {
            if let Err(e) = pusher.remove(name).await {
                eprintln!("  {} {}: {}", "⚠".yellow(), name, e);
            }
        }
    }

    println!("{} {}", "✓".green(), pushed);
    Ok(())
}
