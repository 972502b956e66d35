//! hoist build

use crate::commands::{destination, load_resolver};
use crate::utils::{confirm, default_image_name, normalize_image_name, print_info};
use crate::{docker, git};
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use hoist_build::dockerfile::{parse_build_args, parse_key_values};
use hoist_build::{
    BuildRequest, BuildSession, ConsoleRenderer, CredentialCache, DockerDaemon, ImagePusher,
    InlineTransport, validate_tag,
};
use hoist_config::ConfigFlags;
use hoist_registry::{Image, RegistryBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// ビルドコンテキスト（省略時はカレントディレクトリ）
    pub path: Option<PathBuf>,

    /// Dockerfile のパス（相対パスはコンテキスト基準）
    #[arg(short = 'f', long = "file", default_value = "Dockerfile")]
    pub file: PathBuf,

    /// イメージ名（省略時はコンテキストのディレクトリ名）
    #[arg(long)]
    pub image_name: Option<String>,

    /// タグ（省略時は git のタグ、なければ <branch>-<commit>）
    #[arg(short = 't', long = "tag-name")]
    pub tag: Option<String>,

    /// ビルド引数（KEY=VALUE。KEY のみなら同名の環境変数から取る）
    #[arg(long = "build-arg", value_name = "KEY[=VALUE]")]
    pub build_args: Vec<String>,

    /// イメージに付けるラベル
    #[arg(long = "label", value_name = "KEY=VALUE")]
    pub labels: Vec<String>,

    /// ビルドするステージ
    #[arg(long)]
    pub target: Option<String>,

    /// キャッシュを使わずにビルド
    #[arg(long)]
    pub no_cache: bool,

    /// ベースイメージを常に取得し直す
    #[arg(long)]
    pub pull: bool,

    /// ビルド後にプッシュしない
    #[arg(long)]
    pub no_push: bool,

    /// 確認をすべて yes で進める
    #[arg(short = 'y', long = "no-confirm")]
    pub yes: bool,
}

/// Dockerfile の場所（相対パスはコンテキスト基準）
fn resolve_dockerfile(context: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        context.join(file)
    }
}

pub async fn handle(
    args: BuildArgs,
    flags: &ConfigFlags,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let context = match &args.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let context = std::fs::canonicalize(&context)
        .with_context(|| format!("ビルドコンテキストが見つかりません: {}", context.display()))?;
    let dockerfile = resolve_dockerfile(&context, &args.file);

    let name = args
        .image_name
        .clone()
        .or_else(|| default_image_name(&context))
        .ok_or_else(|| anyhow::anyhow!("イメージ名を --image-name で指定してください"))?;
    let name = normalize_image_name(&name);

    let resolver = Arc::new(load_resolver(flags)?);
    let destination = destination(&resolver, flags.registry())?;

    if !args.yes
        && git::has_changes(&context)
        && !confirm("未コミットの変更があります。ビルドを続けますか？", true)?
    {
        println!("{}", "ビルドをキャンセルしました".yellow());
        return Ok(());
    }

    let tag = match &args.tag {
        Some(tag) => tag.clone(),
        None => git::resolve_tag(&context)?,
    };
    validate_tag(&tag)?;

    let prefix = destination.domain_prefix().await?;
    let image = Image::new(prefix, name, tag);
    let reference = image.to_string();

    tracing::info!(
        registry = destination.name(),
        image = %reference,
        "building image"
    );

    let docker = docker::connect().await?;
    let credentials = Arc::new(CredentialCache::new(resolver.clone()));
    let session = BuildSession::new(
        Arc::new(DockerDaemon::new(docker.clone())),
        Arc::new(InlineTransport),
        credentials,
    );

    let mut request = BuildRequest::new(&context, &dockerfile, &reference);
    request.build_args = parse_build_args(&args.build_args);
    request.labels = parse_key_values(&args.labels);
    request.platform = Some(flags.platform());
    request.target = args.target.clone();
    request.no_cache = args.no_cache;
    request.pull = args.pull;

    print_info(&format!("イメージをビルドします: {}", reference.cyan()));
    let renderer = ConsoleRenderer::new(&reference);
    let outcome = session.run(request, Box::new(renderer), cancel).await?;
    if let Some(id) = &outcome.image_id {
        tracing::debug!(image_id = %id, "built image");
    }
    println!("{} イメージのビルドに成功しました", "✓".green());

    if args.no_push {
        return Ok(());
    }

    destination.create_repo_if_not_exists(&image.repo).await?;
    let push_credentials = destination.fetch_credentials().await?;

    print_info("イメージをプッシュします");
    let pushed = ImagePusher::new(docker)
        .push(&image, &push_credentials)
        .await?;

    println!();
    println!("{}", "✓ イメージをプッシュしました:".green());
    println!("{}", pushed);
    Ok(())
}
