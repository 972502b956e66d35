mod commands;
mod docker;
mod git;
mod utils;

use clap::{Parser, Subcommand};
use colored::Colorize;
use hoist_build::BuildError;
use hoist_config::{CONFIG_ENV, ConfigFlags, REGISTRY_ENV};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "コンテナイメージをビルドし、各クラウドのレジストリへ届ける", long_about = None)]
struct Cli {
    /// 設定ファイルのパス
    #[arg(long, global = true, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// 使用するレジストリ（省略時は設定ファイルの default-registry）
    #[arg(short, long, global = true, env = REGISTRY_ENV)]
    registry: Option<String>,

    /// ビルド対象のプラットフォーム（例: linux/amd64）
    #[arg(short, long, global = true)]
    platform: Option<String>,

    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dockerイメージをビルドしてレジストリにプッシュ
    #[command(visible_alias = "b")]
    Build(commands::build::BuildArgs),
    /// イメージを別のレジストリにコピー
    Cp {
        /// コピー元のイメージ
        image: String,
        /// コピー先のレジストリ名（省略時は --registry または default-registry）
        registry: Option<String>,
        /// コピー後もローカルのイメージを残す
        #[arg(long)]
        save_image: bool,
    },
    /// クラウドのレジストリからイメージを取得
    Pull {
        /// 取得するイメージ
        image: String,
    },
    /// 設定ファイルの操作
    #[command(subcommand)]
    Config(ConfigCommands),
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// 設定ファイルの雛形を表示
    Init {
        /// 雛形を設定ファイルとして保存
        #[arg(long)]
        save: bool,
    },
    /// 設定ファイルの内容を表示
    View,
    /// エディタ（$EDITOR）で設定ファイルを開く
    Edit,
    /// 全レジストリの設定を検証
    Check,
    /// 定義されているレジストリを一覧表示
    GetRegistries,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Ctrl-C で実行中のビルドを中止する
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("{}", "中断しています...".yellow());
                token.cancel();
            }
        }
    });
    token
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let flags = ConfigFlags {
        config: cli.config,
        registry: cli.registry,
        platform: cli.platform,
    };

    match cli.command {
        Commands::Build(args) => {
            let cancel = cancel_on_ctrl_c();
            commands::build::handle(args, &flags, &cancel).await?;
        }
        Commands::Cp {
            image,
            registry,
            save_image,
        } => {
            commands::cp::handle(&image, registry.as_deref(), save_image, &flags).await?;
        }
        Commands::Pull { image } => {
            commands::pull::handle(&image, &flags).await?;
        }
        Commands::Config(config_cmd) => {
            commands::config::handle(config_cmd, &flags)?;
        }
        Commands::Version => {
            println!("hoist {}", env!("CARGO_PKG_VERSION"));
            println!(
                "platform: {}/{}",
                std::env::consts::OS,
                std::env::consts::ARCH
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        let code = match e.downcast_ref::<BuildError>() {
            Some(build_err) if build_err.is_cancelled() => {
                eprintln!("{}", "ビルドを中止しました".yellow());
                130
            }
            Some(build_err) => {
                eprintln!("{} {}", "Error:".red().bold(), build_err.user_message());
                1
            }
            None => {
                eprintln!("{} {:#}", "Error:".red().bold(), e);
                1
            }
        };
        std::process::exit(code);
    }
}
