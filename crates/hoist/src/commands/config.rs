//! hoist config

use crate::ConfigCommands;
use colored::Colorize;
use hoist_config::{ConfigError, ConfigFlags, DEFAULT_CONFIG, edit_config, init_config, read_config};
use hoist_registry::Resolver;

pub fn handle(command: ConfigCommands, flags: &ConfigFlags) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Init { save } => {
            if !save {
                print!("{}", DEFAULT_CONFIG);
                return Ok(());
            }
            let path = flags.target_path()?;
            match init_config(&path) {
                Ok(()) => {
                    println!("{}", "✓ 設定ファイルを作成しました".green());
                    println!("  {}", path.display().to_string().cyan());
                }
                Err(ConfigError::AlreadyExists(path)) => {
                    println!("{} は既に存在します", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        ConfigCommands::View => {
            let path = flags.config_path()?;
            print!("{}", read_config(&path)?);
        }
        ConfigCommands::Edit => {
            let path = flags.target_path()?;
            edit_config(&path)?;
        }
        ConfigCommands::Check => {
            let path = flags.config_path()?;
            let resolver = Resolver::from_file(&path)?;
            let failures = resolver.aggregate().verify_all();
            if !failures.is_empty() {
                for (name, err) in &failures {
                    eprintln!("{}: invalid config: {}", name.red(), err);
                }
                anyhow::bail!("{} 件のレジストリ設定が不正です", failures.len());
            }
            println!("OK!");
        }
        ConfigCommands::GetRegistries => {
            let path = flags.config_path()?;
            let resolver = Resolver::from_file(&path)?;
            for name in resolver.aggregate().names() {
                println!("{}", name);
            }
        }
    }
    Ok(())
}
