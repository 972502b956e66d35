use colored::Colorize;
use std::io::Write;
use std::path::Path;

/// 進行状況の見出しを表示
pub fn print_info(message: &str) {
    println!("{} {}", "==>".blue().bold(), message.bold());
}

/// y/n の確認。空入力は `default` を返す
pub fn confirm(message: &str, default: bool) -> anyhow::Result<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    print!("{} {}: ", message, hint);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(parse_answer(&input, default))
}

fn parse_answer(input: &str, default: bool) -> bool {
    match input.trim().to_lowercase().as_str() {
        "" => default,
        "y" | "yes" => true,
        "n" | "no" => false,
        _ => default,
    }
}

/// イメージ名に大文字は使えないため小文字に変換する
pub fn normalize_image_name(name: &str) -> String {
    if !name.chars().any(char::is_uppercase) {
        return name.to_string();
    }
    let lowered = name.to_lowercase();
    eprintln!(
        "{} イメージ名に大文字は使えないため `{}` に変更しました",
        "WARNING:".yellow().bold(),
        lowered
    );
    lowered
}

/// ビルドコンテキストのディレクトリ名
pub fn default_image_name(context: &Path) -> Option<String> {
    context
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
}
