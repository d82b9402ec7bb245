//! The `config` command.

use super::SessionOptions;
use lodestore_util::path::scoped_dir;

/// Print where configuration comes from and what it resolves to.
pub fn show_config(options: &SessionOptions) -> anyhow::Result<()> {
    let source = options
        .config_path
        .clone()
        .or_else(lodestore_util::path::config_file);
    let config = options.storage_config()?;

    println!("Configuration source:");
    match source {
        Some(path) if path.exists() => println!("  {}", path.display()),
        _ => println!("  (defaults)"),
    }
    println!();

    println!("Current configuration:");
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();

    let directory = config.storage_dir()?;
    println!(
        "Storage directory: {}",
        scoped_dir(&directory, options.workspace.as_deref()).display()
    );

    Ok(())
}
