//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use shoplist_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "store_url": config.store_url,
                    "api_key": config.api_key.as_deref().map(mask),
                    "share_base_url": config.share_base_url,
                    "reconnect_initial_ms": config.reconnect_initial_ms,
                    "reconnect_max_ms": config.reconnect_max_ms,
                    "heartbeat_secs": config.heartbeat_secs
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.store_url.as_deref().unwrap_or(""));
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!(
                "  store_url:            {}",
                config.store_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  api_key:              {}",
                config
                    .api_key
                    .as_deref()
                    .map(mask)
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  share_base_url:       {}", config.share_base_url);
            println!("  reconnect_initial_ms: {}", config.reconnect_initial_ms);
            println!("  reconnect_max_ms:     {}", config.reconnect_max_ms);
            println!("  heartbeat_secs:       {}", config.heartbeat_secs);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "api_key" { mask(&value) } else { value };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| {
        if value.is_empty() || value == "none" {
            None
        } else {
            Some(value.to_string())
        }
    };

    match key {
        "store_url" => config.store_url = optional(value),
        "api_key" => config.api_key = optional(value),
        "share_base_url" => {
            if value.is_empty() {
                bail!("share_base_url cannot be empty");
            }
            config.share_base_url = value.to_string();
        }
        "reconnect_initial_ms" => {
            config.reconnect_initial_ms = value
                .parse()
                .context("Invalid value for reconnect_initial_ms. Use a number of milliseconds.")?;
        }
        "reconnect_max_ms" => {
            config.reconnect_max_ms = value
                .parse()
                .context("Invalid value for reconnect_max_ms. Use a number of milliseconds.")?;
        }
        "heartbeat_secs" => {
            config.heartbeat_secs = value
                .parse()
                .context("Invalid value for heartbeat_secs. Use a number of seconds.")?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: store_url, api_key, share_base_url, reconnect_initial_ms, \
                 reconnect_max_ms, heartbeat_secs",
                key
            );
        }
    }
    Ok(())
}

/// Hide all but the last four characters of a secret
fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
