//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use resync_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const KEYS: &str = "server_url, session, base_delay_ms, max_delay_ms, heartbeat_secs, \
                    probe_token, ack_token, log_level, log_file";

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&config).context("Failed to serialize config")?
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  server_url:     {}", config.server_url);
            println!(
                "  session:        {}",
                config.session.as_deref().unwrap_or("(not set)")
            );
            println!("  base_delay_ms:  {}", config.base_delay_ms);
            println!("  max_delay_ms:   {}", config.max_delay_ms);
            println!("  heartbeat_secs: {}", config.heartbeat_secs);
            println!("  probe_token:    {}", config.probe_token);
            println!("  ack_token:      {}", config.ack_token);
            println!("  log_level:      {}", config.log_level);
            println!(
                "  log_file:       {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
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

    match key.as_str() {
        "server_url" => {
            config.server_url = value.clone();
        }
        "session" => {
            config.session = optional(&value);
        }
        "base_delay_ms" => {
            config.base_delay_ms = parse_number(&key, &value)?;
        }
        "max_delay_ms" => {
            config.max_delay_ms = parse_number(&key, &value)?;
        }
        "heartbeat_secs" => {
            config.heartbeat_secs = parse_number(&key, &value)?;
        }
        "probe_token" => {
            config.probe_token = value.clone();
        }
        "ack_token" => {
            config.ack_token = value.clone();
        }
        "log_level" => {
            config.log_level = value.clone();
        }
        "log_file" => {
            config.log_file = optional(&value).map(PathBuf::from);
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                KEYS
            );
        }
    }

    // Refuse to write a file that would not load again
    config.validate()?;
    config.target()?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

/// Empty or "none" clears an optional setting
fn optional(value: &str) -> Option<String> {
    if value.is_empty() || value == "none" {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid value for {}. Expected a whole number.", key))
}
