//! Status command handler

use anyhow::{Context, Result};

use resync_core::Config;

use crate::output::{Output, OutputFormat};

/// Number of reconnect delays to preview
const SCHEDULE_PREVIEW: u32 = 6;

/// Show the effective target and reconnect policy
pub fn show(config: &Config, output: &Output) -> Result<()> {
    let target = config.target().context("Invalid target in configuration")?;
    let options = config.session_options();
    let schedule: Vec<u128> = options
        .backoff
        .schedule(SCHEDULE_PREVIEW)
        .iter()
        .map(|delay| delay.as_millis())
        .collect();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "target": target.url(),
                    "secure": target.is_secure(),
                    "heartbeat_secs": options.heartbeat_interval.as_secs(),
                    "probe_token": options.probe_token,
                    "ack_token": options.ack_token,
                    "reconnect_delays_ms": schedule
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", target);
        }
        OutputFormat::Human => {
            let delays: Vec<String> = schedule.iter().map(|ms| format!("{}ms", ms)).collect();

            println!("Resync Status");
            println!("=============");
            println!();
            println!("Target:");
            println!("  URL:       {}", target);
            println!("  TLS:       {}", if target.is_secure() { "yes" } else { "no" });
            println!();
            println!("Liveness:");
            println!("  Interval:  {}s", options.heartbeat_interval.as_secs());
            println!("  Probe:     {}", options.probe_token);
            println!("  Ack:       {}", options.ack_token);
            println!();
            println!("Reconnect:");
            println!("  Delays:    {}, ...", delays.join(", "));
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}
