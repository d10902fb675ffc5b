//! Watch command handler

use anyhow::{Context, Result};
use chrono::Local;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use resync_core::{Config, ConnectionStatus, Session, StateUpdate};

use crate::output::Output;

/// Apply the command-line target overrides to a loaded config
fn effective_config(config: &Config, target: Option<String>, session: Option<String>) -> Config {
    let mut config = config.clone();
    if let Some(target) = target {
        config.server_url = target;
    }
    if session.is_some() {
        config.session = session;
    }
    config
}

/// Follow a session until Ctrl-C or until `count` snapshots have arrived
pub async fn watch(
    config: &Config,
    target: Option<String>,
    session: Option<String>,
    count: Option<u64>,
    output: &Output,
) -> Result<()> {
    let config = effective_config(config, target, session);
    let target = config.target().context("Cannot watch this target")?;

    let (snapshot_tx, mut snapshots) = mpsc::unbounded_channel();
    let mut session = Session::connect(
        target,
        config.session_options(),
        move |update: StateUpdate<Value>| {
            // Receiver is gone once watch returns
            let _ = snapshot_tx.send(update.state);
        },
    );
    let mut status = session.subscribe_status();
    output.message(&format!("Watching {} (Ctrl-C to stop)", session.target()));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut received: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }

            Some(state) = snapshots.recv() => {
                output.print_snapshot(&state, &Local::now());
                received += 1;
                if count.is_some_and(|limit| received >= limit) {
                    break;
                }
            }

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                if current == ConnectionStatus::Reconnecting {
                    debug!(attempt = session.attempt(), "Waiting to reconnect");
                }
                output.print_status(current, &Local::now());
            }
        }
    }

    session.stop();
    info!(
        session = %session.label(),
        snapshots = received,
        "Stopped watching"
    );

    Ok(())
}
