//! Slot commands sent to a running daemon over the control socket.

use std::path::Path;

use skybot_control::{LogLine, SlotCommand, SlotResponse};

use super::client;

fn request(config: Option<&Path>, command: &SlotCommand) -> anyhow::Result<SlotResponse> {
    let client = client(config)?;
    if !client.is_running() {
        anyhow::bail!("Daemon is not running. Start it with `skybot start`.");
    }
    let response = client.send(command).map_err(|e| anyhow::anyhow!("{e}"))?;
    if !response.ok {
        anyhow::bail!("{}", response.message);
    }
    Ok(response)
}

pub fn launch(
    config: Option<&Path>,
    slot: usize,
    endpoint: &str,
    owner: &str,
) -> anyhow::Result<()> {
    let response = request(
        config,
        &SlotCommand::Launch {
            slot,
            endpoint: endpoint.to_string(),
            owner: owner.to_string(),
        },
    )?;
    println!("{}", response.message);
    Ok(())
}

pub fn edit(config: Option<&Path>, slot: usize, endpoint: &str, owner: &str) -> anyhow::Result<()> {
    let response = request(
        config,
        &SlotCommand::Edit {
            slot,
            endpoint: endpoint.to_string(),
            owner: owner.to_string(),
        },
    )?;
    println!("{}", response.message);
    Ok(())
}

pub fn cancel(config: Option<&Path>, slot: usize, owner: &str) -> anyhow::Result<()> {
    let response = request(
        config,
        &SlotCommand::Cancel {
            slot,
            owner: owner.to_string(),
        },
    )?;
    println!("{}", response.message);
    Ok(())
}

pub fn send(config: Option<&Path>, slot: usize, text: &str) -> anyhow::Result<()> {
    let response = request(
        config,
        &SlotCommand::Send {
            slot,
            text: text.to_string(),
        },
    )?;
    println!("{}", response.message);
    Ok(())
}

pub fn logs(config: Option<&Path>, slot: usize) -> anyhow::Result<()> {
    let response = request(config, &SlotCommand::Logs { slot })?;
    let lines: Vec<LogLine> = serde_json::from_value(response.data.unwrap_or_default())?;
    if lines.is_empty() {
        println!("(slot {slot} has no log lines)");
    }
    for line in &lines {
        println!("{}", format_log_line(line));
    }
    Ok(())
}

fn format_log_line(line: &LogLine) -> String {
    format!("[{}] {}", line.timestamp.format("%Y-%m-%d %H:%M:%S"), line.text)
}
