//! Daemon process commands: `init`, `run`, `start`, `stop`, `status`.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tracing::info;

use skybot_control::{DaemonPing, SlotCommand, SlotSummary};
use skybot_daemon::pidfile::PidFile;
use skybot_daemon::DaemonRuntime;
use skybot_types::config::daemon_config_path;
use skybot_types::DaemonConfig;

use super::{client, load_config};

/// Write a default config file. Refuses to overwrite an existing one.
pub fn init(config: Option<&Path>) -> anyhow::Result<()> {
    let path = config.map(Path::to_path_buf).unwrap_or_else(daemon_config_path);
    write_default_config(&path)?;

    println!("Daemon config created at: {}", path.display());
    println!();
    println!("Adjust slot count, retry policy and blacklist, then start with:");
    println!("  skybot run");
    Ok(())
}

fn write_default_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!(
            "daemon config already exists at {}\nEdit it directly or remove it to reinitialize.",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DaemonConfig::default().to_toml()?)?;
    Ok(())
}

/// Run the daemon in the foreground until Ctrl-C or a `stop`.
pub fn run(config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let pid_file = PidFile::default_location();
    if let Some(pid) = pid_file.running_pid() {
        anyhow::bail!("Daemon already running (PID {pid}).\nUse `skybot stop` to stop it first.");
    }

    let mut runtime = DaemonRuntime::new(config)?.with_pid_file(pid_file);
    let shutdown = runtime.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nShutdown signal received...");
        shutdown.store(true, Ordering::Relaxed);
    })?;

    println!(
        "Daemon starting with {} slot(s), {} assigned...",
        runtime.orchestrator.slot_count(),
        runtime.orchestrator.occupied_count()
    );
    runtime.run()?;
    Ok(())
}

/// Start the daemon as a detached background process.
pub fn start(config: Option<&Path>) -> anyhow::Result<()> {
    if let Some(pid) = PidFile::default_location().running_pid() {
        println!("Daemon already running (PID {pid}).");
        return Ok(());
    }

    let binary = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("skybot"));
    let mut command = std::process::Command::new(&binary);
    command.arg("run");
    if let Some(path) = config {
        command.arg("--config").arg(path);
    }
    let child = command
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .stdin(std::process::Stdio::null())
        .spawn()?;

    info!(pid = child.id(), "daemon spawned");
    println!("Daemon started (PID {}).", child.id());
    Ok(())
}

pub fn stop(config: Option<&Path>) -> anyhow::Result<()> {
    let client = client(config)?;
    if !client.is_running() {
        println!("Daemon is not running.");
        return Ok(());
    }

    let response = client
        .send(&SlotCommand::Shutdown)
        .map_err(|e| anyhow::anyhow!("failed to send shutdown: {e}"))?;
    if response.ok {
        println!("Daemon shutdown requested.");
    } else {
        println!("Shutdown failed: {}", response.message);
    }
    Ok(())
}

/// Print daemon health followed by the slot table.
pub fn status(config: Option<&Path>) -> anyhow::Result<()> {
    let client = client(config)?;
    if !client.is_running() {
        println!("Daemon is not running.");
        return Ok(());
    }

    let ping = client
        .send(&SlotCommand::Ping)
        .map_err(|e| anyhow::anyhow!("failed to ping daemon: {e}"))?;
    if let Some(ping) = ping
        .data
        .and_then(|d| serde_json::from_value::<DaemonPing>(d).ok())
    {
        println!("Daemon status: running");
        println!("  PID:     {}", ping.daemon_pid);
        println!("  Uptime:  {}s", ping.uptime_secs);
        println!(
            "  Slots:   {} total, {} assigned, {} online",
            ping.slot_count, ping.occupied_count, ping.online_count
        );
        println!();
    }

    let response = client
        .send(&SlotCommand::Status)
        .map_err(|e| anyhow::anyhow!("failed to query slots: {e}"))?;
    if !response.ok {
        anyhow::bail!("{}", response.message);
    }
    let slots: Vec<SlotSummary> = serde_json::from_value(response.data.unwrap_or_default())?;
    for line in format_slot_table(&slots) {
        println!("{line}");
    }
    Ok(())
}

fn format_slot_table(slots: &[SlotSummary]) -> Vec<String> {
    let mut lines = vec![format!(
        "{:<5} {:<11} {:<32} {:<16} {:>7} {:>8}",
        "SLOT", "STATUS", "ENDPOINT", "OWNER", "ATTEMPT", "FAILURES"
    )];
    for s in slots {
        lines.push(format!(
            "{:<5} {:<11} {:<32} {:<16} {:>7} {:>8}",
            s.slot,
            s.status.to_string(),
            s.endpoint.as_deref().unwrap_or("-"),
            s.owner.as_deref().unwrap_or("-"),
            s.attempt,
            s.total_failures
        ));
    }
    lines
}
