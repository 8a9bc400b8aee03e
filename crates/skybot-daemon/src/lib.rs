//! Skybot daemon: keeps a fixed pool of game-server connection slots alive.
//!
//! One process owns a table of slots. Each occupied slot holds a connection
//! to a remote server and reconnects on its own when that connection drops,
//! until its failure budget runs out and the slot is released.
//!
//! # Architecture
//!
//! - [`orchestrator::Orchestrator`]: owns the slot table, applies every operation
//! - [`slot::Slot`]: runtime state for one slot
//! - [`attempt`]: retry state machine, pure
//! - [`validator`]: endpoint format, blacklist and duplicate checks
//! - [`store`]: JSON snapshot of slot assignments
//! - [`log_buffer`]: bounded per-slot log
//! - [`client`]: game connection seam and the TCP line client
//! - [`control`]: Unix socket server for external control
//! - [`pidfile`]: single-instance guard
//!
//! All slot state lives on the thread that calls [`DaemonRuntime::run`].
//! Connection tasks and the control server run on a tokio runtime and only
//! talk to that thread through channels.

pub mod attempt;
pub mod client;
pub mod control;
pub mod log_buffer;
pub mod orchestrator;
pub mod pidfile;
pub mod slot;
pub mod store;
pub mod validator;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use skybot_control::{DaemonPing, LogLine, SlotCommand, SlotResponse};
use skybot_types::{DaemonConfig, SkybotError, SlotError};

use crate::client::{GameClient, SlotEvent, TcpLineClient};
use crate::control::ControlRx;
use crate::orchestrator::Orchestrator;
use crate::pidfile::PidFile;
use crate::store::SnapshotStore;

/// The daemon: main loop around the orchestrator and the control plane.
pub struct DaemonRuntime {
    pub orchestrator: Orchestrator,
    pub config: DaemonConfig,
    pub shutdown: Arc<AtomicBool>,
    pub started_at: Instant,
    events_rx: mpsc::Receiver<SlotEvent>,
    pid_file: PidFile,
    runtime: tokio::runtime::Runtime,
}

impl DaemonRuntime {
    /// Build a daemon that connects slots with the TCP line client.
    pub fn new(config: DaemonConfig) -> Result<Self, SkybotError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("skybot-io")
            .enable_all()
            .build()
            .map_err(|e| SkybotError::Daemon(format!("failed to start async runtime: {e}")))?;
        let client = TcpLineClient::new(
            runtime.handle().clone(),
            Duration::from_secs(config.client.connect_timeout_secs),
        );
        Self::with_client(config, runtime, Box::new(client))
    }

    /// Build a daemon around any [`GameClient`].
    ///
    /// `runtime` drives the control server; the client may or may not use it.
    pub fn with_client(
        config: DaemonConfig,
        runtime: tokio::runtime::Runtime,
        client: Box<dyn GameClient>,
    ) -> Result<Self, SkybotError> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::channel();
        let store = SnapshotStore::new(config.state_path());
        let orchestrator = Orchestrator::new(&config, store, client, events_tx);

        Ok(Self {
            orchestrator,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
            events_rx,
            pid_file: PidFile::default_location(),
            runtime,
        })
    }

    /// Use a PID file other than `~/.skybot/daemon.pid`.
    pub fn with_pid_file(mut self, pid_file: PidFile) -> Self {
        self.pid_file = pid_file;
        self
    }

    /// Flag that stops [`run`](Self::run) at the next tick when set.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Run until the shutdown flag is set.
    ///
    /// Refuses to start while another live daemon holds the PID file.
    /// On exit every connection is closed but slot assignments are kept, so
    /// the next start reconnects them.
    pub fn run(&mut self) -> Result<(), SkybotError> {
        if let Some(pid) = self.pid_file.running_pid() {
            return Err(SkybotError::Daemon(format!(
                "daemon already running (PID {pid})"
            )));
        }
        self.pid_file.write().map_err(SkybotError::Daemon)?;

        let (cmd_rx, control_thread) = match control::spawn_control_server(
            self.config.control.socket_path.clone(),
            Arc::clone(&self.shutdown),
            self.runtime.handle().clone(),
        ) {
            Ok(server) => server,
            Err(e) => {
                self.pid_file.remove();
                return Err(SkybotError::Daemon(e));
            }
        };

        info!(
            slots = self.orchestrator.slot_count(),
            occupied = self.orchestrator.occupied_count(),
            socket = %self.config.control.socket_path.display(),
            "daemon starting"
        );
        self.orchestrator.start_all();

        let tick = self.config.tick_interval();
        while !self.shutdown.load(Ordering::Relaxed) {
            self.drain_commands(&cmd_rx);
            // Wait on connection events; the timeout paces the reconnect timers.
            if let Ok(event) = self.events_rx.recv_timeout(tick) {
                self.orchestrator.handle_event(event);
            }
            self.drain_events();
            self.orchestrator.tick();
        }

        info!("daemon shutting down");
        self.orchestrator.stop_all();
        if control_thread.join().is_err() {
            warn!("control server thread panicked");
        }
        self.pid_file.remove();
        info!("daemon shutdown complete");
        Ok(())
    }

    fn drain_commands(&mut self, cmd_rx: &ControlRx) {
        while let Ok((cmd, reply_tx)) = cmd_rx.try_recv() {
            let response = self.handle_command(cmd);
            let _ = reply_tx.send(response);
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.orchestrator.handle_event(event);
        }
    }

    /// Execute one control command against the slot table.
    pub fn handle_command(&mut self, cmd: SlotCommand) -> SlotResponse {
        match cmd {
            SlotCommand::Ping => {
                let ping = DaemonPing {
                    uptime_secs: self.uptime_secs(),
                    slot_count: self.orchestrator.slot_count(),
                    occupied_count: self.orchestrator.occupied_count(),
                    online_count: self.orchestrator.online_count(),
                    daemon_pid: std::process::id(),
                };
                data_response("pong", &ping)
            }

            SlotCommand::Status => {
                let summaries = self.orchestrator.status();
                data_response(format!("{} slots", summaries.len()), &summaries)
            }

            SlotCommand::Logs { slot } => match self.orchestrator.logs(slot) {
                Ok(entries) => {
                    let lines: Vec<LogLine> = entries.iter().map(LogLine::from).collect();
                    data_response(format!("{} lines", lines.len()), &lines)
                }
                Err(e) => SlotResponse::error(e.to_string()),
            },

            SlotCommand::Launch {
                slot,
                endpoint,
                owner,
            } => op_response(
                self.orchestrator.launch(slot, &endpoint, &owner),
                format!("slot {slot} launched"),
            ),

            SlotCommand::Edit {
                slot,
                endpoint,
                owner,
            } => op_response(
                self.orchestrator.edit(slot, &endpoint, &owner),
                format!("slot {slot} now targets {endpoint}"),
            ),

            SlotCommand::Cancel { slot, owner } => op_response(
                self.orchestrator.cancel(slot, &owner),
                format!("slot {slot} released"),
            ),

            SlotCommand::Send { slot, text } => match self.orchestrator.send_command(slot, &text) {
                Ok(true) => SlotResponse::ok(format!("sent to slot {slot}")),
                Ok(false) => {
                    SlotResponse::ok(format!("slot {slot} is not online; command dropped"))
                }
                Err(e) => SlotResponse::error(e.to_string()),
            },

            SlotCommand::Shutdown => {
                info!("shutdown requested over control socket");
                self.shutdown.store(true, Ordering::Relaxed);
                SlotResponse::ok("shutting down")
            }
        }
    }
}

fn op_response(result: Result<(), SlotError>, success: String) -> SlotResponse {
    match result {
        Ok(()) => SlotResponse::ok(success),
        Err(e) => {
            warn!(error = %e, "slot operation rejected");
            SlotResponse::error(e.to_string())
        }
    }
}

fn data_response(message: impl Into<String>, data: &impl serde::Serialize) -> SlotResponse {
    match serde_json::to_value(data) {
        Ok(value) => SlotResponse::ok_with_data(message, value),
        Err(e) => SlotResponse::error(format!("serialization failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::RecordingClient;
    use skybot_control::SlotSummary;

    struct TestDaemon {
        daemon: DaemonRuntime,
        client: RecordingClient,
        _dir: tempfile::TempDir,
    }

    fn test_daemon() -> TestDaemon {
        let dir = tempfile::tempdir().unwrap();
        let mut config = DaemonConfig::default();
        config.slots.count = 3;
        config.state_path = Some(dir.path().join("slots.json"));
        config.control.socket_path = dir.path().join("daemon.sock");

        let client = RecordingClient::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let daemon = DaemonRuntime::with_client(config, runtime, Box::new(client.clone()))
            .unwrap()
            .with_pid_file(PidFile::new(dir.path().join("daemon.pid")));
        TestDaemon {
            daemon,
            client,
            _dir: dir,
        }
    }

    fn launch(d: &mut DaemonRuntime, slot: usize, endpoint: &str, owner: &str) -> SlotResponse {
        d.handle_command(SlotCommand::Launch {
            slot,
            endpoint: endpoint.into(),
            owner: owner.into(),
        })
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = DaemonConfig::default();
        config.slots.count = 0;
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let result =
            DaemonRuntime::with_client(config, runtime, Box::new(RecordingClient::default()));
        assert!(matches!(result, Err(SkybotError::Config(_))));
    }

    #[test]
    fn ping_reports_counts() {
        let mut t = test_daemon();
        assert!(launch(&mut t.daemon, 0, "a.example.com:1", "alice").ok);

        let resp = t.daemon.handle_command(SlotCommand::Ping);
        assert!(resp.ok);
        let ping: DaemonPing = serde_json::from_value(resp.data.unwrap()).unwrap();
        assert_eq!(ping.slot_count, 3);
        assert_eq!(ping.occupied_count, 1);
        assert_eq!(ping.online_count, 0);
        assert_eq!(ping.daemon_pid, std::process::id());
    }

    #[test]
    fn launch_then_status() {
        let mut t = test_daemon();
        let resp = launch(&mut t.daemon, 1, "play.example.com:25565", "alice");
        assert!(resp.ok, "{}", resp.message);
        assert_eq!(t.client.connects().len(), 1);

        let resp = t.daemon.handle_command(SlotCommand::Status);
        let summaries: Vec<SlotSummary> = serde_json::from_value(resp.data.unwrap()).unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[1].endpoint.as_deref(), Some("play.example.com:25565"));
        assert_eq!(summaries[1].owner.as_deref(), Some("alice"));
    }

    #[test]
    fn rejected_operations_carry_error_text() {
        let mut t = test_daemon();
        let resp = launch(&mut t.daemon, 0, "localhost:25565", "alice");
        assert!(!resp.ok);
        assert!(resp.message.contains("not allowed"), "{}", resp.message);

        let resp = t.daemon.handle_command(SlotCommand::Cancel {
            slot: 2,
            owner: "alice".into(),
        });
        assert!(!resp.ok);
        assert_eq!(resp.message, "slot 2 is empty");

        let resp = t.daemon.handle_command(SlotCommand::Logs { slot: 9 });
        assert!(!resp.ok);
    }

    #[test]
    fn edit_and_cancel_through_commands() {
        let mut t = test_daemon();
        launch(&mut t.daemon, 0, "a.example.com:1", "alice");

        let resp = t.daemon.handle_command(SlotCommand::Edit {
            slot: 0,
            endpoint: "b.example.com:2".into(),
            owner: "bob".into(),
        });
        assert!(!resp.ok);
        assert_eq!(resp.message, "slot 0 belongs to another owner");

        let resp = t.daemon.handle_command(SlotCommand::Edit {
            slot: 0,
            endpoint: "b.example.com:2".into(),
            owner: "alice".into(),
        });
        assert!(resp.ok);

        let resp = t.daemon.handle_command(SlotCommand::Cancel {
            slot: 0,
            owner: "alice".into(),
        });
        assert!(resp.ok);
        assert_eq!(t.daemon.orchestrator.occupied_count(), 0);
    }

    #[test]
    fn logs_are_returned_oldest_first() {
        let mut t = test_daemon();
        launch(&mut t.daemon, 0, "a.example.com:1", "alice");
        let resp = t.daemon.handle_command(SlotCommand::Logs { slot: 0 });
        let lines: Vec<LogLine> = serde_json::from_value(resp.data.unwrap()).unwrap();
        assert!(lines[0].text.starts_with("launched for a.example.com:1"));
        assert!(lines[1].text.starts_with("connecting to a.example.com:1 as SKYBOT_0_"));
    }

    #[test]
    fn send_to_offline_slot_is_not_an_error() {
        let mut t = test_daemon();
        let resp = t.daemon.handle_command(SlotCommand::Send {
            slot: 0,
            text: "/list".into(),
        });
        assert!(resp.ok);
        assert!(resp.message.contains("not online"));
        assert!(t.client.sent().is_empty());
    }

    #[test]
    fn queued_events_are_applied_by_drain() {
        let mut t = test_daemon();
        launch(&mut t.daemon, 0, "a.example.com:1", "alice");
        let request = t.client.connects()[0].clone();

        // Stand-in for the connection task reporting through its sink.
        let sink_tx = t.daemon.orchestrator.event_sender();
        sink_tx
            .send(SlotEvent {
                slot: 0,
                generation: request.generation,
                event: crate::attempt::ConnectionEvent::Login,
            })
            .unwrap();
        t.daemon.drain_events();

        assert_eq!(t.daemon.orchestrator.online_count(), 1);
        let resp = t.daemon.handle_command(SlotCommand::Send {
            slot: 0,
            text: "/list".into(),
        });
        assert_eq!(resp.message, "sent to slot 0");
    }

    #[test]
    fn shutdown_command_sets_flag() {
        let mut t = test_daemon();
        let flag = t.daemon.shutdown_flag();
        assert!(!flag.load(Ordering::Relaxed));
        assert!(t.daemon.handle_command(SlotCommand::Shutdown).ok);
        assert!(flag.load(Ordering::Relaxed));
    }

    #[test]
    fn run_refuses_when_another_daemon_holds_pid_file() {
        let mut t = test_daemon();
        let mut other = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid_path = t._dir.path().join("daemon.pid");
        std::fs::write(&pid_path, other.id().to_string()).unwrap();

        let err = t.daemon.run().unwrap_err();
        assert!(err.to_string().contains("already running"));
        assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), other.id().to_string());

        other.kill().unwrap();
        other.wait().unwrap();
    }
}
