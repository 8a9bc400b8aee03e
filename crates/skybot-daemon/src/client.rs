//! Seam to the remote game connection.
//!
//! The orchestrator never speaks a game protocol itself. It asks a
//! [`GameClient`] to open a connection and gets back a [`ConnectionHandle`]
//! for sending text and tearing down. Lifecycle events flow back through an
//! [`EventSink`] tagged with the slot and connection generation, so events
//! from a superseded connection can be told apart and dropped.

use std::sync::mpsc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc as async_mpsc;
use tracing::debug;

use skybot_types::{Endpoint, SlotError};

use crate::attempt::ConnectionEvent;

/// A lifecycle event from one specific connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotEvent {
    pub slot: usize,
    pub generation: u64,
    pub event: ConnectionEvent,
}

/// Everything a client needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub slot: usize,
    pub generation: u64,
    pub endpoint: Endpoint,
    pub identity: String,
}

/// Sender half for a single connection's events.
#[derive(Debug, Clone)]
pub struct EventSink {
    slot: usize,
    generation: u64,
    tx: mpsc::Sender<SlotEvent>,
}

impl EventSink {
    pub fn new(slot: usize, generation: u64, tx: mpsc::Sender<SlotEvent>) -> Self {
        Self {
            slot,
            generation,
            tx,
        }
    }

    /// Report an event. Dropped silently if the daemon loop is gone.
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.tx.send(SlotEvent {
            slot: self.slot,
            generation: self.generation,
            event,
        });
    }
}

/// A live connection.
pub trait ConnectionHandle: Send {
    /// Send one line of text to the server.
    fn send_text(&mut self, line: &str) -> Result<(), SlotError>;
    /// Tear the connection down. Idempotent.
    fn disconnect(&mut self);
}

/// Opens connections to game servers.
pub trait GameClient: Send {
    /// Start connecting. Progress is reported through `events`; an `Err`
    /// here means the attempt could not even be started.
    fn connect(
        &mut self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn ConnectionHandle>, SlotError>;
}

enum Outbound {
    Line(String),
    Disconnect,
}

/// Line-oriented TCP client.
///
/// Sends the bot identity as the first line, reports `Login` and `Spawn`
/// once the socket is up, forwards every received line as `Message`, and
/// reports `End` when the socket closes for any reason.
pub struct TcpLineClient {
    runtime: tokio::runtime::Handle,
    connect_timeout: Duration,
}

impl TcpLineClient {
    pub fn new(runtime: tokio::runtime::Handle, connect_timeout: Duration) -> Self {
        Self {
            runtime,
            connect_timeout,
        }
    }
}

impl GameClient for TcpLineClient {
    fn connect(
        &mut self,
        request: ConnectRequest,
        events: EventSink,
    ) -> Result<Box<dyn ConnectionHandle>, SlotError> {
        let (tx, rx) = async_mpsc::unbounded_channel();
        self.runtime
            .spawn(run_connection(request, self.connect_timeout, rx, events));
        Ok(Box::new(TcpLineHandle { tx }))
    }
}

struct TcpLineHandle {
    tx: async_mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle for TcpLineHandle {
    fn send_text(&mut self, line: &str) -> Result<(), SlotError> {
        self.tx
            .send(Outbound::Line(line.to_string()))
            .map_err(|_| SlotError::ConnectionFailed("connection closed".into()))
    }

    fn disconnect(&mut self) {
        let _ = self.tx.send(Outbound::Disconnect);
    }
}

async fn run_connection(
    request: ConnectRequest,
    connect_timeout: Duration,
    mut outbound: async_mpsc::UnboundedReceiver<Outbound>,
    events: EventSink,
) {
    let addr = request.endpoint.to_string();
    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            events.emit(ConnectionEvent::Error(e.to_string()));
            events.emit(ConnectionEvent::End);
            return;
        }
        Err(_) => {
            events.emit(ConnectionEvent::Error(format!(
                "connect timed out after {}s",
                connect_timeout.as_secs()
            )));
            events.emit(ConnectionEvent::End);
            return;
        }
    };

    let (reader, mut writer) = stream.into_split();
    let hello = format!("{}\n", request.identity);
    if let Err(e) = writer.write_all(hello.as_bytes()).await {
        events.emit(ConnectionEvent::Error(e.to_string()));
        events.emit(ConnectionEvent::End);
        return;
    }
    events.emit(ConnectionEvent::Login);
    events.emit(ConnectionEvent::Spawn);

    let mut lines = BufReader::new(reader).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => events.emit(ConnectionEvent::Message(line)),
                Ok(None) => break,
                Err(e) => {
                    events.emit(ConnectionEvent::Error(e.to_string()));
                    break;
                }
            },
            out = outbound.recv() => match out {
                Some(Outbound::Line(mut line)) => {
                    line.push('\n');
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        events.emit(ConnectionEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Disconnect) | None => break,
            },
        }
    }

    let _ = writer.shutdown().await;
    debug!(
        slot = request.slot,
        generation = request.generation,
        endpoint = %addr,
        "connection closed"
    );
    events.emit(ConnectionEvent::End);
}


#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    fn recv_event(rx: &mpsc::Receiver<SlotEvent>) -> ConnectionEvent {
        rx.recv_timeout(Duration::from_secs(5))
            .expect("event should arrive")
            .event
    }

    #[test]
    fn event_sink_tags_slot_and_generation() {
        let (tx, rx) = mpsc::channel();
        EventSink::new(3, 9, tx).emit(ConnectionEvent::Spawn);
        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent {
                slot: 3,
                generation: 9,
                event: ConnectionEvent::Spawn
            }
        );
    }

    #[test]
    fn tcp_client_reports_lifecycle_and_sends_lines() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = rt.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = tokio::io::BufReader::new(reader).lines();
            let identity = lines.next_line().await.unwrap().unwrap();
            writer.write_all(b"welcome\n").await.unwrap();
            let command = lines.next_line().await.unwrap().unwrap();
            (identity, command)
        });

        let (tx, rx) = mpsc::channel();
        let mut client = TcpLineClient::new(rt.handle().clone(), Duration::from_secs(5));
        let request = ConnectRequest {
            slot: 0,
            generation: 1,
            endpoint: Endpoint::new("127.0.0.1", port),
            identity: "SKYBOT_0_1234".into(),
        };
        let mut handle = client.connect(request, EventSink::new(0, 1, tx)).unwrap();

        assert_eq!(recv_event(&rx), ConnectionEvent::Login);
        assert_eq!(recv_event(&rx), ConnectionEvent::Spawn);
        assert_eq!(recv_event(&rx), ConnectionEvent::Message("welcome".into()));

        handle.send_text("/say hello").unwrap();
        let (identity, command) = rt.block_on(server).unwrap();
        assert_eq!(identity, "SKYBOT_0_1234");
        assert_eq!(command, "/say hello");

        assert_eq!(recv_event(&rx), ConnectionEvent::End);
    }

    #[test]
    fn tcp_client_reports_refused_connection() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let (tx, rx) = mpsc::channel();
        let mut client = TcpLineClient::new(rt.handle().clone(), Duration::from_secs(5));
        let request = ConnectRequest {
            slot: 1,
            generation: 4,
            endpoint: Endpoint::new("127.0.0.1", port),
            identity: "SKYBOT_1_1000".into(),
        };
        let _handle = client.connect(request, EventSink::new(1, 4, tx)).unwrap();

        assert!(matches!(recv_event(&rx), ConnectionEvent::Error(_)));
        assert_eq!(recv_event(&rx), ConnectionEvent::End);
    }

    #[test]
    fn disconnect_ends_connection() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let listener = rt.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = rt.spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the socket open until the client goes away.
            let mut lines = tokio::io::BufReader::new(stream).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let (tx, rx) = mpsc::channel();
        let mut client = TcpLineClient::new(rt.handle().clone(), Duration::from_secs(5));
        let request = ConnectRequest {
            slot: 2,
            generation: 1,
            endpoint: Endpoint::new("127.0.0.1", port),
            identity: "SKYBOT_2_5555".into(),
        };
        let mut handle = client.connect(request, EventSink::new(2, 1, tx)).unwrap();
        assert_eq!(recv_event(&rx), ConnectionEvent::Login);
        assert_eq!(recv_event(&rx), ConnectionEvent::Spawn);

        handle.disconnect();
        assert_eq!(recv_event(&rx), ConnectionEvent::End);
    }
}
