//! Unix socket server speaking the newline-delimited event protocol.
//!
//! Each connection gets a reader task that parses [`ClientEvent`]s and a
//! single writer task that serializes [`ServerEvent`]s, so events from
//! concurrent producers never interleave mid-line.

use crate::defaults;
use crate::error::{DubError, Result};
use crate::ipc::protocol::{ClientEvent, ServerEvent};
use crate::pipeline::error::ErrorCode;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Outgoing half of a connection.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Incoming half of a connection. Yields `None` once the peer disconnects.
pub type EventReceiver = mpsc::UnboundedReceiver<ClientEvent>;

/// Serves one connection.
///
/// The connection is closed once `serve` returns and every event queued on
/// `outgoing` has been written.
#[async_trait::async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn serve(&self, incoming: EventReceiver, outgoing: EventSender);
}

#[derive(Debug, Clone)]
struct ServerState {
    shutdown: Arc<AtomicBool>,
}

impl ServerState {
    fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn set_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct IpcServer {
    socket_path: PathBuf,
    state: ServerState,
}

impl IpcServer {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            state: ServerState::new(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// `$XDG_RUNTIME_DIR/dubline.sock`, or `/tmp/dubline-<uid>.sock`.
    pub fn default_socket_path() -> PathBuf {
        if let Ok(xdg_runtime) = std::env::var("XDG_RUNTIME_DIR")
            && !xdg_runtime.is_empty()
        {
            PathBuf::from(xdg_runtime).join(defaults::SOCKET_NAME)
        } else {
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/dubline-{}.sock", uid))
        }
    }

    /// Binds the socket and serves connections until [`stop`](Self::stop).
    pub async fn start<H>(&self, handler: H) -> Result<()>
    where
        H: ConnectionHandler + 'static,
    {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| DubError::IpcSocket {
                message: format!("Failed to remove existing socket: {}", e),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| DubError::IpcSocket {
            message: format!("Failed to bind to socket: {}", e),
        })?;
        debug!(path = %self.socket_path.display(), "Listening");

        let handler = Arc::new(handler);

        while !self.state.is_shutdown() {
            // Poll the shutdown flag between accepts.
            let accepted =
                tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept())
                    .await;

            match accepted {
                Ok(Ok((stream, _))) => {
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            warn!("Connection ended with error: {}", e);
                        }
                    });
                }
                Ok(Err(e)) => {
                    return Err(DubError::IpcConnection {
                        message: format!("Failed to accept connection: {}", e),
                    });
                }
                Err(_) => continue,
            }
        }

        Ok(())
    }

    /// Stops accepting connections and removes the socket file.
    ///
    /// Connections already being served run to completion.
    pub fn stop(&self) -> Result<()> {
        self.state.set_shutdown();

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| DubError::IpcSocket {
                message: format!("Failed to remove socket file: {}", e),
            })?;
        }
        Ok(())
    }
}

async fn handle_connection<H>(stream: UnixStream, handler: Arc<H>) -> Result<()>
where
    H: ConnectionHandler,
{
    let (reader, writer) = stream.into_split();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();

    let writer_task = tokio::spawn(write_events(writer, out_rx));
    let reader_task = tokio::spawn(read_events(reader, in_tx, out_tx.clone()));

    handler.serve(in_rx, out_tx).await;

    // Dropping the reader's sender clone lets the writer finish.
    reader_task.abort();
    if let Err(e) = reader_task.await
        && !e.is_cancelled()
    {
        warn!("Reader task failed: {}", e);
    }

    writer_task.await.map_err(|e| DubError::Other(format!("Writer task failed: {}", e)))?
}

/// Parses one event per line. Malformed lines are answered with a
/// `protocol_error` and skipped.
async fn read_events(
    reader: OwnedReadHalf,
    incoming: mpsc::UnboundedSender<ClientEvent>,
    outgoing: EventSender,
) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!("Read failed: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match ClientEvent::from_json(line) {
            Ok(event) => {
                if incoming.send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Malformed event: {}", e);
                let reply = ServerEvent::error(
                    ErrorCode::ProtocolError,
                    format!("Failed to parse event: {}", e),
                    None,
                );
                if outgoing.send(reply).is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_events(
    mut writer: OwnedWriteHalf,
    mut outgoing: mpsc::UnboundedReceiver<ServerEvent>,
) -> Result<()> {
    while let Some(event) = outgoing.recv().await {
        let json = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(event = event.name(), "Failed to serialize event: {}", e);
                continue;
            }
        };

        let line = format!("{}\n", json);
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DubError::IpcConnection {
                message: format!("Failed to write to client: {}", e),
            })?;
    }

    writer.flush().await.map_err(|e| DubError::IpcConnection {
        message: format!("Failed to flush writer: {}", e),
    })?;
    writer.shutdown().await.map_err(|e| DubError::IpcConnection {
        message: format!("Failed to close connection: {}", e),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::StreamConfig;
    use tempfile::TempDir;

    /// Echoes every control event back as an error event naming it.
    struct EchoHandler;

    #[async_trait::async_trait]
    impl ConnectionHandler for EchoHandler {
        async fn serve(&self, mut incoming: EventReceiver, outgoing: EventSender) {
            while let Some(event) = incoming.recv().await {
                let done = matches!(event, ClientEvent::StreamEnd { .. });
                let echo = ServerEvent::error(ErrorCode::InternalError, event.name(), None);
                if outgoing.send(echo).is_err() || done {
                    break;
                }
            }
        }
    }

    async fn spawn_server(socket_path: PathBuf) -> tokio::task::JoinHandle<Result<()>> {
        let handle = tokio::spawn(async move {
            let server = IpcServer::new(socket_path);
            server.start(EchoHandler).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle
    }

    async fn read_all(stream: UnixStream) -> Vec<ServerEvent> {
        let mut lines = BufReader::new(stream).lines();
        let mut events = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            events.push(ServerEvent::from_json(&line).unwrap());
        }
        events
    }

    fn message(event: &ServerEvent) -> &str {
        match event {
            ServerEvent::Error(notice) => &notice.message,
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_default_socket_path_returns_valid_path() {
        let path = IpcServer::default_socket_path();
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) if !dir.is_empty() => {
                assert_eq!(path, PathBuf::from(dir).join("dubline.sock"));
            }
            _ => {
                let uid = unsafe { libc::getuid() };
                assert_eq!(path, PathBuf::from(format!("/tmp/dubline-{}.sock", uid)));
            }
        }
    }

    #[tokio::test]
    async fn test_server_binds_to_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let handle = spawn_server(socket_path.clone()).await;

        assert!(socket_path.exists());
        handle.abort();
    }

    #[tokio::test]
    async fn test_events_are_dispatched_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let handle = spawn_server(socket_path.clone()).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut payload = String::new();
        for event in [
            ClientEvent::StreamInit(StreamConfig::new("s")),
            ClientEvent::StreamPause { stream_id: "s".into() },
            ClientEvent::StreamEnd { stream_id: "s".into() },
        ] {
            payload.push_str(&event.to_json().unwrap());
            payload.push('\n');
        }
        stream.write_all(payload.as_bytes()).await.unwrap();

        let events = read_all(stream).await;
        let names: Vec<&str> = events.iter().map(message).collect();
        assert_eq!(names, vec!["stream:init", "stream:pause", "stream:end"]);
        handle.abort();
    }

    #[tokio::test]
    async fn test_malformed_line_keeps_connection_open() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let handle = spawn_server(socket_path.clone()).await;

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let end = ClientEvent::StreamEnd { stream_id: "s".into() }.to_json().unwrap();
        stream
            .write_all(format!("{{broken\n\n{}\n", end).as_bytes())
            .await
            .unwrap();

        let events = read_all(stream).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            ServerEvent::Error(notice) => assert_eq!(notice.code, ErrorCode::ProtocolError),
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert_eq!(message(&events[1]), "stream:end");
        handle.abort();
    }

    #[tokio::test]
    async fn test_multiple_concurrent_clients() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let handle = spawn_server(socket_path.clone()).await;

        let mut clients = Vec::new();
        for i in 0..5 {
            let socket_path = socket_path.clone();
            clients.push(tokio::spawn(async move {
                let mut stream = UnixStream::connect(&socket_path).await.unwrap();
                let end = ClientEvent::StreamEnd {
                    stream_id: format!("s{i}"),
                };
                stream
                    .write_all(format!("{}\n", end.to_json().unwrap()).as_bytes())
                    .await
                    .unwrap();
                read_all(stream).await
            }));
        }

        for client in clients {
            assert_eq!(client.await.unwrap().len(), 1);
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_stop_ends_accept_loop_and_removes_socket() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        let server = Arc::new(IpcServer::new(socket_path.clone()));

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.start(EchoHandler).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(socket_path.exists());

        server.stop().unwrap();
        let result = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!socket_path.exists());
    }
}
