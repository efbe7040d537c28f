//! Client side of the event protocol.

use crate::error::{DubError, Result};
use crate::ipc::protocol::{ClientEvent, ServerEvent};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

/// A connection to a running dubline service.
pub struct DubClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl DubClient {
    /// Connects to the service socket.
    ///
    /// # Errors
    /// Returns `DubError::IpcConnection` if nothing is listening at `socket_path`.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket_path)
            .await
            .map_err(|e| DubError::IpcConnection {
                message: format!(
                    "Failed to connect to {}: {}",
                    socket_path.display(),
                    e
                ),
            })?;

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        let json = event.to_json().map_err(|e| DubError::IpcProtocol {
            message: format!("Failed to serialize {}: {}", event.name(), e),
        })?;

        self.writer
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| DubError::IpcConnection {
                message: format!("Failed to write event: {}", e),
            })?;
        self.writer
            .flush()
            .await
            .map_err(|e| DubError::IpcConnection {
                message: format!("Failed to flush writer: {}", e),
            })
    }

    /// Next event from the service, or `None` once it closes the connection.
    pub async fn next_event(&mut self) -> Result<Option<ServerEvent>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| DubError::IpcConnection {
                    message: format!("Failed to read event: {}", e),
                })?;

            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }

            let event =
                ServerEvent::from_json(line.trim()).map_err(|e| DubError::IpcProtocol {
                    message: format!("Failed to deserialize event: {}", e),
                })?;
            return Ok(Some(event));
        }
    }

    /// Closes the sending direction. Events already in flight can still be read.
    pub async fn finish_sending(&mut self) -> Result<()> {
        self.writer
            .shutdown()
            .await
            .map_err(|e| DubError::IpcConnection {
                message: format!("Failed to close connection: {}", e),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::{ConnectionHandler, EventReceiver, EventSender, IpcServer};
    use crate::pipeline::error::ErrorCode;
    use tempfile::TempDir;

    /// Answers each event with an error event carrying the stream id.
    struct MockHandler;

    #[async_trait::async_trait]
    impl ConnectionHandler for MockHandler {
        async fn serve(&self, mut incoming: EventReceiver, outgoing: EventSender) {
            while let Some(event) = incoming.recv().await {
                let stream_id = match &event {
                    ClientEvent::StreamInit(init) => init.stream_id.clone(),
                    ClientEvent::FragmentData(fragment) => fragment.stream_id.clone(),
                    ClientEvent::StreamPause { stream_id }
                    | ClientEvent::StreamResume { stream_id }
                    | ClientEvent::StreamEnd { stream_id } => stream_id.clone(),
                };
                let reply =
                    ServerEvent::error(ErrorCode::InternalError, event.name(), Some(&stream_id));
                if outgoing.send(reply).is_err() {
                    break;
                }
            }
        }
    }

    async fn start_server(socket_path: std::path::PathBuf) {
        tokio::spawn(async move {
            let server = IpcServer::new(socket_path);
            server.start(MockHandler).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(socket_path.clone()).await;

        let mut client = DubClient::connect(&socket_path).await.unwrap();
        client
            .send(&ClientEvent::StreamPause {
                stream_id: "talk".into(),
            })
            .await
            .unwrap();

        match client.next_event().await.unwrap() {
            Some(ServerEvent::Error(notice)) => {
                assert_eq!(notice.message, "stream:pause");
                assert_eq!(notice.stream_id.as_deref(), Some("talk"));
            }
            other => panic!("expected echoed event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_next_event_returns_none_after_close() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("test.sock");
        start_server(socket_path.clone()).await;

        let mut client = DubClient::connect(&socket_path).await.unwrap();
        client
            .send(&ClientEvent::StreamEnd {
                stream_id: "talk".into(),
            })
            .await
            .unwrap();
        client.finish_sending().await.unwrap();

        assert!(client.next_event().await.unwrap().is_some());
        assert!(client.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket_fails() {
        let temp_dir = TempDir::new().unwrap();
        let socket_path = temp_dir.path().join("missing.sock");

        match DubClient::connect(&socket_path).await {
            Err(DubError::IpcConnection { message }) => {
                assert!(message.contains("missing.sock"), "got: {}", message);
            }
            Err(other) => panic!("expected IpcConnection error, got {:?}", other),
            Ok(_) => panic!("expected connection failure"),
        }
    }
}
