//! IPC server implementation

use proctor_api::{Command, ErrorCode, ErrorInfo, Request, Response, ResponsePayload};
use proctor_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{HubHandle, IpcError, IpcResult, SnapshotLine};

/// Message from client to server
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// What the connection writer puts on the wire
enum Outbound {
    Line(String),
    /// Switch the connection to snapshot streaming
    Stream(mpsc::Receiver<SnapshotLine>),
}

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    hub: HubHandle,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>, hub: HubHandle) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            hub,
            clients: Arc::new(RwLock::new(HashMap::new())),
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove existing socket if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Dashboard and admin tools run in the same group as the service
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    info!(client_id = %client_id, "Client connected");
                    self.handle_client(stream, client_id).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId) {
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                outbound: outbound_tx.clone(),
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
        });

        let message_tx = self.message_tx.clone();
        let hub = self.hub.clone();
        let reader_id = client_id.clone();

        // Reader: requests go to the service, subscriptions are handled here
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(client_id = %reader_id, "Client disconnected (EOF)");
                        break;
                    }
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }

                        let request = match serde_json::from_str::<Request>(line) {
                            Ok(request) => request,
                            Err(e) => {
                                warn!(client_id = %reader_id, error = %e, "Invalid request");
                                let response = Response::error(
                                    0,
                                    ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                                );
                                if let Ok(json) = serde_json::to_string(&response) {
                                    let _ = outbound_tx.send(Outbound::Line(json));
                                }
                                continue;
                            }
                        };

                        if matches!(request.command, Command::Subscribe) {
                            subscribe(&hub, &reader_id, request.request_id, &outbound_tx).await;
                            continue;
                        }

                        let _ = message_tx.send(ServerMessage::Request {
                            client_id: reader_id.clone(),
                            request,
                        });
                    }
                    Err(e) => {
                        debug!(client_id = %reader_id, error = %e, "Read error");
                        break;
                    }
                }
            }
        });

        let clients_writer = self.clients.clone();
        let message_tx_writer = self.message_tx.clone();

        // Writer: responses, then snapshot lines once subscribed
        tokio::spawn(async move {
            let mut writer = write_half;
            let mut stream: Option<mpsc::Receiver<SnapshotLine>> = None;

            loop {
                let line = tokio::select! {
                    out = outbound_rx.recv() => match out {
                        Some(Outbound::Line(line)) => line,
                        Some(Outbound::Stream(rx)) => {
                            stream = Some(rx);
                            continue;
                        }
                        None => break,
                    },
                    snapshot = next_snapshot(&mut stream) => match snapshot {
                        Some(line) => line.to_string(),
                        None => {
                            debug!(client_id = %client_id, "Dropped by broadcast hub");
                            break;
                        }
                    },
                };

                let mut msg = line;
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %client_id, error = %e, "Write error");
                    break;
                }
            }

            let _ = message_tx_writer.send(ServerMessage::ClientDisconnected {
                client_id: client_id.clone(),
            });

            clients_writer.write().await.remove(&client_id);
        });
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .outbound
                .send(Outbound::Line(json))
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn subscribe(
    hub: &HubHandle,
    client_id: &ClientId,
    request_id: u64,
    outbound: &mpsc::UnboundedSender<Outbound>,
) {
    let response = match hub.subscribe(client_id.clone()).await {
        Ok(rx) => {
            let ok = Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            );
            // The response must precede the first snapshot line
            send_line(outbound, &ok);
            let _ = outbound.send(Outbound::Stream(rx));
            info!(client_id = %client_id, "Client subscribed to snapshots");
            return;
        }
        Err(e) => Response::error(request_id, ErrorInfo::new(ErrorCode::NotReady, e.to_string())),
    };
    send_line(outbound, &response);
}

fn send_line(outbound: &mpsc::UnboundedSender<Outbound>, response: &Response) {
    match serde_json::to_string(response) {
        Ok(json) => {
            let _ = outbound.send(Outbound::Line(json));
        }
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

async fn next_snapshot(stream: &mut Option<mpsc::Receiver<SnapshotLine>>) -> Option<SnapshotLine> {
    match stream {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BroadcastHub, IpcClient};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let (_tx, rx) = mpsc::channel(1);
        let hub = BroadcastHub::start(rx, 4);

        let mut server = IpcServer::new(&socket_path, hub.handle());
        server.start().await.unwrap();

        assert!(socket_path.exists());
        server.shutdown();
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn requests_are_forwarded_and_answered() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let (_tx, rx) = mpsc::channel(1);
        let hub = BroadcastHub::start(rx, 4);

        let mut server = IpcServer::new(&socket_path, hub.handle());
        server.start().await.unwrap();
        let mut messages = server.take_message_receiver().await.unwrap();
        let server = Arc::new(server);

        let accept = server.clone();
        tokio::spawn(async move { accept.run().await });

        let responder = server.clone();
        tokio::spawn(async move {
            while let Some(msg) = messages.recv().await {
                if let ServerMessage::Request { client_id, request } = msg {
                    let response = Response::success(request.request_id, ResponsePayload::Pong);
                    let _ = responder.send_response(&client_id, response).await;
                }
            }
        });

        let mut client = IpcClient::connect(&socket_path).await.unwrap();
        let response = client.send(Command::Ping).await.unwrap();
        assert_eq!(response.request_id, 1);
        assert!(matches!(
            response.result,
            proctor_api::ResponseResult::Ok(ResponsePayload::Pong)
        ));
    }
}
