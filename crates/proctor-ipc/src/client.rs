//! IPC client implementation

use proctor_api::{Command, Request, Response, ResponseResult, Snapshot};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to proctord
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
}

impl IpcClient {
    /// Connect to proctord
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
        })
    }

    /// Send a command and wait for response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        let line = read_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }

    /// Subscribe to snapshots and consume this client to return a stream
    pub async fn subscribe(mut self) -> IpcResult<SnapshotStream> {
        let response = self.send(Command::Subscribe).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(SnapshotStream {
            reader: self.reader,
        })
    }
}

/// Stream of snapshots from proctord
pub struct SnapshotStream {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
}

impl SnapshotStream {
    /// Wait for the next snapshot
    pub async fn next(&mut self) -> IpcResult<Snapshot> {
        let line = read_line(&mut self.reader).await?;
        Ok(serde_json::from_str(&line)?)
    }
}

async fn read_line(reader: &mut BufReader<tokio::net::unix::OwnedReadHalf>) -> IpcResult<String> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(IpcError::ConnectionClosed);
    }
    Ok(line.trim().to_string())
}
