//! IPC client implementation
//!
//! Used by the platform bridge, UI shells and tetherd's socket tests.

use std::collections::VecDeque;
use std::path::Path;
use tether_api::{Command, ErrorCode, Event, Request, Response, ResponsePayload, ResponseResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use crate::{IpcError, IpcResult};

/// IPC client for connecting to tetherd
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    next_request_id: u64,
    /// Events that arrived while waiting for a response
    pending_events: VecDeque<Event>,
}

impl IpcClient {
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    async fn read_line(&mut self) -> IpcResult<String> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }
        Ok(line)
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let mut json = serde_json::to_string(&Request::new(request_id, command))?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await?;

        loop {
            let line = self.read_line().await?;
            let value: serde_json::Value = serde_json::from_str(line.trim())?;

            if value.get("request_id").is_some() {
                let response: Response = serde_json::from_value(value)?;
                // request_id 0 answers a line the server could not parse
                if response.request_id == request_id || response.request_id == 0 {
                    return Ok(response);
                }
                continue;
            }

            let event: Event = serde_json::from_value(value)
                .map_err(|e| IpcError::InvalidMessage(e.to_string()))?;
            self.pending_events.push_back(event);
        }
    }

    /// Send a command and unwrap a successful payload
    pub async fn request(&mut self, command: Command) -> IpcResult<ResponsePayload> {
        match self.send(command).await?.result {
            ResponseResult::Ok(payload) => Ok(payload),
            ResponseResult::Err(e) => Err(IpcError::ServerError(format!(
                "{}: {}",
                error_code_name(e.code),
                e.message
            ))),
        }
    }

    pub async fn ping(&mut self) -> IpcResult<()> {
        match self.request(Command::Ping).await? {
            ResponsePayload::Pong => Ok(()),
            other => Err(IpcError::InvalidMessage(format!(
                "Unexpected reply to ping: {:?}",
                other
            ))),
        }
    }

    /// Report cumulative usage minutes; returns the level that fired, if any
    pub async fn report_usage(&mut self, minutes: u32) -> IpcResult<Option<u8>> {
        match self.request(Command::ReportUsage { minutes }).await? {
            ResponsePayload::UsageRecorded { level } => Ok(level),
            other => Err(IpcError::InvalidMessage(format!(
                "Unexpected reply to usage report: {:?}",
                other
            ))),
        }
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        self.request(Command::SubscribeEvents).await?;

        Ok(EventStream {
            reader: self.reader,
            _writer: self.writer,
            pending: self.pending_events,
        })
    }
}

fn error_code_name(code: ErrorCode) -> String {
    serde_json::to_value(code)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", code))
}

/// Stream of events from tetherd
pub struct EventStream {
    reader: BufReader<OwnedReadHalf>,
    /// Dropping the write half shuts the socket for writing, which the
    /// server reads as a disconnect
    _writer: OwnedWriteHalf,
    pending: VecDeque<Event>,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }

        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let event: Event = serde_json::from_str(line.trim())?;
        Ok(event)
    }
}
