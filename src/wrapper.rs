//! The stream pump engine.
//!
//! # Architecture
//!
//! ```text
//! editor stdin  ──► client reader ──► [to server] ──► server writer ──► server stdin
//!                        │                 ▲
//!                  rejections         rejections
//!                        ▼                 │
//! editor stdout ◄── client writer ◄── [to client] ◄── server reader ◄── server stdout
//! ```
//!
//! Each reader decodes a message, resolves its correlation, runs the filter
//! pipeline and queues the result for the opposite writer. Rejected requests
//! are answered with an error on the reader's own return queue.
//!
//! All four pumps are polled together on one task. The first pump to finish,
//! for any reason, ends the session; the others are dropped with it.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::codec::{read_message, write_message, Message, DEFAULT_MAX_MESSAGE_SIZE};
use crate::config::WrapperConfig;
use crate::correlation::CorrelationTracker;
use crate::error::WrapperError;
use crate::filter::{default_filters, run_pipeline, Direction, Filter, FilterContext, FilterResult};

/// Error code sent back for requests dropped by a filter (LSP `RequestFailed`).
pub const REJECT_ERROR_CODE: i64 = -32803;

/// Error message sent back for requests dropped by a filter.
pub const REJECT_ERROR_MESSAGE: &str = "Request rejected by lsp-server-wrapper";

/// The four pump loops of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pump {
    /// Reads the editor's messages.
    ClientReader,
    /// Writes to the editor.
    ClientWriter,
    /// Reads the language server's messages.
    ServerReader,
    /// Writes to the language server.
    ServerWriter,
}

impl fmt::Display for Pump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pump::ClientReader => "client reader",
            Pump::ClientWriter => "client writer",
            Pump::ServerReader => "server reader",
            Pump::ServerWriter => "server writer",
        })
    }
}

/// One side's byte streams: where its messages come from and where replies go.
#[derive(Debug)]
pub struct StreamPair<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R, W> StreamPair<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

/// Producer half of a FIFO queue feeding one writer pump.
///
/// The queue never refuses a message; its depth is only measured so filters
/// can throttle. `None` on the channel is the end-of-stream sentinel.
/// Both halves stay on the engine's task, so the depth is a plain `Cell`.
#[derive(Debug, Clone)]
struct QueueSender {
    writer: Pump,
    tx: mpsc::UnboundedSender<Option<Message>>,
    depth: Rc<Cell<usize>>,
}

#[derive(Debug)]
struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<Option<Message>>,
    depth: Rc<Cell<usize>>,
}

fn message_queue(writer: Pump) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Rc::new(Cell::new(0));
    (
        QueueSender {
            writer,
            tx,
            depth: Rc::clone(&depth),
        },
        QueueReceiver { rx, depth },
    )
}

impl QueueSender {
    fn depth(&self) -> usize {
        self.depth.get()
    }

    fn push(&self, msg: Message) -> Result<(), WrapperError> {
        self.depth.set(self.depth.get() + 1);
        if self.tx.send(Some(msg)).is_err() {
            self.depth.set(self.depth.get() - 1);
            return Err(WrapperError::QueueClosed(self.writer));
        }
        Ok(())
    }

    /// Tell the writer no more messages are coming.
    fn close(&self) {
        let _ = self.tx.send(None);
    }
}

impl QueueReceiver {
    /// Next message, or `None` once the sentinel arrives or every sender is gone.
    async fn next(&mut self) -> Option<Message> {
        match self.rx.recv().await {
            Some(Some(msg)) => {
                self.depth.set(self.depth.get() - 1);
                Some(msg)
            }
            Some(None) | None => None,
        }
    }
}

/// Build the error response for a rejected request.
///
/// Notifications and responses have nobody waiting on them and get nothing.
pub fn rejection_response(msg: &Message) -> Option<Message> {
    if !msg.is_request() {
        return None;
    }
    let id = msg.id().cloned().unwrap_or(Value::Null);
    let response = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": REJECT_ERROR_CODE,
            "message": REJECT_ERROR_MESSAGE,
        },
    });
    match response {
        Value::Object(map) => Message::from_value(map).ok(),
        _ => None,
    }
}

/// A filtering, correlating proxy between one editor and one language server.
pub struct Wrapper {
    filters: Vec<Box<dyn Filter>>,
    tracker: CorrelationTracker,
    max_message_size: usize,
}

impl Wrapper {
    /// Create a wrapper with an explicit filter chain.
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        Self {
            filters,
            tracker: CorrelationTracker::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Create a wrapper with the default filters and limits from `config`.
    pub fn from_config(config: &WrapperConfig) -> Self {
        Self::new(default_filters(config)).with_max_message_size(config.max_message_size)
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    /// Proxy between `client` and `server` until one of the four pumps stops.
    ///
    /// `client.reader` is what the editor sends, `client.writer` is what it
    /// receives; `server.reader` is the language server's stdout and
    /// `server.writer` its stdin.
    ///
    /// Returns the pump that finished cleanly (EOF or sentinel), or the error
    /// that stopped it.
    pub async fn run<CR, CW, SR, SW>(
        &self,
        client: StreamPair<CR, CW>,
        server: StreamPair<SR, SW>,
    ) -> Result<Pump, WrapperError>
    where
        CR: AsyncRead + Unpin,
        CW: AsyncWrite + Unpin,
        SR: AsyncRead + Unpin,
        SW: AsyncWrite + Unpin,
    {
        let (to_server, to_server_rx) = message_queue(Pump::ServerWriter);
        let (to_client, to_client_rx) = message_queue(Pump::ClientWriter);

        let client_reader = self.read_pump(
            Pump::ClientReader,
            BufReader::new(client.reader),
            Direction::ClientToServer,
            to_server.clone(),
            to_client.clone(),
        );
        let server_reader = self.read_pump(
            Pump::ServerReader,
            BufReader::new(server.reader),
            Direction::ServerToClient,
            to_client,
            to_server,
        );
        let server_writer = write_pump(Pump::ServerWriter, to_server_rx, server.writer);
        let client_writer = write_pump(Pump::ClientWriter, to_client_rx, client.writer);

        let (pump, result) = tokio::select! {
            r = client_reader => (Pump::ClientReader, r),
            r = server_reader => (Pump::ServerReader, r),
            r = server_writer => (Pump::ServerWriter, r),
            r = client_writer => (Pump::ClientWriter, r),
        };

        match result {
            Ok(()) => {
                info!(
                    %pump,
                    pending_requests = self.tracker.pending_count(),
                    "pump finished, shutting down"
                );
                Ok(pump)
            }
            Err(e) => {
                error!(
                    %pump,
                    code = e.codec_code().unwrap_or("other"),
                    error = %e,
                    "pump failed, shutting down"
                );
                Err(e)
            }
        }
    }

    async fn read_pump<R>(
        &self,
        pump: Pump,
        mut reader: R,
        direction: Direction,
        forward: QueueSender,
        reply: QueueSender,
    ) -> Result<(), WrapperError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let next = read_message(&mut reader, self.max_message_size)
                .await
                .map_err(|source| WrapperError::Codec { pump, source })?;
            let Some(mut msg) = next else {
                info!(%pump, %direction, "got EOF, stop reading");
                forward.close();
                return Ok(());
            };

            self.tracker.attach_if_response(direction, &mut msg);

            let ctx = FilterContext {
                direction,
                downstream_queue_depth: forward.depth(),
            };
            let msg = match run_pipeline(&self.filters, &msg, &ctx) {
                FilterResult::Accept => msg,
                FilterResult::Replace(replacement) => {
                    debug!(%direction, id = ?msg.id(), "message replaced by filter");
                    replacement
                }
                FilterResult::Reject => {
                    debug!(
                        %direction,
                        id = ?msg.id(),
                        method = msg.method().unwrap_or(""),
                        "message rejected by filter"
                    );
                    if let Some(response) = rejection_response(&msg) {
                        reply.push(response)?;
                    }
                    continue;
                }
            };

            self.tracker.record_if_request(direction, &msg);
            forward.push(msg)?;
        }
    }
}

async fn write_pump<W>(pump: Pump, mut queue: QueueReceiver, mut writer: W) -> Result<(), WrapperError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = queue.next().await {
        match write_message(&mut writer, &msg).await {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => {
                info!(%pump, error = %e, "peer closed its end, stop writing");
                return Ok(());
            }
            Err(source) => return Err(WrapperError::Codec { pump, source }),
        }
    }
    info!(%pump, "finished writing");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(value: Value) -> Message {
        match value {
            Value::Object(map) => Message::from_value(map).expect("valid message"),
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_rejection_response_for_request() {
        let request = message(json!({"jsonrpc": "2.0", "id": 7, "method": "textDocument/hover"}));
        let response = rejection_response(&request).expect("requests get a response");

        assert_eq!(
            Value::Object(response.value().clone()),
            json!({
                "jsonrpc": "2.0",
                "id": 7,
                "error": {"code": -32803, "message": "Request rejected by lsp-server-wrapper"}
            })
        );
        assert!(response.is_response());
    }

    #[test]
    fn test_rejection_response_keeps_string_ids() {
        let request = message(json!({"jsonrpc": "2.0", "id": "abc", "method": "m"}));
        let response = rejection_response(&request).unwrap();
        assert_eq!(response.id(), Some(&json!("abc")));
    }

    #[test]
    fn test_no_rejection_response_for_notifications_or_responses() {
        let notification = message(json!({"jsonrpc": "2.0", "method": "m"}));
        let reply = message(json!({"jsonrpc": "2.0", "id": 1, "result": null}));
        assert!(rejection_response(&notification).is_none());
        assert!(rejection_response(&reply).is_none());
    }

    #[tokio::test]
    async fn test_queue_depth_tracks_pending_messages() {
        let (tx, mut rx) = message_queue(Pump::ServerWriter);
        let msg = message(json!({"jsonrpc": "2.0", "method": "m"}));

        tx.push(msg.clone()).unwrap();
        tx.push(msg.clone()).unwrap();
        assert_eq!(tx.depth(), 2);

        assert_eq!(rx.next().await, Some(msg));
        assert_eq!(tx.depth(), 1);

        rx.next().await;
        tx.close();
        assert_eq!(rx.next().await, None);
        assert_eq!(tx.depth(), 0);
    }

    #[tokio::test]
    async fn test_push_after_writer_gone_is_queue_closed() {
        let (tx, rx) = message_queue(Pump::ClientWriter);
        drop(rx);

        let err = tx.push(message(json!({"jsonrpc": "2.0", "method": "m"}))).unwrap_err();
        assert!(matches!(err, WrapperError::QueueClosed(Pump::ClientWriter)));
        assert_eq!(tx.depth(), 0);
    }

    #[test]
    fn test_pump_display() {
        assert_eq!(Pump::ServerWriter.to_string(), "server writer");
    }
}
