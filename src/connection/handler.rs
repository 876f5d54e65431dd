//! Per-Client Connection Loop
//!
//! ```text
//! read bytes ──> parse frames ──> execute ──> queue reply
//!     ▲                                           │
//!     └──────────── flush replies ◄───────────────┘
//! ```
//!
//! TCP is a stream, so a read may hold half a frame or several frames. Bytes
//! accumulate in a `BytesMut` until the parser reports a whole frame; every
//! complete frame in the buffer is executed in order before the replies are
//! flushed together.
//!
//! A frame that can never parse gets an error reply. The buffered bytes are
//! dropped and the connection stays open.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::{Request, RespParser, RespValue};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Maximum bytes buffered for unfinished frames: one maximal bulk token plus
/// the same again for the rest of its frame.
const MAX_BUFFER_SIZE: usize = 2 * MAX_BULK_SIZE;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// One connected client.
pub struct ConnectionHandler {
    stream: BufWriter<TcpStream>,
    addr: SocketAddr,
    buffer: BytesMut,
    command_handler: CommandHandler,
    parser: RespParser,
    /// Serialized replies waiting for the next flush
    out: Vec<u8>,
}

impl ConnectionHandler {
    pub fn new(stream: TcpStream, addr: SocketAddr, command_handler: CommandHandler) -> Self {
        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RespParser::new(),
            out: Vec::with_capacity(INITIAL_BUFFER_SIZE),
        }
    }

    /// Serves the client until it disconnects or the socket fails.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected"),
            Err(ConnectionError::ClientDisconnected) => {
                info!(client = %self.addr, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "Connection reset by client")
            }
            Err(ConnectionError::BufferFull) => {
                warn!(client = %self.addr, "Request exceeds buffer limit, closing");
                let reply = RespValue::error("ERR request exceeds the maximum buffer size");
                let _ = self.stream.write_all(&reply.serialize()).await;
                let _ = self.stream.flush().await;
            }
            Err(e) => warn!(client = %self.addr, error = %e, "Connection error"),
        }

        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(reply) = self.next_reply().await {
                reply.serialize_into(&mut self.out);
            }

            if !self.out.is_empty() {
                self.flush_replies().await?;
            }

            self.read_more_data().await?;
        }
    }

    /// Executes the next buffered frame, or turns a malformed one into an
    /// error reply. `None` means the buffer holds no complete frame.
    async fn next_reply(&mut self) -> Option<RespValue> {
        match self.try_parse_request() {
            Ok(Some(request)) => {
                debug!(client = %self.addr, command = %request.name, "Executing");
                Some(self.command_handler.execute(request).await)
            }
            Ok(None) => None,
            Err(reply) => Some(reply),
        }
    }

    fn try_parse_request(&mut self) -> Result<Option<Request>, RespValue> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((request, consumed))) => {
                let _ = self.buffer.split_to(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed request"
                );
                Ok(Some(request))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete frame, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error, discarding buffer");
                self.buffer.clear();
                Err(RespValue::error(format!("ERR {}", e)))
            }
        }
    }

    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    async fn flush_replies(&mut self) -> Result<(), ConnectionError> {
        self.stream.write_all(&self.out).await?;
        self.stream.flush().await?;
        trace!(client = %self.addr, bytes = self.out.len(), "Sent replies");
        self.out.clear();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client disconnected")]
    ClientDisconnected,

    /// The client hung up in the middle of a frame
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Runs a [`ConnectionHandler`] to completion. Errors end only this
/// connection and are not reported further.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, command_handler: CommandHandler) {
    let handler = ConnectionHandler::new(stream, addr, command_handler);
    if let Err(e) = handler.run().await {
        trace!(client = %addr, error = %e, "Connection task finished");
    }
}
