//! Byte-stream transport
//!
//! The server speaks over a duplex byte stream. Inbound bytes are handed
//! to the frame decoder exactly as they arrive; outbound frames are
//! written through to completion (written and flushed) before the next
//! one is accepted, which is the single-slot write gate. UTF-8 concerns
//! live in the frame codec, not here: the wire format is line-delimited,
//! so the decoder only ever converts whole lines.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stdin, Stdout};
use tracing::trace;

/// Bytes pulled off stdin per read.
const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Duplex byte-stream the server runs on.
#[async_trait]
pub trait Transport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write one outbound frame to completion.
    async fn send(&mut self, frame: &str) -> Result<(), Self::Error>;

    /// Wait for the next chunk of inbound bytes.
    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error>;

    /// Close the transport.
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Whether the transport is still usable.
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stdio Transport Implementation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StdioTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Input stream reached end of file")]
    Eof,

    #[error("Transport is closed")]
    Closed,
}

/// Transport over the process's own stdin/stdout.
///
/// Reads and writes happen directly on the handles; the event loop owns
/// the transport, so sequentially awaited `send` calls are all the
/// serialization the write path needs.
pub struct StdioTransport {
    stdin: Stdin,
    stdout: Stdout,
    chunk: Box<[u8; READ_CHUNK_SIZE]>,
    open: bool,
}

impl StdioTransport {
    pub fn new(stdin: Stdin, stdout: Stdout) -> Self {
        Self {
            stdin,
            stdout,
            chunk: Box::new([0u8; READ_CHUNK_SIZE]),
            open: true,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    type Error = StdioTransportError;

    async fn send(&mut self, frame: &str) -> Result<(), Self::Error> {
        if !self.open {
            return Err(StdioTransportError::Closed);
        }
        trace!("StdioTransport: writing {} bytes", frame.len());
        self.stdout.write_all(frame.as_bytes()).await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.open {
            return Err(StdioTransportError::Closed);
        }
        let read = self.stdin.read(&mut self.chunk[..]).await?;
        if read == 0 {
            self.open = false;
            return Err(StdioTransportError::Eof);
        }
        Ok(self.chunk[..read].to_vec())
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open
    }
}

// ============================================================================
// Mock Transport Implementation
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Scripted input exhausted")]
    OutOfInput,
}

/// Mock transport for tests: replays scripted inbound chunks and records
/// every frame written.
#[allow(dead_code)]
pub struct MockTransport {
    input: VecDeque<Vec<u8>>,
    written: Arc<Mutex<Vec<String>>>,
    open: bool,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self {
            input: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            open: true,
        }
    }

    /// Script a session from whole input strings; each arrives as its own
    /// read chunk.
    pub fn with_input(chunks: Vec<String>) -> Self {
        let mut transport = Self::new();
        transport.input = chunks.into_iter().map(String::into_bytes).collect();
        transport
    }

    /// Script a session from raw byte chunks, e.g. to split a frame at an
    /// awkward boundary.
    pub fn with_byte_chunks(chunks: Vec<Vec<u8>>) -> Self {
        let mut transport = Self::new();
        transport.input = chunks.into();
        transport
    }

    /// Everything written so far.
    pub fn written(&self) -> Vec<String> {
        self.written.lock().unwrap().clone()
    }

    /// Shared handle to the write log, usable after the transport has been
    /// moved into a server.
    pub fn written_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, frame: &str) -> Result<(), Self::Error> {
        if !self.open {
            return Err(MockTransportError::Closed);
        }
        self.written.lock().unwrap().push(frame.to_string());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, Self::Error> {
        if !self.open {
            return Err(MockTransportError::Closed);
        }
        self.input.pop_front().ok_or(MockTransportError::OutOfInput)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open
    }
}

// ============================================================================
// Tests
// ============================================================================
