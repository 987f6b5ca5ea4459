//! Wire framing layer
//!
//! Messages are JSON objects sandwiched between two sentinel lines:
//!
//! ```text
//! [== CMake Server ==[
//! { ... }
//! ]== CMake Server ==]
//! ```
//!
//! Both CRLF and LF line endings are accepted on input; output always uses
//! LF with a leading blank line before the start sentinel.
//!
//! The decoder consumes raw bytes and splits on newlines before any UTF-8
//! conversion. A multi-byte sequence can never contain `\n`, so a read
//! boundary in the middle of a character is harmless: the line only gets
//! converted once its newline has arrived. Invalid UTF-8 inside a frame
//! degrades to replacement characters and surfaces as a JSON parse error.

use tracing::warn;

/// Start-of-frame sentinel line.
pub const START_MAGIC: &str = "[== CMake Server ==[";

/// End-of-frame sentinel line.
pub const END_MAGIC: &str = "]== CMake Server ==]";

/// Upper bound on a single frame payload to prevent memory exhaustion
/// from a client that never sends the end sentinel.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

/// Incremental decoder turning a byte stream into frame payloads.
///
/// Feed arbitrary chunks of input; complete payloads are returned in
/// arrival order. Bytes outside a frame that are not a sentinel line are
/// discarded.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Raw input not yet split into lines
    buffer: Vec<u8>,

    /// Payload lines accumulated since the last start sentinel
    payload: String,

    /// Whether a start sentinel has been seen without a matching end
    in_frame: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of input and return every payload completed by it.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut complete = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop(); // '\n'
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if line == START_MAGIC.as_bytes() {
                self.payload.clear();
                self.in_frame = true;
            } else if line == END_MAGIC.as_bytes() && self.in_frame {
                // Drop the trailing newline added after the last payload line.
                self.payload.pop();
                complete.push(std::mem::take(&mut self.payload));
                self.in_frame = false;
            } else if self.in_frame {
                self.payload.push_str(&String::from_utf8_lossy(&line));
                self.payload.push('\n');
                if self.payload.len() > MAX_FRAME_SIZE {
                    warn!(
                        "Discarding oversized frame ({} bytes without end sentinel)",
                        self.payload.len()
                    );
                    self.payload.clear();
                    self.in_frame = false;
                }
            }
            // Out-of-frame noise is discarded.
        }
        complete
    }
}

/// Wrap a serialized JSON payload in the wire framing.
pub fn encode(payload: &str) -> String {
    format!("\n{START_MAGIC}\n{payload}\n{END_MAGIC}\n")
}
