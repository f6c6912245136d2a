//! Reassembly of fragmented text messages
//!
//! One fragmented message may be in flight at a time. Control frames can be
//! interleaved between fragments and are never passed here.

use bytes::BytesMut;
use tracing::{debug, warn};

use super::frame::{Frame, OpCode};

/// Buffers text fragments until a frame with FIN completes the message
#[derive(Debug, Default)]
pub struct MessageAssembler {
    opcode: Option<OpCode>,
    buffer: BytesMut,
}

impl MessageAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a fragmented message is waiting for more frames
    pub fn is_pending(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed a text or continuation frame
    ///
    /// Returns the complete message when `frame` finishes one. A completed
    /// payload that is not valid UTF-8 yields nothing.
    pub fn push(&mut self, frame: &Frame) -> Option<String> {
        match frame.opcode {
            OpCode::Text => {
                if self.opcode.take().is_some() {
                    warn!(
                        "New text message started while {} buffered bytes were pending, discarding them",
                        self.buffer.len()
                    );
                }
                self.buffer.clear();
                if frame.fin {
                    return decode_text(&frame.payload);
                }
                self.opcode = Some(OpCode::Text);
                self.buffer.extend_from_slice(&frame.payload);
                None
            }
            OpCode::Continuation => {
                if self.opcode.is_none() {
                    debug!("Ignoring continuation frame with no open fragment");
                    return None;
                }
                self.buffer.extend_from_slice(&frame.payload);
                if !frame.fin {
                    return None;
                }
                self.opcode = None;
                let payload = self.buffer.split();
                decode_text(&payload)
            }
            other => {
                debug!("Assembler ignoring {:?} frame", other);
                None
            }
        }
    }
}

fn decode_text(payload: &[u8]) -> Option<String> {
    match std::str::from_utf8(payload) {
        Ok(text) => Some(text.to_string()),
        Err(e) => {
            warn!("Dropping text message that is not valid UTF-8: {}", e);
            None
        }
    }
}
