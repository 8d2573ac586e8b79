//! Message codec — newline-delimited JSON framing.
//!
//! Each message is one UTF-8 JSON object terminated by `\n` (a preceding
//! `\r` is tolerated). The stream resynchronises at every newline, so a bad
//! line is a per-message error. The only unrecoverable condition is a frame
//! that grows past the configured limit without a delimiter.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::envelope::{CommandEnvelope, ResponseEnvelope};
use crate::error::EditorError;

const DELIMITER: u8 = b'\n';

/// Connection-fatal codec failures.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A message that was framed correctly but is not a valid command envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMessage {
    /// Best-effort request id, when the payload carried one.
    pub id: Option<String>,
    pub error: EditorError,
}

/// One complete frame pulled from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Command(CommandEnvelope),
    Malformed(MalformedMessage),
}

/// Per-connection framing buffer. Tolerates arbitrary read boundaries.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_bytes: usize,
    /// Bytes already searched for a delimiter.
    scanned: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_bytes,
            scanned: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete frame, leaving partial trailing bytes buffered.
    ///
    /// Returns `Ok(None)` when no complete frame is available yet.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>, FramingError> {
        loop {
            let found = self.buf[self.scanned..]
                .iter()
                .position(|b| *b == DELIMITER);

            let Some(offset) = found else {
                if self.buf.len() > self.max_frame_bytes {
                    return Err(FramingError::FrameTooLarge {
                        len: self.buf.len(),
                        max: self.max_frame_bytes,
                    });
                }
                self.scanned = self.buf.len();
                return Ok(None);
            };

            let line = self.buf.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let mut body = &line[..line.len() - 1];
            if let Some(stripped) = body.strip_suffix(b"\r") {
                body = stripped;
            }
            if body.len() > self.max_frame_bytes {
                return Err(FramingError::FrameTooLarge {
                    len: body.len(),
                    max: self.max_frame_bytes,
                });
            }
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let frame = match decode_command(body) {
                Ok(envelope) => DecodedFrame::Command(envelope),
                Err(malformed) => DecodedFrame::Malformed(malformed),
            };
            return Ok(Some(frame));
        }
    }
}

/// Decode one message body (without delimiter) into a command envelope.
pub fn decode_command(bytes: &[u8]) -> Result<CommandEnvelope, MalformedMessage> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| MalformedMessage {
        id: None,
        error: EditorError::validation(format!("invalid JSON: {e}")),
    })?;

    let Value::Object(mut object) = value else {
        return Err(MalformedMessage {
            id: None,
            error: EditorError::validation("message must be a JSON object"),
        });
    };

    let id = match object.remove("id") {
        Some(Value::String(id)) if !id.is_empty() => id,
        _ => {
            return Err(MalformedMessage {
                id: None,
                error: EditorError::validation("missing or invalid 'id' (expected non-empty string)"),
            });
        }
    };

    let reject = |message: &str| MalformedMessage {
        id: Some(id.clone()),
        error: EditorError::validation(message),
    };

    let command = match object.remove("command") {
        Some(Value::String(command)) if !command.is_empty() => command,
        _ => return Err(reject("missing or invalid 'command' (expected non-empty string)")),
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(params @ Value::Object(_)) => params,
        Some(_) => return Err(reject("'params' must be a JSON object")),
    };

    let timeout_ms = match object.remove("timeoutMs") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_u64() {
            Some(ms) => Some(ms),
            None => return Err(reject("'timeoutMs' must be a non-negative integer")),
        },
        Some(_) => return Err(reject("'timeoutMs' must be a non-negative integer")),
    };

    Ok(CommandEnvelope {
        id,
        command,
        params,
        timeout_ms,
    })
}

/// Encode a response envelope as one delimited frame.
pub fn encode(response: &ResponseEnvelope) -> Result<Bytes, FramingError> {
    encode_value(response)
}

/// Encode a command envelope as one delimited frame (client side, tests).
pub fn encode_command(command: &CommandEnvelope) -> Result<Bytes, FramingError> {
    encode_value(command)
}

fn encode_value<T: serde::Serialize>(message: &T) -> Result<Bytes, FramingError> {
    let mut out = BytesMut::new().writer();
    serde_json::to_writer(&mut out, message)?;
    let mut out = out.into_inner();
    out.put_u8(DELIMITER);
    Ok(out.freeze())
}
