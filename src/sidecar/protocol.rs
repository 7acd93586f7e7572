//! Sidecar wire format.
//!
//! Frames are compact JSON arrays terminated by a blank line (`"\n\n"`):
//!
//! ```text
//! request       [seq, type, fileName, ...args]
//! response      [seq, data | null]
//! notification  [type, fileName, data]
//! ```

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::SidecarError;

pub const DELIMITER: &[u8] = b"\n\n";

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub seq: u64,
    pub kind: String,
    pub file: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub seq: u64,
    /// `None` when the server sent `null`
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: String,
    pub file: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

fn protocol(message: impl Into<String>) -> SidecarError {
    SidecarError::Protocol(message.into())
}

fn string_at(items: &[Value], index: usize, what: &str) -> Result<String, SidecarError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| protocol(format!("frame without {what}")))
}

impl Frame {
    pub fn to_value(&self) -> Value {
        match self {
            Frame::Request(r) => {
                let mut items = vec![json!(r.seq), json!(r.kind), json!(r.file)];
                items.extend(r.args.iter().cloned());
                Value::Array(items)
            }
            Frame::Response(r) => json!([r.seq, r.data.clone().unwrap_or(Value::Null)]),
            Frame::Notification(n) => json!([n.kind, n.file, n.data]),
        }
    }

    /// Classify a decoded JSON array by the type of its first element.
    pub fn from_value(value: Value) -> Result<Self, SidecarError> {
        let Value::Array(mut items) = value else {
            return Err(protocol("frame is not an array"));
        };
        match items.first() {
            Some(Value::Number(n)) => {
                let seq = n
                    .as_u64()
                    .ok_or_else(|| protocol(format!("bad sequence number {n}")))?;
                if items.len() == 2 {
                    let data = items.pop().filter(|d| !d.is_null());
                    return Ok(Frame::Response(Response { seq, data }));
                }
                let kind = string_at(&items, 1, "request type")?;
                let file = string_at(&items, 2, "file name")?;
                let args = items.split_off(3);
                Ok(Frame::Request(Request {
                    seq,
                    kind,
                    file,
                    args,
                }))
            }
            Some(Value::String(_)) if items.len() == 3 => {
                let kind = string_at(&items, 0, "notification type")?;
                let file = string_at(&items, 1, "file name")?;
                let data = items.pop().unwrap_or(Value::Null);
                Ok(Frame::Notification(Notification { kind, file, data }))
            }
            _ => Err(protocol(format!("unrecognized frame of {} items", items.len()))),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, SidecarError> {
        let mut bytes = serde_json::to_vec(&self.to_value())?;
        bytes.extend_from_slice(DELIMITER);
        Ok(bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SidecarError> {
        Self::from_value(serde_json::from_slice(bytes)?)
    }
}

/// Reads delimiter-separated frames from a byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next frame, or `Ok(None)` at end of stream.
    ///
    /// A frame that fails to parse is consumed and reported as a protocol
    /// error; the stream stays usable.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, SidecarError> {
        loop {
            let read = self.inner.read_until(b'\n', &mut self.buf).await?;
            let at_eof = read == 0;
            if !at_eof && !self.buf.ends_with(DELIMITER) {
                continue;
            }
            let frame = std::mem::take(&mut self.buf);
            let body = frame.trim_ascii();
            if body.is_empty() {
                if at_eof {
                    return Ok(None);
                }
                continue;
            }
            return Frame::decode(body).map(Some);
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), SidecarError> {
    writer.write_all(&frame.encode()?).await?;
    writer.flush().await?;
    Ok(())
}
