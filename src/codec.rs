//! Line-delimited wire codec for the value protocol.
//!
//! Every frame is one `\n`-terminated line, split on `:` into one to three
//! fields:
//!
//! | line                     | frame                 |
//! |--------------------------|-----------------------|
//! | `<text>`                 | [`Frame::Plain`]      |
//! | `<cid>:<value>`          | [`Frame::Store`]      |
//! | `get:<cid>:<replyAddr>`  | [`Frame::Fetch`]      |
//! | `=> <value>`             | [`Frame::Deliver`]    |
//!
//! There is no escaping. A value that contains `:` or `\n` will not survive a
//! round trip through [`Frame::Store`]; the receiving side sees a different
//! field count and drops the line as malformed.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::cid::ContentId;
use crate::error::ValueError;

/// Upper bound on a single line, newline included.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

const FIELD_DELIMITER: u8 = b':';
const FETCH_TAG: &[u8] = b"get";
const DELIVER_PREFIX: &[u8] = b"=> ";

/// One decoded protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Free-form text for display.
    Plain(Vec<u8>),
    /// Keep `value` here under `cid`.
    Store { cid: ContentId, value: Vec<u8> },
    /// Send the value for `cid` to `reply_addr` on a fresh connection.
    Fetch { cid: ContentId, reply_addr: String },
    /// A value pushed back in answer to a [`Frame::Fetch`].
    Deliver(Vec<u8>),
}

impl Frame {
    /// Encode the frame, newline included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Frame::Plain(text) => out.extend_from_slice(text),
            Frame::Store { cid, value } => {
                out.extend_from_slice(cid.to_string().as_bytes());
                out.push(FIELD_DELIMITER);
                out.extend_from_slice(value);
            }
            Frame::Fetch { cid, reply_addr } => {
                out.extend_from_slice(FETCH_TAG);
                out.push(FIELD_DELIMITER);
                out.extend_from_slice(cid.to_string().as_bytes());
                out.push(FIELD_DELIMITER);
                out.extend_from_slice(reply_addr.as_bytes());
            }
            Frame::Deliver(value) => {
                out.extend_from_slice(DELIVER_PREFIX);
                out.extend_from_slice(value);
            }
        }
        out.push(b'\n');
        out
    }

    /// Classify a single line. The trailing newline is optional.
    ///
    /// Returns `Ok(None)` for an empty line, which carries nothing.
    pub fn decode(line: &[u8]) -> Result<Option<Frame>, ValueError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(value) = line.strip_prefix(DELIVER_PREFIX) {
            return Ok(Some(Frame::Deliver(value.to_vec())));
        }

        let fields: Vec<&[u8]> = line.split(|b| *b == FIELD_DELIMITER).collect();
        match fields.as_slice() {
            [text] => Ok(Some(Frame::Plain(text.to_vec()))),
            [cid, value] => {
                let cid = ContentId::from_wire(cid)
                    .map_err(|err| ValueError::Encoding(format!("store frame: {err}")))?;
                Ok(Some(Frame::Store {
                    cid,
                    value: value.to_vec(),
                }))
            }
            [tag, cid, reply_addr] if *tag == FETCH_TAG => {
                let cid = ContentId::from_wire(cid)
                    .map_err(|err| ValueError::Encoding(format!("get frame: {err}")))?;
                let reply_addr = std::str::from_utf8(reply_addr)
                    .map_err(|_| ValueError::Encoding("reply address is not utf-8".into()))?
                    .trim()
                    .to_string();
                if reply_addr.is_empty() {
                    return Err(ValueError::Encoding("empty reply address".into()));
                }
                Ok(Some(Frame::Fetch { cid, reply_addr }))
            }
            other => Err(ValueError::Encoding(format!(
                "unexpected shape with {} fields",
                other.len()
            ))),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Plain(_) => "plain",
            Frame::Store { .. } => "store",
            Frame::Fetch { .. } => "fetch",
            Frame::Deliver(_) => "deliver",
        }
    }
}

/// Read one line from `stream` and decode it.
///
/// Blocks until a full line is available. A stream that ends before the
/// newline yields [`ValueError::Io`] with `UnexpectedEof`.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Frame>, ValueError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *stream)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if buf.last() != Some(&b'\n') {
        if read == MAX_LINE_LEN {
            return Err(ValueError::Encoding(format!(
                "line exceeds {MAX_LINE_LEN} bytes"
            )));
        }
        return Err(ValueError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "stream closed before end of frame",
        )));
    }
    Frame::decode(&buf)
}

/// Encode `frame` onto `stream` and flush.
pub async fn write_frame<W>(stream: &mut W, frame: &Frame) -> Result<(), ValueError>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&frame.encode()).await?;
    stream.flush().await?;
    Ok(())
}
