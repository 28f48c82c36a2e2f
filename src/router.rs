//! Inbound side of the value protocol.
//!
//! Each inbound stream carries exactly one frame:
//!
//! ```text
//! AwaitingFrame -> Classifying -> PlainMessage | RemotePut | RemoteGet | Delivery -> Closed
//! ```
//!
//! The stream is dropped as soon as the frame is read; any answer goes out
//! on a new connection. The read has no timeout.

use tokio::io::{AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::cid::ContentId;
use crate::codec::{read_frame, Frame};
use crate::error::ValueError;
use crate::node::{Delivery, FrameTransport, NodeEvent, ValueNode};
use crate::resolver::ContentRouting;

/// Where an inbound stream ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundState {
    AwaitingFrame,
    Classifying,
    PlainMessage,
    RemotePut,
    RemoteGet,
    Delivery,
    /// Closed without dispatching: empty line, malformed frame or a
    /// disconnect before the frame was complete.
    Closed,
}

/// Read one frame from `stream`, close it, and dispatch.
pub async fn handle_stream<R, T, S>(node: &ValueNode<R, T>, stream: S) -> InboundState
where
    R: ContentRouting,
    T: FrameTransport,
    S: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let state = InboundState::AwaitingFrame;
    debug!(?state, "inbound stream accepted");
    let result = read_frame(&mut reader).await;
    drop(reader);
    dispatch_result(node, result).await
}

/// Dispatch the outcome of reading one frame.
///
/// Split from [`handle_stream`] so transports can close their stream before
/// the (possibly slow) dispatch runs.
pub async fn dispatch_result<R, T>(
    node: &ValueNode<R, T>,
    result: Result<Option<Frame>, ValueError>,
) -> InboundState
where
    R: ContentRouting,
    T: FrameTransport,
{
    match result {
        Ok(Some(frame)) => dispatch(node, frame).await,
        Ok(None) => InboundState::Closed,
        Err(ValueError::Io(err)) => {
            debug!("peer disconnected before a full frame: {err}");
            InboundState::Closed
        }
        Err(err) => {
            warn!("dropping inbound frame: {err}");
            InboundState::Closed
        }
    }
}

/// Act on a decoded frame.
pub async fn dispatch<R, T>(node: &ValueNode<R, T>, frame: Frame) -> InboundState
where
    R: ContentRouting,
    T: FrameTransport,
{
    let state = InboundState::Classifying;
    debug!(?state, kind = frame.kind(), "inbound frame");
    match frame {
        Frame::Plain(text) => {
            let text = String::from_utf8_lossy(&text).into_owned();
            info!(message = %text, "plain message");
            node.emit(NodeEvent::Message(text));
            InboundState::PlainMessage
        }
        Frame::Store { cid, value } => {
            remote_put(node, cid, value).await;
            InboundState::RemotePut
        }
        Frame::Fetch { cid, reply_addr } => {
            remote_get(node, cid, &reply_addr).await;
            InboundState::RemoteGet
        }
        Frame::Deliver(value) => {
            let cid = node.complete_get(&value).await;
            info!(cid = ?cid, bytes = value.len(), "value delivered");
            node.emit(NodeEvent::Delivered(Delivery { cid, value }));
            InboundState::Delivery
        }
    }
}

/// Keep a value a peer routed to us and announce that we hold it.
async fn remote_put<R, T>(node: &ValueNode<R, T>, cid: ContentId, value: Vec<u8>)
where
    R: ContentRouting,
    T: FrameTransport,
{
    if !cid.matches(&value) {
        warn!(%cid, "value does not hash to its content id; dropping");
        return;
    }
    node.store().put(cid, value).await;
    info!(%cid, "holding value for a peer");

    let announced = match node.resolver().announce(&cid).await {
        Ok(()) => true,
        Err(err) => {
            warn!(%cid, "provider announce failed: {err}");
            false
        }
    };
    node.emit(NodeEvent::Stored { cid, announced });
}

/// Push a held value back to the requester over a new connection.
///
/// Nothing is sent when the value is not held here.
async fn remote_get<R, T>(node: &ValueNode<R, T>, cid: ContentId, reply_addr: &str)
where
    R: ContentRouting,
    T: FrameTransport,
{
    let Some(value) = node.store().get(&cid).await else {
        debug!(%cid, "get for a value not held here; no reply");
        return;
    };

    match node
        .transport()
        .send_frame(reply_addr, &Frame::Deliver(value))
        .await
    {
        Ok(()) => {
            info!(%cid, "value sent to requester");
            node.emit(NodeEvent::Served { cid });
        }
        Err(err) => warn!(%cid, "could not deliver value: {err}"),
    }
}
