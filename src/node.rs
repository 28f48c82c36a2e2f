//! The value store node: put and get over the DHT.
//!
//! A [`ValueNode`] ties together the local [`ValueStore`], a
//! [`ContentRouting`] resolver and a [`FrameTransport`] for one-shot outbound
//! frames. Inbound frames are handled by [`crate::router`].
//!
//! Put is fire-and-forget: once the `cid:value` frame is flushed to the
//! closest peer the operation is done. Get is split in two: the request goes
//! out as `get:cid:replyAddr`, and the value comes back later on a fresh
//! connection dialed by the provider. It surfaces as
//! [`NodeEvent::Delivered`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::cid::ContentId;
use crate::codec::Frame;
use crate::core::{short_id, Contact, NodeId};
use crate::error::ValueError;
use crate::resolver::ContentRouting;
use crate::store::ValueStore;

/// Capacity of the event channel; slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outbound half of the value protocol: deliver one frame to an address and
/// close the stream.
#[async_trait]
pub trait FrameTransport: Send + Sync + 'static {
    /// Dial `addr`, write `frame`, close. No reply is read.
    async fn send_frame(&self, addr: &str, frame: &Frame) -> Result<(), ValueError>;
}

/// What happened to a put.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// We are the closest peer; the value is stored and announced here.
    Stored { cid: ContentId },
    /// The value was pushed to `peer`, which stores and announces it.
    Forwarded { cid: ContentId, peer: NodeId },
}

impl PutOutcome {
    pub fn cid(&self) -> ContentId {
        match self {
            PutOutcome::Stored { cid } | PutOutcome::Forwarded { cid, .. } => *cid,
        }
    }
}

/// What happened to a get.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GetOutcome {
    /// We are the provider; here is the value.
    Local(Vec<u8>),
    /// The request went to `provider`. Watch for [`NodeEvent::Delivered`].
    Requested { provider: NodeId },
}

/// A value pushed to us by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Set when the value hashes to the CID of the outstanding get.
    pub cid: Option<ContentId>,
    pub value: Vec<u8>,
}

/// Observable results of inbound frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// A plain text frame.
    Message(String),
    /// A remote peer asked us to keep a value.
    Stored { cid: ContentId, announced: bool },
    /// We pushed a value back to a requester.
    Served { cid: ContentId },
    /// A value arrived for one of our gets.
    Delivered(Delivery),
}

/// A participant in the value store.
pub struct ValueNode<R: ContentRouting, T: FrameTransport> {
    store: ValueStore,
    resolver: Arc<R>,
    transport: T,
    /// Where providers should dial back with values.
    reply_addr: String,
    /// CID of the single outstanding remote get, if any.
    pending_get: Mutex<Option<ContentId>>,
    events: broadcast::Sender<NodeEvent>,
}

impl<R: ContentRouting, T: FrameTransport> ValueNode<R, T> {
    /// Build a node. The reply address is taken from the resolver's local contact.
    pub fn new(resolver: Arc<R>, transport: T) -> Self {
        let reply_addr = resolver.local_contact().addr;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: ValueStore::new(),
            resolver,
            transport,
            reply_addr,
            pending_get: Mutex::new(None),
            events,
        }
    }

    pub fn id(&self) -> NodeId {
        self.resolver.local_contact().id
    }

    /// The address token remote providers dial to deliver values.
    pub fn reply_addr(&self) -> &str {
        &self.reply_addr
    }

    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<R> {
        &self.resolver
    }

    /// Subscribe to inbound events. Only events sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: NodeEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Put `value` into the network.
    ///
    /// The value goes to the peer closest to its content hash. When that is
    /// us, or when no other peer is known, it is stored here and announced.
    /// Otherwise it is forwarded and this call returns once the frame is
    /// flushed. A forwarding failure is returned and the value is stored
    /// nowhere.
    pub async fn put(&self, value: Vec<u8>) -> Result<PutOutcome, ValueError> {
        let cid = ContentId::for_value(&value);
        let local = self.resolver.local_contact();

        let target = match self.resolver.closest_peer(&cid).await {
            Ok(target) => target,
            Err(err) => {
                info!(%cid, "no closest peer ({err}); keeping value locally");
                local.clone()
            }
        };

        if target.id == local.id {
            self.store.put(cid, value).await;
            if let Err(err) = self.resolver.announce(&cid).await {
                warn!(%cid, "announce failed: {err}");
            }
            info!(%cid, "stored locally");
            return Ok(PutOutcome::Stored { cid });
        }

        let target = self.dialable(target).await?;
        if has_frame_delimiters(&value) {
            warn!(%cid, "value contains frame delimiters; the receiver will not parse it");
        }
        self.transport
            .send_frame(&target.addr, &Frame::Store { cid, value })
            .await?;
        info!(%cid, peer = %short_id(&target.id), "forwarded to closest peer");
        Ok(PutOutcome::Forwarded {
            cid,
            peer: target.id,
        })
    }

    /// Get the value for `cid`.
    ///
    /// If we are the provider the value is returned directly. Otherwise a
    /// request is sent with our reply address and the value arrives later as
    /// [`NodeEvent::Delivered`]. Only one outstanding remote get is tracked; a
    /// new one replaces the previous.
    pub async fn get(&self, cid: &ContentId) -> Result<GetOutcome, ValueError> {
        let provider = match self.resolver.find_provider(cid).await {
            Ok(provider) => provider,
            Err(err) => {
                warn!(%cid, "provider lookup failed: {err}");
                None
            }
        };
        let Some(provider) = provider else {
            return Err(ValueError::NoProviders(*cid));
        };

        if provider.id == self.id() {
            return match self.store.get(cid).await {
                Some(value) => Ok(GetOutcome::Local(value)),
                None => Err(ValueError::NotFound(*cid)),
            };
        }

        let provider = self.dialable(provider).await?;
        *self.pending_get.lock().await = Some(*cid);
        let request = Frame::Fetch {
            cid: *cid,
            reply_addr: self.reply_addr.clone(),
        };
        if let Err(err) = self.transport.send_frame(&provider.addr, &request).await {
            self.pending_get.lock().await.take();
            return Err(err);
        }
        info!(%cid, provider = %short_id(&provider.id), "value requested");
        Ok(GetOutcome::Requested {
            provider: provider.id,
        })
    }

    /// Send a plain text frame to `peer`.
    pub async fn send_plain(&self, peer: NodeId, text: &str) -> Result<(), ValueError> {
        let contact = self.resolver.resolve_address(peer).await?;
        if has_frame_delimiters(text.as_bytes()) {
            warn!(
                peer = %short_id(&peer),
                "text contains frame delimiters; the receiver will not parse it"
            );
        }
        self.transport
            .send_frame(&contact.addr, &Frame::Plain(text.as_bytes().to_vec()))
            .await
    }

    /// Fill in the address of a contact the resolver returned without one.
    async fn dialable(&self, contact: Contact) -> Result<Contact, ValueError> {
        if !contact.addr.is_empty() {
            return Ok(contact);
        }
        self.resolver.resolve_address(contact.id).await
    }

    /// Match an inbound delivery against the outstanding get.
    pub(crate) async fn complete_get(&self, value: &[u8]) -> Option<ContentId> {
        let mut pending = self.pending_get.lock().await;
        match *pending {
            Some(cid) if cid.matches(value) => pending.take(),
            Some(cid) => {
                debug!(%cid, "delivery does not match the outstanding get");
                None
            }
            None => None,
        }
    }
}

/// `:` and `\n` split frames, so a payload carrying either is misread.
fn has_frame_delimiters(payload: &[u8]) -> bool {
    payload.contains(&b':') || payload.contains(&b'\n')
}
