//! Network implementation using iroh QUIC transport.
//!
//! [`IrohNetwork`] implements [`DhtNetwork`] and [`IrohTransport`] implements
//! [`FrameTransport`]. Each protocol has its own ALPN so the iroh router can
//! hand connections to the right handler.
//!
//! # Address tokens
//!
//! Peers are dialed through an [`EndpointAddr`]. It travels as the hex
//! encoding of its JSON form. The hex alphabet has no `:`, so the token can
//! ride inside a colon-delimited value frame as a reply address.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use iroh::{Endpoint, EndpointAddr};
use tracing::{debug, info};

use crate::codec::{self, Frame};
use crate::core::{derive_node_id, short_id, Contact, DhtNetwork, DhtNode, Key, NodeId};
use crate::error::ValueError;
use crate::framing::{read_frame, write_frame};
use crate::node::FrameTransport;
use crate::protocol::{Rpc, RpcKind};

/// ALPN for DHT RPC connections.
pub const DHT_ALPN: &[u8] = b"iroh-dht-values/dht/1";

/// ALPN for one-shot value frames.
pub const VALUE_ALPN: &[u8] = b"iroh-dht-values/frames/1";

/// ALPN for chat messages and handle updates.
pub const CHAT_ALPN: &[u8] = b"iroh-dht-values/chat/1";

/// Encode an endpoint address as a colon-free token.
pub fn encode_addr(addr: &EndpointAddr) -> Result<String> {
    Ok(hex::encode(serde_json::to_vec(addr)?))
}

/// Decode a token produced by [`encode_addr`].
pub fn decode_addr(token: &str) -> Result<EndpointAddr, ValueError> {
    let bytes = hex::decode(token.trim())
        .map_err(|err| ValueError::InvalidAddress(format!("not a hex token: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| ValueError::InvalidAddress(format!("not an endpoint address: {err}")))
}

/// The DHT contact for an endpoint address.
pub fn contact_for(addr: &EndpointAddr) -> Result<Contact> {
    Ok(Contact {
        id: derive_node_id(addr.id.as_bytes()),
        addr: encode_addr(addr)?,
    })
}

/// The DHT contact for an address token, e.g. one passed on the command line.
pub fn contact_from_token(token: &str) -> Result<Contact, ValueError> {
    let addr = decode_addr(token)?;
    Ok(Contact {
        id: derive_node_id(addr.id.as_bytes()),
        addr: token.trim().to_string(),
    })
}

/// Join the DHT through a peer found at runtime, e.g. by mDNS.
///
/// Peers already in the routing table are skipped and `Ok(None)` is returned.
/// Otherwise this bootstraps through the peer and returns the number of known
/// contacts afterwards.
pub async fn join_endpoint<N: DhtNetwork>(
    dht: &DhtNode<N>,
    addr: &EndpointAddr,
) -> Result<Option<usize>> {
    let contact = contact_for(addr)?;
    if contact.id == dht.id
        || dht
            .known_contacts()
            .await
            .iter()
            .any(|known| known.id == contact.id)
    {
        return Ok(None);
    }
    let peer = short_id(&contact.id);
    let known = dht.bootstrap(vec![contact]).await?;
    info!(%peer, known, "joined through discovered peer");
    Ok(Some(known))
}

/// DHT RPC over iroh QUIC.
///
/// Each RPC opens a connection, sends one request on a bi-directional stream
/// and reads one reply. The client closes the connection once the reply is in.
pub struct IrohNetwork {
    /// The iroh endpoint used for QUIC connections.
    pub endpoint: Endpoint,
    /// Contact info for the local node (included in all RPC requests).
    pub self_contact: Contact,
}

impl IrohNetwork {
    /// Send `kind` to `to` and wait for the reply.
    async fn rpc(&self, to: &Contact, kind: RpcKind) -> Result<RpcKind> {
        let addr = decode_addr(&to.addr)?;
        let conn = self
            .endpoint
            .connect(addr, DHT_ALPN)
            .await
            .with_context(|| format!("failed to connect to {}", short_id(&to.id)))?;
        let (mut send, mut recv) = conn.open_bi().await?;

        let name = kind.name();
        let request = Rpc {
            from: self.self_contact.clone(),
            kind,
        };
        write_frame(&mut send, &serde_json::to_vec(&request)?).await?;
        send.finish()?;

        let reply = read_frame(&mut recv)
            .await?
            .ok_or_else(|| anyhow!("{name}: peer closed the stream without replying"))?;
        conn.close(0u32.into(), b"done");

        let reply: Rpc = serde_json::from_slice(&reply).context("invalid rpc reply")?;
        debug!(
            rpc = name,
            reply = reply.kind.name(),
            peer = %short_id(&to.id),
            "rpc complete"
        );
        Ok(reply.kind)
    }
}

#[async_trait]
impl DhtNetwork for IrohNetwork {
    async fn ping(&self, to: &Contact) -> Result<()> {
        match self.rpc(to, RpcKind::Ping).await? {
            RpcKind::Pong => Ok(()),
            other => Err(anyhow!("unexpected reply to ping: {}", other.name())),
        }
    }

    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>> {
        match self.rpc(to, RpcKind::FindNode { target }).await? {
            RpcKind::Nodes { nodes } => Ok(nodes),
            other => Err(anyhow!("unexpected reply to find_node: {}", other.name())),
        }
    }

    async fn add_provider(&self, to: &Contact, key: Key) -> Result<()> {
        match self.rpc(to, RpcKind::AddProvider { key }).await? {
            RpcKind::Pong => Ok(()),
            other => Err(anyhow!("unexpected reply to add_provider: {}", other.name())),
        }
    }

    async fn get_providers(&self, to: &Contact, key: Key) -> Result<(Vec<Contact>, Vec<Contact>)> {
        match self.rpc(to, RpcKind::GetProviders { key }).await? {
            RpcKind::Providers {
                key: answered,
                providers,
                closer,
            } if answered == key => Ok((providers, closer)),
            other => Err(anyhow!(
                "unexpected reply to get_providers: {}",
                other.name()
            )),
        }
    }
}

/// One-shot value frames over iroh QUIC.
///
/// Every frame gets its own connection and a uni-directional stream. The
/// receiver closes the connection after reading the line; waiting for that
/// close is how we know the frame was flushed.
#[derive(Clone)]
pub struct IrohTransport {
    endpoint: Endpoint,
}

impl IrohTransport {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl FrameTransport for IrohTransport {
    async fn send_frame(&self, addr: &str, frame: &Frame) -> Result<(), ValueError> {
        let addr = decode_addr(addr)?;
        let conn = self
            .endpoint
            .connect(addr, VALUE_ALPN)
            .await
            .map_err(|err| ValueError::Connect(err.to_string()))?;
        let mut send = conn
            .open_uni()
            .await
            .map_err(|err| ValueError::Connect(err.to_string()))?;

        codec::write_frame(&mut send, frame).await?;
        send.finish()
            .map_err(|err| ValueError::Connect(err.to_string()))?;

        let reason = conn.closed().await;
        debug!(kind = frame.kind(), "frame sent; connection closed: {reason}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(matches!(
            decode_addr("zz-not-hex"),
            Err(ValueError::InvalidAddress(_))
        ));
        let not_an_addr = hex::encode(br#"{"hello":"world"}"#);
        assert!(matches!(
            decode_addr(&not_an_addr),
            Err(ValueError::InvalidAddress(_))
        ));
        assert!(contact_from_token("").is_err());
    }

    #[test]
    fn tokens_are_colon_free() {
        let token = hex::encode(br#"{"id":"abc","addrs":["1.2.3.4:5"]}"#);
        assert!(!token.contains(':'));
    }
}
