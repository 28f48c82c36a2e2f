//! The four routing primitives the value store needs from the DHT.
//!
//! [`ContentRouting`] is the seam between the value protocol and the overlay.
//! [`DhtNode`] implements it. Tests or other overlays can swap in their own.

use async_trait::async_trait;
use tracing::debug;

use crate::cid::ContentId;
use crate::core::{short_id, xor_distance, Contact, DhtNetwork, DhtNode, NodeId};
use crate::error::ValueError;

/// Peer and provider resolution for content ids.
#[async_trait]
pub trait ContentRouting: Send + Sync + 'static {
    /// This node's own contact; its address is what remote peers dial back.
    fn local_contact(&self) -> Contact;

    /// The peer whose ID is closest to `cid`, possibly ourselves.
    ///
    /// Fails with [`ValueError::Resolution`] when no other peer is known.
    /// Callers then treat the local node as closest.
    async fn closest_peer(&self, cid: &ContentId) -> Result<Contact, ValueError>;

    /// The first peer that announced it holds `cid`, or `None`.
    async fn find_provider(&self, cid: &ContentId) -> Result<Option<Contact>, ValueError>;

    /// Find a dialable address for a peer ID.
    async fn resolve_address(&self, peer: NodeId) -> Result<Contact, ValueError>;

    /// Advertise that this node holds `cid`. Best effort, never retried here.
    async fn announce(&self, cid: &ContentId) -> Result<(), ValueError>;
}

#[async_trait]
impl<N: DhtNetwork> ContentRouting for DhtNode<N> {
    fn local_contact(&self) -> Contact {
        self.self_contact.clone()
    }

    async fn closest_peer(&self, cid: &ContentId) -> Result<Contact, ValueError> {
        let key = cid.routing_key();
        let found = self
            .iterative_find_node(key)
            .await
            .map_err(|err| ValueError::Resolution(format!("{err:#}")))?;
        if found.is_empty() {
            return Err(ValueError::Resolution(format!(
                "no peers known to route {cid}"
            )));
        }

        let mut best = self.self_contact.clone();
        let mut best_distance = xor_distance(&best.id, &key);
        for contact in found {
            let distance = xor_distance(&contact.id, &key);
            if distance < best_distance {
                best_distance = distance;
                best = contact;
            }
        }
        debug!(%cid, peer = %short_id(&best.id), "closest peer resolved");
        Ok(best)
    }

    async fn find_provider(&self, cid: &ContentId) -> Result<Option<Contact>, ValueError> {
        let providers = self
            .find_providers(cid.routing_key())
            .await
            .map_err(|err| ValueError::Resolution(format!("{err:#}")))?;
        Ok(providers.into_iter().next())
    }

    async fn resolve_address(&self, peer: NodeId) -> Result<Contact, ValueError> {
        self.find_peer(peer)
            .await
            .map_err(|err| ValueError::Resolution(format!("{err:#}")))?
            .ok_or_else(|| {
                ValueError::Resolution(format!("no address known for peer {}", short_id(&peer)))
            })
    }

    async fn announce(&self, cid: &ContentId) -> Result<(), ValueError> {
        let accepted = self
            .announce_provider(cid.routing_key())
            .await
            .map_err(|err| ValueError::Resolution(format!("{err:#}")))?;
        debug!(%cid, accepted, "provider record announced");
        Ok(())
    }
}
