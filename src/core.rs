//! Core DHT logic: a transport-agnostic Kademlia node with provider records.
//!
//! This module holds everything the value store needs from the overlay:
//!
//! - **Identity**: [`NodeId`], [`Key`], [`derive_node_id`]
//! - **Distance Metrics**: [`xor_distance`] for Kademlia-style routing
//! - **Routing**: [`RoutingTable`], [`Contact`] for peer management
//! - **Provider Records**: which peers announced that they hold a key
//! - **Node State Machine**: [`DhtNode`] driving lookups over a [`DhtNetwork`]

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::future::join_all;
use iroh_blake3::Hasher;
use lru::LruCache;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

// ============================================================================
// Type Aliases
// ============================================================================

/// A 256-bit identifier for DHT nodes.
///
/// Node IDs are derived from the node's public key using BLAKE3 hashing,
/// ensuring a uniform distribution across the identifier space.
pub type NodeId = [u8; 32];

/// A 256-bit key in the same space as [`NodeId`].
///
/// Content is routed under the SHA-256 digest of its bytes, see
/// [`crate::cid::ContentId::routing_key`].
pub type Key = [u8; 32];

// ============================================================================
// Configuration Constants
// ============================================================================

/// How long a provider record stays valid without being re-announced.
const PROVIDER_RECORD_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Maximum provider records kept per key.
const MAX_PROVIDERS_PER_KEY: usize = 20;

/// Maximum number of keys tracked in the provider store.
const PROVIDER_STORE_MAX_KEYS: usize = 16_384;

// ============================================================================
// Hashing Functions
// ============================================================================

/// Derive a stable 32-byte [`NodeId`] by hashing arbitrary input with BLAKE3.
///
/// Typically used to derive a node's DHT identity from its public key:
///
/// ```
/// use iroh_dht_values::derive_node_id;
///
/// let public_key = b"example-public-key-bytes";
/// let node_id = derive_node_id(public_key);
/// assert_eq!(node_id.len(), 32);
/// assert_eq!(node_id, derive_node_id(public_key));
/// ```
pub fn derive_node_id(data: &[u8]) -> NodeId {
    let mut hasher = Hasher::new();
    hasher.update(data);
    let digest = hasher.finalize();

    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_bytes());
    out
}

/// Short printable form of a node id: the first 8 hex characters.
pub fn short_id(id: &NodeId) -> String {
    hex::encode(&id[..4])
}

// ============================================================================
// Distance Metrics
// ============================================================================

/// Compute the XOR distance between two node IDs.
///
/// XOR distance is the foundation of Kademlia routing. Nodes that are
/// "closer" in XOR space share more leading bits in common.
///
/// # Properties
/// - `xor_distance(a, a) == [0; 32]` (reflexive)
/// - `xor_distance(a, b) == xor_distance(b, a)` (symmetric)
pub fn xor_distance(a: &NodeId, b: &NodeId) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}

/// Compare two XOR distances. Big-endian byte order makes this a plain
/// lexicographic comparison.
pub fn distance_cmp(a: &[u8; 32], b: &[u8; 32]) -> std::cmp::Ordering {
    a.cmp(b)
}

/// Sort contacts by ascending distance to `target`.
fn sort_by_distance(contacts: &mut [Contact], target: &NodeId) {
    contacts.sort_by(|a, b| {
        let da = xor_distance(&a.id, target);
        let db = xor_distance(&b.id, target);
        distance_cmp(&da, &db)
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider Records
// ─────────────────────────────────────────────────────────────────────────────

/// One peer that announced it holds the value for a key.
#[derive(Clone, Debug)]
struct ProviderRecord {
    provider: Contact,
    refreshed_at: Instant,
}

/// Provider records known to this node, bounded by an LRU over keys.
///
/// Each key keeps at most [`MAX_PROVIDERS_PER_KEY`] providers in announce
/// order; re-announcing moves a provider to the back. Expired records are
/// dropped whenever the key is touched.
struct ProviderStore {
    records: LruCache<Key, Vec<ProviderRecord>>,
    ttl: Duration,
}

impl ProviderStore {
    fn new() -> Self {
        let cap =
            NonZeroUsize::new(PROVIDER_STORE_MAX_KEYS).expect("capacity must be non-zero");
        Self {
            records: LruCache::new(cap),
            ttl: PROVIDER_RECORD_TTL,
        }
    }

    /// Record `provider` for `key`, refreshing it if it is already known.
    fn add(&mut self, key: Key, provider: Contact) {
        let ttl = self.ttl;
        let records = self.records.get_or_insert_mut(key, Vec::new);
        records.retain(|r| r.refreshed_at.elapsed() < ttl);
        records.retain(|r| r.provider.id != provider.id);
        if records.len() >= MAX_PROVIDERS_PER_KEY {
            records.remove(0);
        }
        records.push(ProviderRecord {
            provider,
            refreshed_at: Instant::now(),
        });
    }

    /// Live providers for `key`, oldest announcement first.
    fn get(&mut self, key: &Key) -> Vec<Contact> {
        let ttl = self.ttl;
        let Some(records) = self.records.get_mut(key) else {
            return Vec::new();
        };
        records.retain(|r| r.refreshed_at.elapsed() < ttl);
        let providers: Vec<Contact> = records.iter().map(|r| r.provider.clone()).collect();
        if providers.is_empty() {
            self.records.pop(key);
        }
        providers
    }

    /// Number of keys with at least one record.
    fn len(&self) -> usize {
        self.records.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry and Diagnostics
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of current DHT node state for telemetry and debugging.
#[derive(Clone, Debug, Default)]
pub struct TelemetrySnapshot {
    /// Number of contacts in the routing table.
    pub known_peers: usize,
    /// Number of keys with provider records held here.
    pub provider_keys: usize,
    /// Bucket size and lookup width (k parameter).
    pub replication_factor: usize,
    /// Lookup concurrency (alpha parameter).
    pub concurrency: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Routing Table
// ─────────────────────────────────────────────────────────────────────────────

/// Find the bucket index for a node ID relative to self.
///
/// The bucket index is the position of the first differing bit (0..=255).
/// Bucket 0 is the furthest (most different), bucket 255 is the closest.
fn bucket_index(self_id: &NodeId, other: &NodeId) -> usize {
    let dist = xor_distance(self_id, other);
    for (byte_idx, byte) in dist.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            return byte_idx * 8 + leading;
        }
    }
    // identical ID: put in the "last" bucket
    255
}

/// Another DHT node: its ID and a dialable address token.
///
/// The address is the hex-encoded JSON of an iroh `EndpointAddr` (see
/// [`crate::net::encode_addr`]). It never contains `:`, so it can be embedded
/// in a value-protocol frame as a reply address.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Contact {
    /// The node's unique identifier (BLAKE3 hash of public key).
    pub id: NodeId,
    /// Address token for connecting to this node.
    pub addr: String,
}

/// A single Kademlia bucket, oldest contact first.
#[derive(Debug, Default, Clone)]
struct Bucket {
    contacts: Vec<Contact>,
}

/// Outcome of attempting to add or refresh a contact in a bucket.
#[derive(Debug)]
enum BucketTouchOutcome {
    Inserted,
    Refreshed,
    /// Bucket is full; the oldest contact must answer a ping to stay.
    Full {
        new_contact: Contact,
        oldest: Contact,
    },
}

/// Deferred insert waiting on a ping of the oldest contact in a full bucket.
#[derive(Clone, Debug)]
struct PendingBucketUpdate {
    bucket_index: usize,
    oldest: Contact,
    new_contact: Contact,
}

impl Bucket {
    /// Add or refresh a contact.
    ///
    /// Known contacts move to the back and keep their latest address. Long-lived
    /// contacts are preferred, so a full bucket never drops anyone here.
    fn touch(&mut self, contact: Contact, k: usize) -> BucketTouchOutcome {
        if let Some(pos) = self.contacts.iter().position(|c| c.id == contact.id) {
            self.contacts.remove(pos);
            self.contacts.push(contact);
            return BucketTouchOutcome::Refreshed;
        }

        match self.contacts.first() {
            Some(oldest) if self.contacts.len() >= k => BucketTouchOutcome::Full {
                oldest: oldest.clone(),
                new_contact: contact,
            },
            _ => {
                self.contacts.push(contact);
                BucketTouchOutcome::Inserted
            }
        }
    }

    fn refresh(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| &c.id == id) {
            let existing = self.contacts.remove(pos);
            self.contacts.push(existing);
            true
        } else {
            false
        }
    }

    fn remove(&mut self, id: &NodeId) -> bool {
        if let Some(pos) = self.contacts.iter().position(|c| &c.id == id) {
            self.contacts.remove(pos);
            true
        } else {
            false
        }
    }
}

/// Kademlia routing table with 256 buckets for 256-bit node IDs.
///
/// Each bucket stores up to k contacts at a specific XOR distance from the local node.
#[derive(Debug)]
pub struct RoutingTable {
    self_id: NodeId,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create a new routing table for the given node ID.
    pub fn new(self_id: NodeId, k: usize) -> Self {
        Self {
            self_id,
            k,
            buckets: vec![Bucket::default(); 256],
        }
    }

    /// Add or update a contact in the routing table.
    ///
    /// A contact landing in a full bucket is dropped; [`DhtNode::observe_contact`]
    /// uses the ping-before-evict path instead.
    pub fn update(&mut self, contact: Contact) {
        let _ = self.update_with_pending(contact);
    }

    fn update_with_pending(&mut self, contact: Contact) -> Option<PendingBucketUpdate> {
        if contact.id == self.self_id {
            return None;
        }
        let idx = bucket_index(&self.self_id, &contact.id);
        match self.buckets[idx].touch(contact, self.k) {
            BucketTouchOutcome::Inserted | BucketTouchOutcome::Refreshed => None,
            BucketTouchOutcome::Full {
                new_contact,
                oldest,
            } => Some(PendingBucketUpdate {
                bucket_index: idx,
                oldest,
                new_contact,
            }),
        }
    }

    /// Find the `k` closest contacts to a target ID.
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        let mut all = self.contacts();
        sort_by_distance(&mut all, target);
        all.truncate(k);
        all
    }

    /// Look up a contact by exact ID.
    pub fn get(&self, id: &NodeId) -> Option<Contact> {
        if *id == self.self_id {
            return None;
        }
        let idx = bucket_index(&self.self_id, id);
        self.buckets[idx]
            .contacts
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    /// Every contact in the table.
    pub fn contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|b| b.contacts.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.contacts.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget a contact, e.g. after it stopped answering.
    pub fn remove(&mut self, id: &NodeId) -> bool {
        if *id == self.self_id {
            return false;
        }
        let idx = bucket_index(&self.self_id, id);
        self.buckets[idx].remove(id)
    }

    /// Apply the result of pinging the oldest contact in a full bucket.
    ///
    /// A live oldest contact is kept and the newcomer discarded. A dead one is
    /// replaced by the newcomer.
    fn apply_ping_result(&mut self, pending: PendingBucketUpdate, oldest_alive: bool) {
        let bucket = &mut self.buckets[pending.bucket_index];
        if oldest_alive {
            bucket.refresh(&pending.oldest.id);
            return;
        }

        let _ = bucket.remove(&pending.oldest.id);
        let already_present = bucket
            .contacts
            .iter()
            .any(|contact| contact.id == pending.new_contact.id);
        if !already_present && bucket.contacts.len() < self.k {
            bucket.contacts.push(pending.new_contact);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Network Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Network abstraction for DHT RPC operations.
///
/// This trait abstracts the transport layer, allowing the core DHT logic to work
/// with different network implementations (e.g., iroh QUIC, mock for testing).
/// Every request carries the caller's own [`Contact`] so the remote side can
/// learn about it.
#[async_trait]
pub trait DhtNetwork: Send + Sync + 'static {
    /// Check that a contact is still responsive.
    ///
    /// Used for bootstrap and for the Kademlia "ping-before-evict" rule.
    async fn ping(&self, to: &Contact) -> Result<()>;

    /// Send a FIND_NODE RPC to find contacts near a target ID.
    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>>;

    /// Ask `to` to record the caller as a provider for `key`.
    async fn add_provider(&self, to: &Contact, key: Key) -> Result<()>;

    /// Ask `to` for providers of `key`.
    ///
    /// Returns `(providers, closer_nodes)`.
    async fn get_providers(&self, to: &Contact, key: Key) -> Result<(Vec<Contact>, Vec<Contact>)>;
}

// ─────────────────────────────────────────────────────────────────────────────
// DHT Node
// ─────────────────────────────────────────────────────────────────────────────

/// Kademlia node with provider records.
///
/// A `DhtNode` owns a routing table, a provider store, and the [`DhtNetwork`]
/// transport used to send RPCs to other peers. The type is generic over the
/// network layer so tests can use an in-memory mock while production uses
/// [`crate::net::IrohNetwork`].
///
/// # Key Methods
///
/// * [`observe_contact`](Self::observe_contact) - Update routing table when peers are discovered
/// * [`bootstrap`](Self::bootstrap) - Join the network through known peers
/// * [`iterative_find_node`](Self::iterative_find_node) - Locate the closest nodes to a key
/// * [`announce_provider`](Self::announce_provider) - Advertise that this node holds a key
/// * [`find_providers`](Self::find_providers) - Locate peers holding a key
/// * `handle_*_request` - Answer incoming RPCs
///
/// The node is `Arc`-friendly and can be shared between background tasks.
pub struct DhtNode<N: DhtNetwork> {
    /// This node's unique identifier.
    pub id: NodeId,
    /// Contact info for this node (ID + address token).
    pub self_contact: Contact,
    /// Bucket size and the number of peers a key is announced to.
    k: usize,
    /// Parallel requests per lookup round.
    alpha: usize,
    routing: Arc<Mutex<RoutingTable>>,
    providers: Arc<Mutex<ProviderStore>>,
    network: Arc<N>,
}

impl<N: DhtNetwork> DhtNode<N> {
    /// Create a new DHT node with the given ID, contact info, network, and parameters.
    pub fn new(id: NodeId, self_contact: Contact, network: N, k: usize, alpha: usize) -> Self {
        let k = k.max(1);
        Self {
            id,
            self_contact,
            k,
            alpha: alpha.max(1),
            routing: Arc::new(Mutex::new(RoutingTable::new(id, k))),
            providers: Arc::new(Mutex::new(ProviderStore::new())),
            network: Arc::new(network),
        }
    }

    /// Observe a contact and update the routing table.
    ///
    /// If the bucket for this contact is full, spawns a background task to ping
    /// the oldest contact and decide whether to evict it.
    pub async fn observe_contact(&self, contact: Contact) {
        if contact.id == self.id {
            return;
        }
        let pending = {
            let mut rt = self.routing.lock().await;
            rt.update_with_pending(contact)
        };
        if let Some(update) = pending {
            self.spawn_bucket_refresh(update);
        }
    }

    /// Spawn a background task to ping the oldest contact in a full bucket.
    fn spawn_bucket_refresh(&self, pending: PendingBucketUpdate) {
        let network = self.network.clone();
        let routing = self.routing.clone();
        tokio::spawn(async move {
            let alive = match network.ping(&pending.oldest).await {
                Ok(_) => true,
                Err(err) => {
                    debug!(
                        peer = %short_id(&pending.oldest.id),
                        "ping failed: {err:?}"
                    );
                    false
                }
            };
            let mut rt = routing.lock().await;
            rt.apply_ping_result(pending, alive);
        });
    }

    /// Handle an incoming PING RPC request.
    pub async fn handle_ping_request(&self, from: &Contact) {
        self.observe_contact(from.clone()).await;
    }

    /// Handle an incoming FIND_NODE RPC request.
    ///
    /// Returns the k closest contacts to the target ID from our routing table.
    pub async fn handle_find_node_request(&self, from: &Contact, target: NodeId) -> Vec<Contact> {
        self.observe_contact(from.clone()).await;
        let rt = self.routing.lock().await;
        rt.closest(&target, self.k)
    }

    /// Handle an incoming ADD_PROVIDER RPC request: `from` holds `key`.
    pub async fn handle_add_provider_request(&self, from: &Contact, key: Key) {
        self.observe_contact(from.clone()).await;
        debug!(
            provider = %short_id(&from.id),
            key = %short_id(&key),
            "recording provider"
        );
        let mut providers = self.providers.lock().await;
        providers.add(key, from.clone());
    }

    /// Handle an incoming GET_PROVIDERS RPC request.
    ///
    /// Returns the providers we know for `key` plus the k closest contacts so
    /// the requester can keep looking.
    pub async fn handle_get_providers_request(
        &self,
        from: &Contact,
        key: Key,
    ) -> (Vec<Contact>, Vec<Contact>) {
        self.observe_contact(from.clone()).await;
        let providers = {
            let mut store = self.providers.lock().await;
            store.get(&key)
        };
        let rt = self.routing.lock().await;
        (providers, rt.closest(&key, self.k))
    }

    /// Join the network through `seeds`, then look up our own ID to fill the
    /// routing table.
    ///
    /// Returns the number of known contacts afterwards. Fails if seeds were
    /// given and none of them answered.
    pub async fn bootstrap(&self, seeds: Vec<Contact>) -> Result<usize> {
        let total = seeds.len();
        let mut reached = 0usize;
        for seed in seeds {
            if seed.id == self.id {
                continue;
            }
            match self.network.ping(&seed).await {
                Ok(()) => {
                    reached += 1;
                    self.observe_contact(seed).await;
                }
                Err(err) => debug!(peer = %short_id(&seed.id), "bootstrap ping failed: {err:?}"),
            }
        }
        if total > 0 && reached == 0 {
            return Err(anyhow!("none of the {total} bootstrap peers responded"));
        }

        self.iterative_find_node(self.id).await?;
        let known = self.routing.lock().await.len();
        info!(reached, known, "bootstrap complete");
        Ok(known)
    }

    /// Perform an iterative FIND_NODE lookup for the target ID.
    ///
    /// The lookup process:
    /// 1. Start with k closest contacts from routing table
    /// 2. Query alpha contacts in parallel, collect responses
    /// 3. Add newly discovered contacts to shortlist, drop those that failed
    ///    from the shortlist (the routing table keeps them)
    /// 4. Repeat until a round brings no closer contact
    /// 5. Return the k closest contacts found
    ///
    /// The local node is never part of the result. An empty result means we
    /// know no other peers.
    pub async fn iterative_find_node(&self, target: NodeId) -> Result<Vec<Contact>> {
        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut shortlist = {
            let rt = self.routing.lock().await;
            rt.closest(&target, self.k)
        };
        for c in &shortlist {
            seen.insert(c.id);
        }

        let mut best_distance = shortlist
            .first()
            .map(|c| xor_distance(&c.id, &target))
            .unwrap_or([0xff; 32]);

        loop {
            let candidates: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.id))
                .take(self.alpha)
                .cloned()
                .collect();

            if candidates.is_empty() {
                break;
            }
            for contact in &candidates {
                queried.insert(contact.id);
            }

            let responses = join_all(candidates.iter().map(|contact| async move {
                (contact, self.network.find_node(contact, target).await)
            }))
            .await;

            for (contact, response) in responses {
                match response {
                    Ok(nodes) => {
                        self.observe_contact(contact.clone()).await;
                        for n in nodes {
                            if n.id != self.id && seen.insert(n.id) {
                                self.observe_contact(n.clone()).await;
                                shortlist.push(n);
                            }
                        }
                    }
                    Err(err) => {
                        debug!(peer = %short_id(&contact.id), "find_node failed: {err:?}");
                        // Only this lookup skips it; the routing table evicts
                        // through the ping of a full bucket.
                        shortlist.retain(|c| c.id != contact.id);
                    }
                }
            }

            sort_by_distance(&mut shortlist, &target);
            shortlist.truncate(self.k);

            let any_closer = match shortlist.first() {
                Some(first) => {
                    let new_best = xor_distance(&first.id, &target);
                    if distance_cmp(&new_best, &best_distance) == std::cmp::Ordering::Less {
                        best_distance = new_best;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };

            // Stop if no progress was made
            if !any_closer {
                break;
            }
        }

        Ok(shortlist)
    }

    /// Advertise that this node holds `key`.
    ///
    /// The record is kept locally and sent to the k closest peers. Returns how
    /// many remote peers accepted it; zero when we are alone. Fails only when
    /// peers were found and every one of them rejected the record.
    pub async fn announce_provider(&self, key: Key) -> Result<usize> {
        {
            let mut providers = self.providers.lock().await;
            providers.add(key, self.self_contact.clone());
        }

        let closest = self.iterative_find_node(key).await?;
        if closest.is_empty() {
            debug!(key = %short_id(&key), "no peers known; provider record kept locally");
            return Ok(0);
        }

        let results = join_all(closest.iter().map(|contact| async move {
            (contact, self.network.add_provider(contact, key).await)
        }))
        .await;

        let mut accepted = 0usize;
        for (contact, result) in results {
            match result {
                Ok(()) => accepted += 1,
                Err(err) => debug!(peer = %short_id(&contact.id), "add_provider failed: {err:?}"),
            }
        }
        if accepted == 0 {
            return Err(anyhow!(
                "all {} peers rejected the provider record",
                closest.len()
            ));
        }
        Ok(accepted)
    }

    /// Locate providers for `key`.
    ///
    /// Local records answer immediately. Otherwise GET_PROVIDERS walks toward
    /// the key and stops at the first round that yields providers. An empty
    /// result means nobody announced the key.
    pub async fn find_providers(&self, key: Key) -> Result<Vec<Contact>> {
        let local = {
            let mut providers = self.providers.lock().await;
            providers.get(&key)
        };
        if !local.is_empty() {
            return Ok(local);
        }

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut queried: HashSet<NodeId> = HashSet::new();
        let mut shortlist = {
            let rt = self.routing.lock().await;
            rt.closest(&key, self.k)
        };
        for c in &shortlist {
            seen.insert(c.id);
        }

        loop {
            let candidates: Vec<Contact> = shortlist
                .iter()
                .filter(|c| !queried.contains(&c.id))
                .take(self.alpha)
                .cloned()
                .collect();
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            for contact in &candidates {
                queried.insert(contact.id);
            }

            let responses = join_all(candidates.iter().map(|contact| async move {
                (contact, self.network.get_providers(contact, key).await)
            }))
            .await;

            let mut found: Vec<Contact> = Vec::new();
            for (contact, response) in responses {
                match response {
                    Ok((providers, closer)) => {
                        self.observe_contact(contact.clone()).await;
                        for provider in providers {
                            if !found.iter().any(|p| p.id == provider.id) {
                                self.observe_contact(provider.clone()).await;
                                found.push(provider);
                            }
                        }
                        for n in closer {
                            if n.id != self.id && seen.insert(n.id) {
                                shortlist.push(n);
                            }
                        }
                    }
                    Err(err) => {
                        debug!(peer = %short_id(&contact.id), "get_providers failed: {err:?}");
                        shortlist.retain(|c| c.id != contact.id);
                    }
                }
            }
            if !found.is_empty() {
                return Ok(found);
            }

            sort_by_distance(&mut shortlist, &key);
            shortlist.truncate(self.k);
        }
    }

    /// Find the contact for an exact node ID.
    ///
    /// Checks the routing table first and falls back to a lookup.
    pub async fn find_peer(&self, id: NodeId) -> Result<Option<Contact>> {
        if id == self.id {
            return Ok(Some(self.self_contact.clone()));
        }
        if let Some(contact) = self.routing.lock().await.get(&id) {
            return Ok(Some(contact));
        }
        let found = self.iterative_find_node(id).await?;
        Ok(found.into_iter().find(|c| c.id == id))
    }

    /// All contacts currently in the routing table.
    pub async fn known_contacts(&self) -> Vec<Contact> {
        self.routing.lock().await.contacts()
    }

    /// Get a snapshot of current node state for telemetry.
    pub async fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        let known_peers = self.routing.lock().await.len();
        let provider_keys = self.providers.lock().await.len();
        TelemetrySnapshot {
            known_peers,
            provider_keys,
            replication_factor: self.k,
            concurrency: self.alpha,
        }
    }
}
