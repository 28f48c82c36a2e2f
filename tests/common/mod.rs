#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::{sleep, timeout, Duration};

use iroh_dht_values::codec::{self, MAX_LINE_LEN};
use iroh_dht_values::router;
use iroh_dht_values::{
    Contact, DhtNetwork, DhtNode, Frame, FrameTransport, Key, NodeEvent, NodeId, ValueError,
    ValueNode,
};

pub type TestValueNode = ValueNode<DhtNode<TestNetwork>, TestTransport>;

// ─────────────────────────────────────────────────────────────────────────────
// In-memory DHT
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TestNetwork {
    registry: Arc<NetworkRegistry>,
    self_contact: Contact,
    latencies: Arc<Mutex<HashMap<NodeId, Duration>>>,
    failures: Arc<Mutex<HashSet<NodeId>>>,
    rejecting: Arc<Mutex<HashSet<NodeId>>>,
    announces: Arc<Mutex<Vec<(NodeId, Key)>>>,
    pings: Arc<Mutex<Vec<NodeId>>>,
}

impl TestNetwork {
    pub fn new(registry: Arc<NetworkRegistry>, self_contact: Contact) -> Self {
        Self {
            registry,
            self_contact,
            latencies: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashSet::new())),
            rejecting: Arc::new(Mutex::new(HashSet::new())),
            announces: Arc::new(Mutex::new(Vec::new())),
            pings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn set_latency(&self, node: NodeId, latency: Duration) {
        let mut latencies = self.latencies.lock().await;
        latencies.insert(node, latency);
    }

    pub async fn set_failure(&self, node: NodeId, fail: bool) {
        let mut failures = self.failures.lock().await;
        if fail {
            failures.insert(node);
        } else {
            failures.remove(&node);
        }
    }

    /// Make ADD_PROVIDER to `node` fail while other RPCs keep working.
    pub async fn set_rejects_providers(&self, node: NodeId, reject: bool) {
        let mut rejecting = self.rejecting.lock().await;
        if reject {
            rejecting.insert(node);
        } else {
            rejecting.remove(&node);
        }
    }

    /// Every ADD_PROVIDER this network sent, as `(recipient, key)`.
    pub async fn announce_calls(&self) -> Vec<(NodeId, Key)> {
        let announces = self.announces.lock().await;
        announces.clone()
    }

    pub async fn ping_calls(&self) -> Vec<NodeId> {
        let calls = self.pings.lock().await;
        calls.clone()
    }

    async fn should_fail(&self, node: &NodeId) -> bool {
        let failures = self.failures.lock().await;
        failures.contains(node)
    }

    async fn maybe_sleep(&self, node: &NodeId) {
        let latency = {
            let latencies = self.latencies.lock().await;
            latencies.get(node).copied()
        };
        if let Some(delay) = latency {
            sleep(delay).await;
        }
    }

    async fn reach(&self, to: &Contact) -> Result<Option<Arc<DhtNode<TestNetwork>>>> {
        if self.should_fail(&to.id).await {
            return Err(anyhow!("injected network failure"));
        }
        self.maybe_sleep(&to.id).await;
        Ok(self.registry.get(&to.id).await)
    }
}

#[derive(Default)]
pub struct NetworkRegistry {
    peers: RwLock<HashMap<NodeId, Arc<DhtNode<TestNetwork>>>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &Arc<DhtNode<TestNetwork>>) {
        let mut peers = self.peers.write().await;
        peers.insert(node.id, node.clone());
    }

    pub async fn get(&self, id: &NodeId) -> Option<Arc<DhtNode<TestNetwork>>> {
        let peers = self.peers.read().await;
        peers.get(id).cloned()
    }
}

#[async_trait::async_trait]
impl DhtNetwork for TestNetwork {
    async fn ping(&self, to: &Contact) -> Result<()> {
        let peer = self.reach(to).await?;
        {
            let mut calls = self.pings.lock().await;
            calls.push(to.id);
        }
        match peer {
            Some(peer) => {
                peer.handle_ping_request(&self.self_contact).await;
                Ok(())
            }
            None => Err(anyhow!("peer not reachable")),
        }
    }

    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>> {
        match self.reach(to).await? {
            Some(peer) => Ok(peer
                .handle_find_node_request(&self.self_contact, target)
                .await),
            None => Ok(Vec::new()),
        }
    }

    async fn add_provider(&self, to: &Contact, key: Key) -> Result<()> {
        let peer = self.reach(to).await?;
        if self.rejecting.lock().await.contains(&to.id) {
            return Err(anyhow!("provider record rejected"));
        }
        {
            let mut announces = self.announces.lock().await;
            announces.push((to.id, key));
        }
        match peer {
            Some(peer) => {
                peer.handle_add_provider_request(&self.self_contact, key)
                    .await;
                Ok(())
            }
            None => Err(anyhow!("peer not reachable")),
        }
    }

    async fn get_providers(&self, to: &Contact, key: Key) -> Result<(Vec<Contact>, Vec<Contact>)> {
        match self.reach(to).await? {
            Some(peer) => Ok(peer
                .handle_get_providers_request(&self.self_contact, key)
                .await),
            None => Ok((Vec::new(), Vec::new())),
        }
    }
}

pub struct TestNode {
    pub node: Arc<DhtNode<TestNetwork>>,
    pub network: TestNetwork,
}

impl TestNode {
    pub async fn new(registry: Arc<NetworkRegistry>, index: u32, k: usize, alpha: usize) -> Self {
        Self::with_contact(registry, make_contact(index), k, alpha).await
    }

    pub async fn with_contact(
        registry: Arc<NetworkRegistry>,
        contact: Contact,
        k: usize,
        alpha: usize,
    ) -> Self {
        let network = TestNetwork::new(registry.clone(), contact.clone());
        let node = Arc::new(DhtNode::new(
            contact.id,
            contact.clone(),
            network.clone(),
            k,
            alpha,
        ));
        registry.register(&node).await;
        Self { node, network }
    }

    pub fn contact(&self) -> Contact {
        self.node.self_contact.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory value frames
// ─────────────────────────────────────────────────────────────────────────────

/// Value nodes by address token.
#[derive(Default)]
pub struct TransportRegistry {
    nodes: RwLock<HashMap<String, Arc<TestValueNode>>>,
}

impl TransportRegistry {
    pub async fn register(&self, addr: &str, node: &Arc<TestValueNode>) {
        let mut nodes = self.nodes.write().await;
        nodes.insert(addr.to_string(), node.clone());
    }

    pub async fn get(&self, addr: &str) -> Option<Arc<TestValueNode>> {
        let nodes = self.nodes.read().await;
        nodes.get(addr).cloned()
    }
}

/// Delivers each frame over a fresh `tokio::io::duplex` pipe into the
/// receiver's inbound router.
#[derive(Clone)]
pub struct TestTransport {
    registry: Arc<TransportRegistry>,
    sent: Arc<Mutex<Vec<(String, Frame)>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
}

impl TestTransport {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self {
            registry,
            sent: Arc::new(Mutex::new(Vec::new())),
            unreachable: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Every frame sent so far, with its destination.
    pub async fn sent_frames(&self) -> Vec<(String, Frame)> {
        self.sent.lock().await.clone()
    }

    pub async fn set_unreachable(&self, addr: &str, unreachable: bool) {
        let mut set = self.unreachable.lock().await;
        if unreachable {
            set.insert(addr.to_string());
        } else {
            set.remove(addr);
        }
    }
}

#[async_trait::async_trait]
impl FrameTransport for TestTransport {
    async fn send_frame(&self, addr: &str, frame: &Frame) -> Result<(), ValueError> {
        if self.unreachable.lock().await.contains(addr) {
            return Err(ValueError::Connect(format!("{addr} is unreachable")));
        }
        let Some(node) = self.registry.get(addr).await else {
            return Err(ValueError::Connect(format!("no node at {addr}")));
        };

        let (mut client, server) = tokio::io::duplex(MAX_LINE_LEN + 1);
        tokio::spawn(async move {
            router::handle_stream(&node, server).await;
        });
        codec::write_frame(&mut client, frame).await?;
        drop(client);

        self.sent
            .lock()
            .await
            .push((addr.to_string(), frame.clone()));
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Full peers
// ─────────────────────────────────────────────────────────────────────────────

/// Shared registries for a set of in-memory peers.
#[derive(Clone, Default)]
pub struct Cluster {
    pub dht: Arc<NetworkRegistry>,
    pub values: Arc<TransportRegistry>,
}

/// A DHT node with a value node on top, both reachable in memory.
pub struct TestPeer {
    pub dht: Arc<DhtNode<TestNetwork>>,
    pub network: TestNetwork,
    pub values: Arc<TestValueNode>,
    pub transport: TestTransport,
}

impl TestPeer {
    pub async fn new(cluster: &Cluster, index: u32) -> Self {
        let TestNode { node, network } = TestNode::new(cluster.dht.clone(), index, 20, 3).await;
        let transport = TestTransport::new(cluster.values.clone());
        let values = Arc::new(ValueNode::new(node.clone(), transport.clone()));
        cluster.values.register(values.reply_addr(), &values).await;
        Self {
            dht: node,
            network,
            values,
            transport,
        }
    }

    pub fn contact(&self) -> Contact {
        self.dht.self_contact.clone()
    }

    pub fn id(&self) -> NodeId {
        self.dht.id
    }
}

/// Make every peer know every other peer.
pub async fn connect_all(peers: &[&TestPeer]) {
    for a in peers {
        for b in peers {
            if a.id() != b.id() {
                a.dht.observe_contact(b.contact()).await;
            }
        }
    }
}

/// Wait for the first event matching `pick`, or `None` after `wait`.
pub async fn next_event<F, T>(
    events: &mut broadcast::Receiver<NodeEvent>,
    wait: Duration,
    mut pick: F,
) -> Option<T>
where
    F: FnMut(NodeEvent) -> Option<T>,
{
    timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return Some(found);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

pub fn make_node_id(index: u32) -> NodeId {
    let mut id = [0u8; 32];
    id[..4].copy_from_slice(&index.to_be_bytes());
    id
}

pub fn make_contact(index: u32) -> Contact {
    Contact {
        id: make_node_id(index),
        addr: format!("node-{index}"),
    }
}
