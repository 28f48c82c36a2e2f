//! Chat messages and peer handles.
//!
//! Chat is a side channel next to the value protocol. Requests are JSON in a
//! length-prefixed frame on [`CHAT_ALPN`], fanned out directly to every known
//! DHT contact. Each receiver answers with an empty frame.

use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use futures::future::join_all;
use iroh::Endpoint;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::core::{short_id, Contact, NodeId};
use crate::framing::{read_frame, write_frame};
use crate::net::{decode_addr, CHAT_ALPN};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A chat request. `from` is the sender's node id in hex.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub from: String,
    pub kind: ChatKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatKind {
    SendMessage {
        /// Random 10-byte id, hex.
        id: String,
        data: String,
        /// Unix seconds.
        created: u64,
    },
    UpdatePeer {
        handle: String,
    },
}

/// A chat message ready for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatLine {
    pub author: String,
    pub text: String,
}

/// What a received request changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatUpdate {
    Message(ChatLine),
    Renamed { old: String, new: String },
}

impl fmt::Display for ChatUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatUpdate::Message(line) => write!(f, "{}: {}", line.author, line.text),
            ChatUpdate::Renamed { old, new } => write!(f, "{old} -> {new}"),
        }
    }
}

/// Display names for peers, keyed by hex node id.
///
/// Peers that never sent an update show up as their short id.
#[derive(Debug, Default)]
pub struct HandleBook {
    handles: RwLock<HashMap<String, String>>,
}

impl HandleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn handle_for(&self, peer: &str) -> String {
        match self.handles.read().await.get(peer) {
            Some(handle) => handle.clone(),
            None => default_handle(peer),
        }
    }

    /// Set `peer`'s handle and return `(old, new)`.
    pub async fn update(&self, peer: &str, handle: String) -> (String, String) {
        let old = self
            .handles
            .write()
            .await
            .insert(peer.to_string(), handle.clone())
            .unwrap_or_else(|| default_handle(peer));
        (old, handle)
    }
}

fn default_handle(peer: &str) -> String {
    peer.chars().take(8).collect()
}

/// Our side of the chat: identity, handles and the inbound event feed.
pub struct Chat {
    me: String,
    handles: HandleBook,
    events: broadcast::Sender<ChatUpdate>,
}

impl Chat {
    pub fn new(id: &NodeId) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            me: hex::encode(id),
            handles: HandleBook::new(),
            events,
        }
    }

    /// Our node id in hex, as used in `from`.
    pub fn me(&self) -> &str {
        &self.me
    }

    pub async fn own_handle(&self) -> String {
        self.handles.handle_for(&self.me).await
    }

    pub fn handles(&self) -> &HandleBook {
        &self.handles
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatUpdate> {
        self.events.subscribe()
    }

    pub fn compose_message(&self, text: &str) -> ChatRequest {
        let id: [u8; 10] = rand::random();
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        ChatRequest {
            from: self.me.clone(),
            kind: ChatKind::SendMessage {
                id: hex::encode(id),
                data: text.to_string(),
                created,
            },
        }
    }

    /// Change our handle. Returns the request to broadcast and an `old -> new` line.
    pub async fn rename(&self, handle: &str) -> (ChatRequest, String) {
        let (old, new) = self.handles.update(&self.me, handle.to_string()).await;
        let request = ChatRequest {
            from: self.me.clone(),
            kind: ChatKind::UpdatePeer {
                handle: new.clone(),
            },
        };
        (request, format!("{old} -> {new}"))
    }

    /// Apply an inbound request and publish the result to subscribers.
    pub async fn receive(&self, request: ChatRequest) -> ChatUpdate {
        let update = match request.kind {
            ChatKind::UpdatePeer { handle } => {
                let (old, new) = self.handles.update(&request.from, handle).await;
                ChatUpdate::Renamed { old, new }
            }
            ChatKind::SendMessage { id, data, .. } => {
                debug!(%id, from = %default_handle(&request.from), "chat message");
                ChatUpdate::Message(ChatLine {
                    author: self.handles.handle_for(&request.from).await,
                    text: data,
                })
            }
        };
        let _ = self.events.send(update.clone());
        update
    }
}

/// Send one chat request to `to` and wait for its ack.
pub async fn send_chat(endpoint: &Endpoint, to: &Contact, request: &ChatRequest) -> Result<()> {
    let addr = decode_addr(&to.addr)?;
    let conn = endpoint
        .connect(addr, CHAT_ALPN)
        .await
        .with_context(|| format!("failed to connect to {}", short_id(&to.id)))?;
    let (mut send, mut recv) = conn.open_bi().await?;
    write_frame(&mut send, &serde_json::to_vec(request)?).await?;
    send.finish()?;

    let ack = read_frame(&mut recv).await?;
    conn.close(0u32.into(), b"done");
    match ack {
        Some(bytes) if bytes.is_empty() => Ok(()),
        Some(_) => Err(anyhow!("unexpected chat ack")),
        None => Err(anyhow!("peer closed the stream without an ack")),
    }
}

/// Fan `request` out to every contact. Returns how many peers acked.
pub async fn broadcast(endpoint: &Endpoint, contacts: &[Contact], request: &ChatRequest) -> usize {
    let sends = contacts.iter().map(|contact| async move {
        let result = send_chat(endpoint, contact, request).await;
        if let Err(err) = &result {
            warn!(peer = %short_id(&contact.id), "chat send failed: {err:#}");
        }
        result.is_ok()
    });
    join_all(sends).await.into_iter().filter(|ok| *ok).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(byte: u8) -> NodeId {
        [byte; 32]
    }

    #[tokio::test]
    async fn unknown_peers_show_their_short_id() {
        let book = HandleBook::new();
        let id = hex::encode(peer(0xab));
        assert_eq!(book.handle_for(&id).await, "abababab");

        let (old, new) = book.update(&id, "alice".into()).await;
        assert_eq!(old, "abababab");
        assert_eq!(new, "alice");
        assert_eq!(book.handle_for(&id).await, "alice");
    }

    #[tokio::test]
    async fn rename_reports_old_and_new() {
        let chat = Chat::new(&peer(1));
        let (request, line) = chat.rename("bob").await;
        assert_eq!(line, "01010101 -> bob");
        assert_eq!(request.kind, ChatKind::UpdatePeer { handle: "bob".into() });
        assert_eq!(chat.own_handle().await, "bob");

        let (_, line) = chat.rename("robert").await;
        assert_eq!(line, "bob -> robert");
    }

    #[tokio::test]
    async fn messages_use_the_sender_handle() {
        let alice = Chat::new(&peer(1));
        let bob = Chat::new(&peer(2));
        let mut feed = bob.subscribe();

        let (rename, _) = alice.rename("alice").await;
        let update = bob.receive(rename).await;
        assert_eq!(
            update,
            ChatUpdate::Renamed {
                old: "01010101".into(),
                new: "alice".into()
            }
        );

        let message = alice.compose_message("hi there");
        let update = bob.receive(message).await;
        assert_eq!(update.to_string(), "alice: hi there");

        assert!(matches!(feed.recv().await.unwrap(), ChatUpdate::Renamed { .. }));
        assert!(matches!(feed.recv().await.unwrap(), ChatUpdate::Message(_)));
    }

    #[test]
    fn composed_messages_get_fresh_ids() {
        let chat = Chat::new(&peer(3));
        let a = chat.compose_message("x");
        let b = chat.compose_message("x");
        let (ChatKind::SendMessage { id: id_a, .. }, ChatKind::SendMessage { id: id_b, .. }) =
            (a.kind, b.kind)
        else {
            panic!("expected messages");
        };
        assert_eq!(id_a.len(), 20);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn requests_survive_json() {
        let request = ChatRequest {
            from: "ff".into(),
            kind: ChatKind::UpdatePeer { handle: "z".into() },
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"update_peer\""));
        let back: ChatRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }
}
