//! DHT RPC message definitions.
//!
//! Every request and reply is an [`Rpc`] envelope serialised as JSON and sent
//! inside a length-prefixed frame (see [`crate::framing`]). One request and
//! its reply travel over a single bi-directional stream.

use serde::{Deserialize, Serialize};

use crate::core::{Contact, Key, NodeId};

/// Envelope for every DHT message.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rpc {
    /// The sender's contact information.
    pub from: Contact,
    pub kind: RpcKind,
}

/// The DHT vocabulary. Requests and their replies share one enum.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcKind {
    /// Liveness check. Answered with [`RpcKind::Pong`].
    Ping,
    Pong,
    /// Find nodes closest to a target ID. Answered with [`RpcKind::Nodes`].
    FindNode { target: NodeId },
    Nodes { nodes: Vec<Contact> },
    /// The sender holds the value for `key`. Answered with [`RpcKind::Pong`].
    AddProvider { key: Key },
    /// Who holds `key`? Answered with [`RpcKind::Providers`].
    GetProviders { key: Key },
    Providers {
        key: Key,
        providers: Vec<Contact>,
        closer: Vec<Contact>,
    },
}

impl RpcKind {
    /// Short label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RpcKind::Ping => "ping",
            RpcKind::Pong => "pong",
            RpcKind::FindNode { .. } => "find_node",
            RpcKind::Nodes { .. } => "nodes",
            RpcKind::AddProvider { .. } => "add_provider",
            RpcKind::GetProviders { .. } => "get_providers",
            RpcKind::Providers { .. } => "providers",
        }
    }
}
