//! Inbound connection handlers for the iroh [`Router`](iroh::protocol::Router).
//!
//! One handler per ALPN:
//!
//! - [`DhtProtocolHandler`] answers DHT RPCs on [`crate::net::DHT_ALPN`].
//! - [`ValueProtocolHandler`] feeds value frames on [`crate::net::VALUE_ALPN`]
//!   into [`crate::router`].
//! - [`ChatProtocolHandler`] receives chat on [`crate::net::CHAT_ALPN`].

use std::fmt;
use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use tokio::io::BufReader;
use tracing::debug;

use crate::chat::{Chat, ChatRequest};
use crate::codec;
use crate::core::{DhtNetwork, DhtNode};
use crate::framing::{read_frame, write_frame};
use crate::node::{FrameTransport, ValueNode};
use crate::protocol::{Rpc, RpcKind};
use crate::resolver::ContentRouting;
use crate::router;

fn accept_error(err: anyhow::Error) -> AcceptError {
    AcceptError::from_err(io::Error::new(io::ErrorKind::Other, format!("{err:#}")))
}

/// Answer a single DHT RPC.
///
/// One request and one reply per connection. The client reads the reply and
/// closes; we wait for that so the reply is not cut off.
pub async fn handle_connection<N: DhtNetwork>(
    node: Arc<DhtNode<N>>,
    conn: Connection,
) -> Result<()> {
    let (mut send, mut recv) = conn.accept_bi().await?;
    let Some(bytes) = read_frame(&mut recv).await? else {
        return Ok(());
    };
    let rpc: Rpc = serde_json::from_slice(&bytes).context("invalid rpc request")?;
    let from = rpc.from;
    debug!(rpc = rpc.kind.name(), "inbound rpc");

    let reply_kind = match rpc.kind {
        RpcKind::Ping => {
            node.handle_ping_request(&from).await;
            RpcKind::Pong
        }
        RpcKind::FindNode { target } => {
            let nodes = node.handle_find_node_request(&from, target).await;
            RpcKind::Nodes { nodes }
        }
        RpcKind::AddProvider { key } => {
            node.handle_add_provider_request(&from, key).await;
            RpcKind::Pong
        }
        RpcKind::GetProviders { key } => {
            let (providers, closer) = node.handle_get_providers_request(&from, key).await;
            RpcKind::Providers {
                key,
                providers,
                closer,
            }
        }
        // Replies never arrive as requests; a pong says we are alive and nothing more.
        RpcKind::Pong | RpcKind::Nodes { .. } | RpcKind::Providers { .. } => RpcKind::Pong,
    };

    let reply = Rpc {
        from: node.self_contact.clone(),
        kind: reply_kind,
    };
    write_frame(&mut send, &serde_json::to_vec(&reply)?).await?;
    send.finish()?;
    conn.closed().await;
    Ok(())
}

/// The router entry point for inbound `DHT_ALPN` connections.
#[derive(Clone)]
pub struct DhtProtocolHandler<N: DhtNetwork> {
    node: Arc<DhtNode<N>>,
}

impl<N: DhtNetwork> DhtProtocolHandler<N> {
    pub fn new(node: Arc<DhtNode<N>>) -> Self {
        Self { node }
    }
}

impl<N: DhtNetwork> fmt::Debug for DhtProtocolHandler<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DhtProtocolHandler").finish()
    }
}

impl<N: DhtNetwork> ProtocolHandler for DhtProtocolHandler<N> {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let node = self.node.clone();
        async move { handle_connection(node, connection).await.map_err(accept_error) }
    }
}

/// The router entry point for inbound `VALUE_ALPN` connections.
///
/// Reads one line from a uni-stream, closes the connection so the sender's
/// put returns, then dispatches the frame.
pub struct ValueProtocolHandler<R: ContentRouting, T: FrameTransport> {
    node: Arc<ValueNode<R, T>>,
}

impl<R: ContentRouting, T: FrameTransport> ValueProtocolHandler<R, T> {
    pub fn new(node: Arc<ValueNode<R, T>>) -> Self {
        Self { node }
    }
}

impl<R: ContentRouting, T: FrameTransport> Clone for ValueProtocolHandler<R, T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<R: ContentRouting, T: FrameTransport> fmt::Debug for ValueProtocolHandler<R, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueProtocolHandler").finish()
    }
}

impl<R: ContentRouting, T: FrameTransport> ProtocolHandler for ValueProtocolHandler<R, T> {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let node = self.node.clone();
        async move {
            let recv = connection
                .accept_uni()
                .await
                .map_err(|err| accept_error(err.into()))?;
            let mut reader = BufReader::new(recv);
            let result = codec::read_frame(&mut reader).await;
            drop(reader);
            connection.close(0u32.into(), b"read");

            let state = router::dispatch_result(&node, result).await;
            debug!(?state, "inbound value stream done");
            Ok(())
        }
    }
}

/// The router entry point for inbound `CHAT_ALPN` connections.
#[derive(Clone)]
pub struct ChatProtocolHandler {
    chat: Arc<Chat>,
}

impl ChatProtocolHandler {
    pub fn new(chat: Arc<Chat>) -> Self {
        Self { chat }
    }
}

impl fmt::Debug for ChatProtocolHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatProtocolHandler").finish()
    }
}

async fn handle_chat(chat: Arc<Chat>, conn: Connection) -> Result<()> {
    let (mut send, mut recv) = conn.accept_bi().await?;
    let Some(bytes) = read_frame(&mut recv).await? else {
        return Ok(());
    };
    let request: ChatRequest = serde_json::from_slice(&bytes).context("invalid chat request")?;
    chat.receive(request).await;

    write_frame(&mut send, &[]).await?;
    send.finish()?;
    conn.closed().await;
    Ok(())
}

impl ProtocolHandler for ChatProtocolHandler {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl std::future::Future<Output = Result<(), AcceptError>> + Send {
        let chat = self.chat.clone();
        async move { handle_chat(chat, connection).await.map_err(accept_error) }
    }
}
