//! # iroh DHT values
//!
//! A content-addressed value store on top of a Kademlia-style distributed hash
//! table, carried over the [`iroh`](https://crates.io/crates/iroh) QUIC stack.
//!
//! A value is named by the SHA-256 hash of its bytes ([`ContentId`], printed
//! as a CIDv0 string). A put pushes the value to the peer whose ID is closest
//! to that hash, which stores it and announces itself as provider. A get looks
//! up a provider and asks it to push the value back over a fresh connection.
//!
//! The crate is split into modules that can be used on their own:
//!
//! - [`core`]: the transport-agnostic Kademlia logic, including the routing
//!   table, provider records, and the [`DhtNode`] state machine.
//! - [`resolver`]: the [`ContentRouting`] seam the value protocol needs from
//!   the overlay, implemented for [`DhtNode`].
//! - [`codec`]: the line-delimited value frames.
//! - [`node`] and [`router`]: the outbound put/get operations and the inbound
//!   frame state machine.
//! - [`net`]: [`iroh`] implementations of [`DhtNetwork`] and
//!   [`FrameTransport`], plus the ALPNs.
//! - [`server`]: [`iroh::protocol::ProtocolHandler`]s for the three ALPNs.
//! - [`chat`]: chat messages and peer handles.
//!
//! ## Getting started
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use anyhow::Result;
//! use iroh::Endpoint;
//! use iroh_dht_values::net::contact_for;
//! use iroh_dht_values::{DhtNode, IrohNetwork, IrohTransport, ValueNode};
//!
//! # async fn launch(endpoint: Endpoint) -> Result<()> {
//! let self_contact = contact_for(&endpoint.addr())?;
//! let network = IrohNetwork {
//!     endpoint: endpoint.clone(),
//!     self_contact: self_contact.clone(),
//! };
//! let dht = Arc::new(DhtNode::new(self_contact.id, self_contact, network, 20, 3));
//! let node = ValueNode::new(dht, IrohTransport::new(endpoint));
//!
//! let outcome = node.put(b"hello".to_vec()).await?;
//! println!("stored as {}", outcome.cid());
//! # Ok(())
//! # }
//! ```
//!
//! The binary in `src/main.rs` wires these pieces to the iroh router and an
//! interactive prompt.

pub mod chat;
pub mod cid;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod framing;
pub mod net;
pub mod node;
pub mod protocol;
pub mod resolver;
pub mod router;
pub mod server;
pub mod store;

pub use cid::ContentId;
pub use codec::Frame;
pub use core::{derive_node_id, Contact, DhtNetwork, DhtNode, Key, NodeId};
pub use error::ValueError;
pub use net::{IrohNetwork, IrohTransport, CHAT_ALPN, DHT_ALPN, VALUE_ALPN};
pub use node::{Delivery, FrameTransport, GetOutcome, NodeEvent, PutOutcome, ValueNode};
pub use resolver::ContentRouting;
pub use server::{ChatProtocolHandler, DhtProtocolHandler, ValueProtocolHandler};
pub use store::ValueStore;
