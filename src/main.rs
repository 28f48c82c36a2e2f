//! Interactive value store node.
//!
//! Starts an iroh endpoint that serves the DHT, value frames and chat, joins
//! the network through mDNS and any `--peer` tokens, and reads commands from
//! stdin.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --name alice
//! cargo run -- --name bob --peer <token printed by alice>
//! ```

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use iroh::discovery::mdns::{DiscoveryEvent, MdnsDiscovery};
use iroh::protocol::Router;
use iroh::{Endpoint, RelayMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use iroh_dht_values::chat::{self, Chat};
use iroh_dht_values::config::{init_tracing, Config};
use iroh_dht_values::core::short_id;
use iroh_dht_values::net::{contact_for, contact_from_token, join_endpoint};
use iroh_dht_values::{
    ChatProtocolHandler, ContentId, DhtNode, DhtProtocolHandler, GetOutcome, IrohNetwork,
    IrohTransport, NodeEvent, PutOutcome, ValueNode, ValueProtocolHandler, CHAT_ALPN, DHT_ALPN,
    VALUE_ALPN,
};

type Node = ValueNode<DhtNode<IrohNetwork>, IrohTransport>;

const TELEMETRY_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(&config);

    let endpoint = Endpoint::builder()
        .alpns(vec![
            DHT_ALPN.to_vec(),
            VALUE_ALPN.to_vec(),
            CHAT_ALPN.to_vec(),
        ])
        .relay_mode(RelayMode::Default)
        .bind()
        .await?;

    let mdns = if config.no_mdns {
        info!("mDNS discovery disabled");
        None
    } else {
        match enable_local_mdns(&endpoint, &config.service) {
            Ok(mdns) => {
                info!(service = %config.service, "mDNS discovery enabled");
                Some(mdns)
            }
            Err(err) => {
                warn!(
                    "failed to initialize mDNS discovery ({err:#}); continuing with relay-only mode"
                );
                None
            }
        }
    };

    let self_contact = contact_for(&endpoint.addr())?;
    let node_id = self_contact.id;

    let network = IrohNetwork {
        endpoint: endpoint.clone(),
        self_contact: self_contact.clone(),
    };
    let dht = Arc::new(DhtNode::new(
        node_id,
        self_contact.clone(),
        network,
        config.k,
        config.alpha,
    ));
    let values = Arc::new(ValueNode::new(
        dht.clone(),
        IrohTransport::new(endpoint.clone()),
    ));
    let chat = Arc::new(Chat::new(&node_id));
    if let Some(name) = &config.name {
        chat.rename(name).await;
    }

    let router = Router::builder(endpoint.clone())
        .accept(DHT_ALPN, DhtProtocolHandler::new(dht.clone()))
        .accept(VALUE_ALPN, ValueProtocolHandler::new(values.clone()))
        .accept(CHAT_ALPN, ChatProtocolHandler::new(chat.clone()))
        .spawn();

    println!("Value store node started");
    println!("  NodeId (hex): {}", hex::encode(node_id));
    println!("  Handle      : {}", chat.own_handle().await);
    println!("  Address     : {}", self_contact.addr);
    println!("Share the address with peers so they can join with --peer <address>.");

    let seeds: Vec<_> = config
        .peers
        .iter()
        .filter_map(|token| match contact_from_token(token) {
            Ok(contact) => Some(contact),
            Err(err) => {
                warn!("ignoring bootstrap peer: {err}");
                None
            }
        })
        .collect();
    if !seeds.is_empty() {
        match dht.bootstrap(seeds).await {
            Ok(known) => info!(known, "bootstrap complete"),
            Err(err) => warn!("bootstrap failed: {err:#}"),
        }
        if config.name.is_some() {
            let (request, _) = chat.rename(&chat.own_handle().await).await;
            chat::broadcast(&endpoint, &dht.known_contacts().await, &request).await;
        }
    }

    if let Some(mdns) = mdns {
        spawn_mdns_joiner(mdns, dht.clone());
    }
    spawn_event_printer(&values, &chat);
    spawn_telemetry(dht.clone());

    println!("\nCommands:");
    println!("  /add <address> - join through a peer's address");
    println!("  /peers         - list known peers");
    println!("  /name <handle> - change your handle");
    println!("  /put <value>   - store a value, prints its CID");
    println!("  /get <cid>     - fetch a value");
    println!("  /addr          - print your address");
    println!("  /quit          - exit");
    println!("Type anything else to send it as chat.\n");

    let repl = Repl {
        endpoint: endpoint.clone(),
        dht,
        values,
        chat,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !repl.handle_line(line.trim()).await {
                    break;
                }
            }
        }
    }

    println!("Exiting.");
    if let Err(err) = router.shutdown().await {
        warn!("router shutdown failed: {err}");
    }
    Ok(())
}

/// Enable mDNS discovery for the endpoint.
fn enable_local_mdns(endpoint: &Endpoint, service: &str) -> Result<MdnsDiscovery> {
    let mdns = MdnsDiscovery::builder()
        .service_name(service)
        .build(endpoint.id())
        .map_err(|err| anyhow::anyhow!("mDNS discovery initialization failed: {err}"))?;
    endpoint.discovery().add(mdns.clone());
    Ok(mdns)
}

/// Bootstrap through every peer mDNS finds on the local network.
fn spawn_mdns_joiner(mdns: MdnsDiscovery, dht: Arc<DhtNode<IrohNetwork>>) {
    tokio::spawn(async move {
        let mut events = mdns.subscribe().await;
        while let Some(event) = events.next().await {
            let DiscoveryEvent::Discovered { endpoint_info, .. } = event else {
                continue;
            };
            let addr = endpoint_info.into_endpoint_addr();
            if let Err(err) = join_endpoint(&dht, &addr).await {
                debug!(peer = %addr.id.fmt_short(), "joining through mDNS peer failed: {err:#}");
            }
        }
    });
}

fn spawn_event_printer(values: &Arc<Node>, chat: &Arc<Chat>) {
    let mut value_events = values.subscribe();
    tokio::spawn(async move {
        loop {
            match value_events.recv().await {
                Ok(event) => print_value_event(event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut chat_events = chat.subscribe();
    tokio::spawn(async move {
        loop {
            match chat_events.recv().await {
                Ok(update) => println!("{update}"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "chat printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_value_event(event: NodeEvent) {
    match event {
        NodeEvent::Message(text) => println!("message: {text}"),
        NodeEvent::Stored { cid, announced } => {
            println!("holding {cid} for a peer (announced: {announced})")
        }
        NodeEvent::Served { cid } => println!("sent {cid} to a requester"),
        NodeEvent::Delivered(delivery) => {
            let value = String::from_utf8_lossy(&delivery.value);
            match delivery.cid {
                Some(cid) => println!("{cid} => {}", green(&value)),
                None => println!("=> {}", green(&value)),
            }
        }
    }
}

fn green(text: &str) -> String {
    format!("\x1b[32m{text}\x1b[0m")
}

fn spawn_telemetry(dht: Arc<DhtNode<IrohNetwork>>) {
    tokio::spawn(async move {
        let mut interval = time::interval(TELEMETRY_INTERVAL);
        loop {
            interval.tick().await;
            let snapshot = dht.telemetry_snapshot().await;
            info!(
                known_peers = snapshot.known_peers,
                provider_keys = snapshot.provider_keys,
                k = snapshot.replication_factor,
                alpha = snapshot.concurrency,
                "telemetry"
            );
        }
    });
}

struct Repl {
    endpoint: Endpoint,
    dht: Arc<DhtNode<IrohNetwork>>,
    values: Arc<Node>,
    chat: Arc<Chat>,
}

impl Repl {
    /// Run one command. Returns `false` when the user asked to quit.
    async fn handle_line(&self, line: &str) -> bool {
        if line.is_empty() {
            return true;
        }
        let (command, arg) = match line.split_once(' ') {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "/quit" => return false,
            "/addr" => println!("{}", self.values.reply_addr()),
            "/peers" => self.list_peers().await,
            "/add" if !arg.is_empty() => self.add_peer(arg).await,
            "/name" if !arg.is_empty() => {
                let (request, line) = self.chat.rename(arg).await;
                println!("{line}");
                let contacts = self.dht.known_contacts().await;
                chat::broadcast(&self.endpoint, &contacts, &request).await;
            }
            "/put" if !arg.is_empty() => match self.values.put(arg.as_bytes().to_vec()).await {
                Ok(PutOutcome::Stored { cid }) => println!("stored {cid}"),
                Ok(PutOutcome::Forwarded { cid, peer }) => {
                    println!("stored {cid} on {}", short_id(&peer))
                }
                Err(err) => println!("put failed: {err}"),
            },
            "/get" if !arg.is_empty() => self.get(arg).await,
            "/add" | "/name" | "/put" | "/get" => println!("usage: {command} <argument>"),
            _ if command.starts_with('/') => println!("unknown command {command}"),
            _ => {
                let request = self.chat.compose_message(line);
                let contacts = self.dht.known_contacts().await;
                let delivered = chat::broadcast(&self.endpoint, &contacts, &request).await;
                println!(
                    "{}: {line} ({delivered}/{} peers)",
                    self.chat.own_handle().await,
                    contacts.len()
                );
            }
        }
        true
    }

    async fn add_peer(&self, token: &str) {
        let contact = match contact_from_token(token) {
            Ok(contact) => contact,
            Err(err) => {
                println!("{err}");
                return;
            }
        };
        let peer = short_id(&contact.id);
        match self.dht.bootstrap(vec![contact]).await {
            Ok(known) => println!("joined through {peer}; {known} known peers"),
            Err(err) => println!("add failed: {err:#}"),
        }
    }

    async fn get(&self, arg: &str) {
        let cid: ContentId = match arg.parse() {
            Ok(cid) => cid,
            Err(err) => {
                println!("{err}");
                return;
            }
        };
        match self.values.get(&cid).await {
            Ok(GetOutcome::Local(value)) => {
                println!("{cid} => {}", green(&String::from_utf8_lossy(&value)))
            }
            Ok(GetOutcome::Requested { provider }) => {
                println!("requested {cid} from {}", short_id(&provider))
            }
            Err(err) => println!("get failed: {err}"),
        }
    }

    async fn list_peers(&self) {
        let contacts = self.dht.known_contacts().await;
        if contacts.is_empty() {
            println!("no known peers");
            return;
        }
        println!("Known peers:");
        for contact in contacts {
            let handle = self.chat.handles().handle_for(&hex::encode(contact.id)).await;
            println!("  {} ({handle})", short_id(&contact.id));
        }
    }
}
