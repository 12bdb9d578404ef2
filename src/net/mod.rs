//! Peer networking: connection tasks, the core event loop, and the
//! outbox drain.
//!
//! The core state lives on exactly one task ([`run_core`]); connection
//! tasks only parse lines and forward them as [`CoreEvent`]s. Output
//! flows the other way through per-peer send queues, which can be
//! corked so an entire burst leaves as one write.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use mesh_proto::{LineCodec, Message};

use crate::broadcast::Target;
use crate::error::LinkError;
use crate::handlers;
use crate::state::{Mesh, Sid, Uid};
use crate::sync::handshake::{HandshakeAction, LinkHandshake};
use crate::sync::split;

/// Events delivered to the core task.
pub enum CoreEvent {
    /// An unregistered connection finished its handshake.
    Establish {
        /// Collected handshake state.
        hs: Box<LinkHandshake>,
        /// Where to report the outcome.
        reply: oneshot::Sender<Result<Sid, LinkError>>,
    },
    /// A line from an established peer.
    PeerLine {
        /// The direct link it arrived on.
        from: Sid,
        /// The parsed message.
        msg: Message,
    },
    /// An established peer's connection went away.
    PeerClosed {
        /// The link that died.
        from: Sid,
    },
    /// Periodic chandelay sweep.
    SweepTick,
    /// Periodic splitmode census.
    SplitTick,
}

/// Send side of one peer link, with optional corking.
pub struct PeerHandle {
    tx: mpsc::Sender<String>,
    cork: Mutex<Option<Vec<String>>>,
}

impl PeerHandle {
    fn new(tx: mpsc::Sender<String>) -> PeerHandle {
        PeerHandle {
            tx,
            cork: Mutex::new(None),
        }
    }

    /// Queue a line, or buffer it while corked.
    pub async fn send(&self, line: String) {
        {
            let mut cork = self.cork.lock();
            if let Some(buffer) = cork.as_mut() {
                buffer.push(line);
                return;
            }
        }
        let _ = self.tx.send(line).await;
    }

    /// Start buffering instead of sending.
    pub fn cork(&self) {
        let mut cork = self.cork.lock();
        if cork.is_none() {
            *cork = Some(Vec::new());
        }
    }

    /// Release the buffer as one run of writes.
    pub async fn uncork(&self) {
        let buffered = self.cork.lock().take();
        if let Some(buffered) = buffered {
            for line in buffered {
                let _ = self.tx.send(line).await;
            }
        }
    }
}

/// Registered peers by SID and local client sinks by UID. Shared by the
/// core task and every connection task.
#[derive(Default)]
pub struct Links {
    /// Established peers.
    pub peers: DashMap<Sid, Arc<PeerHandle>>,
    /// Locally connected clients.
    pub locals: DashMap<Uid, mpsc::Sender<String>>,
}

impl Links {
    /// Fresh empty registries.
    pub fn new() -> Arc<Links> {
        Arc::new(Links::default())
    }
}

/// Deliver everything the last command produced.
pub async fn drain_outbox(mesh: &mut Mesh, links: &Links) {
    for out in mesh.out.drain() {
        match out.target {
            Target::Channel { to, .. } => {
                for uid in to {
                    if let Some(tx) = links.locals.get(&uid) {
                        let _ = tx.send(out.line.clone()).await;
                    }
                }
            }
            Target::Client(uid) => {
                if let Some(tx) = links.locals.get(&uid) {
                    let _ = tx.send(out.line).await;
                }
            }
            Target::Peer(sid) => {
                let handle = links.peers.get(&sid).map(|h| h.clone());
                if let Some(handle) = handle {
                    handle.send(out.line).await;
                }
            }
            Target::Peers {
                caps,
                nocaps,
                exclude,
            } => {
                let targets: Vec<(Sid, Arc<PeerHandle>)> = links
                    .peers
                    .iter()
                    .map(|e| (e.key().clone(), e.value().clone()))
                    .collect();
                for (sid, handle) in targets {
                    if Some(&sid) == exclude.as_ref() {
                        continue;
                    }
                    let peer_caps = mesh
                        .registry
                        .server(&sid)
                        .map(|s| s.caps)
                        .unwrap_or_default();
                    if !peer_caps.contains(caps) || !peer_caps.lacks_all(nocaps) {
                        continue;
                    }
                    handle.send(out.line.clone()).await;
                }
            }
        }
    }
}

/// The single-task core loop: owns the mesh, applies events one at a
/// time, drains the outbox after each.
pub async fn run_core(mut mesh: Mesh, links: Arc<Links>, mut events: mpsc::Receiver<CoreEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            CoreEvent::Establish { mut hs, reply } => {
                let result = handlers::server::establish(&mut mesh, &mut hs);
                if let Err(err) = &result {
                    // the ERROR goes to the pending connection via the
                    // provisional handle its task registered
                    if let Some(sid) = &hs.sid {
                        mesh.reject_link(sid, err);
                    }
                }
                drain_outbox(&mut mesh, &links).await;
                let _ = reply.send(result);
            }
            CoreEvent::PeerLine { from, msg } => {
                match handlers::dispatch_peer(&mut mesh, &from, msg) {
                    Ok(()) => drain_outbox(&mut mesh, &links).await,
                    Err(err) => {
                        mesh.reject_link(&from, &err);
                        drain_outbox(&mut mesh, &links).await;
                        links.peers.remove(&from);
                        split::peer_lost(&mut mesh, &from);
                        drain_outbox(&mut mesh, &links).await;
                    }
                }
            }
            CoreEvent::PeerClosed { from } => {
                info!(peer = %from, "peer connection closed");
                links.peers.remove(&from);
                split::peer_lost(&mut mesh, &from);
                drain_outbox(&mut mesh, &links).await;
            }
            CoreEvent::SweepTick => {
                let now = mesh.now();
                let delay = mesh.config.channel.delay;
                for name in mesh.channels.sweep(now, delay) {
                    debug!(channel = %name, "chandelay expired");
                }
            }
            CoreEvent::SplitTick => {
                split::update_splitmode(&mut mesh);
            }
        }
    }
}

/// Accept loop for the configured S2S listener.
pub async fn listen(
    addr: String,
    links: Arc<Links>,
    events: mpsc::Sender<CoreEvent>,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening for server links");
    loop {
        let (stream, remote) = listener.accept().await?;
        let links = links.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let host = remote.ip().to_string();
            let hs = LinkHandshake::inbound(host.clone(), host, false);
            connection(stream, hs, None, links, events).await;
        });
    }
}

/// Open an outbound link and run it.
pub async fn connect_peer(
    mesh_identity: (String, String, String),
    block: crate::config::LinkBlock,
    links: Arc<Links>,
    events: mpsc::Sender<CoreEvent>,
) {
    let (me_name, me_sid, me_desc) = mesh_identity;
    let target = match &block.connect_host {
        Some(host) => format!("{}:{}", host, block.port),
        None => {
            warn!(link = %block.name, "autoconnect link has no connect_host");
            return;
        }
    };
    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(link = %block.name, %target, error = %err, "connect failed");
            return;
        }
    };
    let host = stream
        .peer_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default();
    let hs = LinkHandshake::outbound(host.clone(), host, false);
    let greeting = vec![
        format!("PASS {} TS 6 :{}", block.send_password(), me_sid),
        format!("CAPAB :{}", crate::caps::Caps::all_supported()),
        format!("SERVER {me_name} 1 :{me_desc}"),
    ];
    connection(stream, hs, Some(greeting), links, events).await;
}

/// Drive one peer connection from handshake to teardown.
async fn connection(
    stream: TcpStream,
    mut hs: LinkHandshake,
    greeting: Option<Vec<String>>,
    links: Arc<Links>,
    events: mpsc::Sender<CoreEvent>,
) {
    let framed = Framed::new(stream, LineCodec::new());
    let (mut sink, mut source) = framed.split();

    if let Some(greeting) = greeting {
        for line in greeting {
            if sink.send(line).await.is_err() {
                return;
            }
        }
    }

    // handshake phase: feed lines until establish or failure
    let sid = loop {
        let line = match source.next().await {
            Some(Ok(line)) => line,
            _ => return,
        };
        let msg: Message = match line.parse() {
            Ok(msg) => msg,
            Err(err) => {
                debug!(error = %err, "unparsable pre-registration line");
                continue;
            }
        };
        match hs.step(msg.command) {
            Ok(HandshakeAction::Continue) => continue,
            Ok(HandshakeAction::Establish) => {
                let Some(sid) = hs.sid.clone() else {
                    let _ = sink.send(LinkError::InvalidSid.error_line()).await;
                    return;
                };
                // register the send queue first so the core's replies,
                // corked, have somewhere to go
                let (tx, rx) = mpsc::channel::<String>(1024);
                let handle = Arc::new(PeerHandle::new(tx));
                handle.cork();
                links.peers.insert(sid.clone(), handle.clone());

                let (reply_tx, reply_rx) = oneshot::channel();
                if events
                    .send(CoreEvent::Establish {
                        hs: Box::new(hs),
                        reply: reply_tx,
                    })
                    .await
                    .is_err()
                {
                    links.peers.remove(&sid);
                    return;
                }
                match reply_rx.await {
                    Ok(Ok(established)) => {
                        spawn_writer(rx, sink);
                        handle.uncork().await;
                        break established;
                    }
                    _ => {
                        // the core queued the ERROR line into the corked
                        // buffer; flush it and drop
                        links.peers.remove(&sid);
                        let buffered = handle.cork.lock().take().unwrap_or_default();
                        for line in buffered {
                            let _ = sink.send(line).await;
                        }
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = sink.send(err.error_line()).await;
                return;
            }
        }
    };

    // established phase: forward lines to the core
    while let Some(result) = source.next().await {
        match result {
            Ok(line) => {
                if line.is_empty() {
                    continue;
                }
                match line.parse::<Message>() {
                    Ok(msg) => {
                        if events
                            .send(CoreEvent::PeerLine {
                                from: sid.clone(),
                                msg,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(err) => {
                        debug!(peer = %sid, error = %err, "dropping unparsable line");
                    }
                }
            }
            Err(err) => {
                warn!(peer = %sid, error = %err, "read error on peer link");
                break;
            }
        }
        // the core removes the handle when it kills the link
        if !links.peers.contains_key(&sid) {
            return;
        }
    }

    let _ = events.send(CoreEvent::PeerClosed { from: sid }).await;
}

/// Writer task: feed queued lines into the socket until the queue dies.
fn spawn_writer(
    mut rx: mpsc::Receiver<String>,
    mut sink: futures_util::stream::SplitSink<Framed<TcpStream, LineCodec>, String>,
) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });
}
