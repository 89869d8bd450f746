use super::{Envelope, Message, Node, NodeID, BROADCAST, TICK_INTERVAL};
use crate::error::Result;

use ::log::{debug, error, info};
use crossbeam::channel::Receiver;
use std::net::UdpSocket;
use std::time::Instant;

/// Datagrams are well below this; a larger packet is dropped as malformed.
const MAX_DATAGRAM_SIZE: usize = 65536;

/// A replica server: one node driven by a single-threaded cooperative loop
/// over a UDP socket. All datagrams are exchanged with a local router on the
/// given port, which delivers them to the addressed replica or client; the
/// transport is lossy, unordered, and may duplicate.
pub struct Server {
    id: NodeID,
    node: Node,
    node_rx: Receiver<Envelope>,
    socket: UdpSocket,
}

impl Server {
    /// Creates a new replica server, binding an ephemeral local socket.
    pub fn new(port: u16, id: NodeID, peers: Vec<NodeID>) -> Result<Self> {
        let (node_tx, node_rx) = crossbeam::channel::unbounded();
        let socket = UdpSocket::bind(("127.0.0.1", 0))?;
        socket.connect(("127.0.0.1", port))?;
        socket.set_read_timeout(Some(TICK_INTERVAL))?;
        let node = Node::new(id.clone(), peers, node_tx);
        Ok(Self { id, node, node_rx, socket })
    }

    /// Runs the replica until a fatal socket error. Alternates between
    /// receiving datagrams (bounded by the tick interval) and advancing the
    /// node's logical clock; outbound messages drain to the socket after
    /// every step. Nothing a peer or client sends is fatal: malformed or
    /// misaddressed datagrams are logged and dropped.
    pub fn serve(mut self) -> Result<()> {
        info!("Replica {} starting on port {}", self.id, self.socket.peer_addr()?.port());
        self.transmit(Envelope {
            src: self.id.clone(),
            dst: BROADCAST.to_owned(),
            leader: BROADCAST.to_owned(),
            message: Message::Hello,
        })?;

        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut last_tick = Instant::now();
        loop {
            self.drain_outbound()?;

            match self.socket.recv(&mut buf) {
                Ok(len) => match serde_json::from_slice::<Envelope>(&buf[..len]) {
                    Ok(msg) => {
                        if msg.src != self.id && (msg.dst == self.id || msg.dst == BROADCAST) {
                            self.node = self.node.step(msg)?;
                        } else {
                            debug!("Ignoring datagram from {} to {}", msg.src, msg.dst);
                        }
                    }
                    Err(err) => error!("Dropping malformed datagram: {}", err),
                },
                Err(err)
                    if matches!(
                        err.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) => {}
                Err(err) => return Err(err.into()),
            }

            while last_tick.elapsed() >= TICK_INTERVAL {
                self.node = self.node.tick()?;
                last_tick += TICK_INTERVAL;
            }
        }
    }

    /// Sends any outbound messages emitted by the node.
    fn drain_outbound(&mut self) -> Result<()> {
        while let Ok(msg) = self.node_rx.try_recv() {
            self.transmit(msg)?;
        }
        Ok(())
    }

    /// Sends a single datagram. Socket errors here are fatal.
    fn transmit(&self, msg: Envelope) -> Result<()> {
        let data = serde_json::to_vec(&msg)?;
        self.socket.send(&data)?;
        Ok(())
    }
}
