//! UDP transport for Synod envelopes

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::message::{Envelope, Message};
use crate::server::Outbound;
use crate::types::NodeId;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Maximum datagram size (64KB is plenty for one JSON envelope)
const MAX_MSG_SIZE: usize = 65536;

/// UDP transport addressing peers by node id
pub struct Transport {
    node_id: NodeId,
    socket: Arc<UdpSocket>,
    peers: BTreeMap<NodeId, SocketAddr>,
    incoming_tx: mpsc::Sender<(Envelope, SocketAddr)>,
    incoming_rx: mpsc::Receiver<(Envelope, SocketAddr)>,
}

impl Transport {
    /// Bind to `bind_addr` and address the members of `config`
    pub async fn bind(bind_addr: SocketAddr, config: &ClusterConfig) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let (incoming_tx, incoming_rx) = mpsc::channel(256);

        let peers = config
            .members
            .iter()
            .map(|m| (m.id.clone(), m.addr))
            .collect();

        Ok(Self {
            node_id: config.node_id.clone(),
            socket: Arc::new(socket),
            peers,
            incoming_tx,
            incoming_rx,
        })
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Start receiving envelopes in background
    pub fn start_receive(&self) {
        let socket = self.socket.clone();
        let tx = self.incoming_tx.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MSG_SIZE];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, src)) => match Envelope::from_bytes(&buf[..len]) {
                        Ok(envelope) => {
                            debug!("Received {} from {} ({})", envelope.message.kind(), envelope.from, src);
                            if tx.send((envelope, src)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse envelope from {}: {}", src, e);
                        }
                    },
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                    }
                }
            }
        });
    }

    /// Receive the next incoming envelope
    pub async fn recv(&mut self) -> Option<(Envelope, SocketAddr)> {
        self.incoming_rx.recv().await
    }

    /// Send a message to one peer
    pub async fn send(&self, message: Message, to: &NodeId) -> Result<()> {
        let addr = *self
            .peers
            .get(to)
            .ok_or_else(|| Error::UnknownPeer(to.clone()))?;
        let bytes = Envelope::new(self.node_id.clone(), message).to_bytes()?;
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// Send a message to every peer, including ourselves
    pub async fn broadcast(&self, message: Message) -> Result<()> {
        let bytes = Envelope::new(self.node_id.clone(), message).to_bytes()?;

        for (peer, addr) in &self.peers {
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                warn!("Failed to send to {} ({}): {}", peer, addr, e);
            }
        }
        Ok(())
    }

    /// Put everything a round recorded in an outbox on the wire.
    ///
    /// A send that fails is logged and skipped; the rest of the batch still
    /// goes out.
    pub async fn flush(&self, outbound: Vec<Outbound>) -> Result<()> {
        for out in outbound {
            let kind = out.message().kind();
            let sent = match out {
                Outbound::Broadcast(message) => self.broadcast(message).await,
                Outbound::Unicast { to, message } => self.send(message, &to).await,
            };
            if let Err(e) = sent {
                warn!("Dropping outbound {}: {}", kind, e);
            }
        }
        Ok(())
    }
}
