use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use meshlink::frame;
use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::Mutex;
use std::time::Duration;

/// Point-to-point byte transport between ranks: blocking, reliable, ordered
/// per peer pair. Implementations are chosen once, at group formation.
pub trait Transport: Send + Sync {
    fn send(&self, peer: usize, payload: &[u8]) -> Result<()>;
    fn recv(&self, peer: usize) -> Result<Vec<u8>>;
    fn shutdown(&self);
}

fn unknown_peer(peer: usize) -> Error {
    Error::Transport(meshlink::Error::Protocol(format!(
        "no connection to rank {}",
        peer
    )))
}

/// One framed TCP stream per peer, from the rendezvous full mesh.
pub struct TcpTransport {
    peers: HashMap<usize, Mutex<TcpStream>>,
}

impl TcpTransport {
    pub(crate) fn new(peers: HashMap<usize, TcpStream>, io_timeout: Duration) -> Result<Self> {
        for stream in peers.values() {
            // both directions are bounded: a collective where every rank is
            // stuck writing (peers not draining) must abort, not hang
            stream
                .set_read_timeout(Some(io_timeout))
                .map_err(meshlink::Error::from)?;
            stream
                .set_write_timeout(Some(io_timeout))
                .map_err(meshlink::Error::from)?;
            stream.set_nodelay(true).map_err(meshlink::Error::from)?;
        }
        Ok(TcpTransport {
            peers: peers
                .into_iter()
                .map(|(rank, stream)| (rank, Mutex::new(stream)))
                .collect(),
        })
    }

    fn stream(&self, peer: usize) -> Result<std::sync::MutexGuard<'_, TcpStream>> {
        self.peers
            .get(&peer)
            .map(|m| m.lock().unwrap())
            .ok_or_else(|| unknown_peer(peer))
    }
}

impl Transport for TcpTransport {
    fn send(&self, peer: usize, payload: &[u8]) -> Result<()> {
        let mut stream = self.stream(peer)?;
        frame::write_frame(&mut stream, payload).map_err(Error::Transport)
    }

    fn recv(&self, peer: usize) -> Result<Vec<u8>> {
        let mut stream = self.stream(peer)?;
        frame::read_frame(&mut stream).map_err(Error::Transport)
    }

    fn shutdown(&self) {
        for stream in self.peers.values() {
            if let Ok(stream) = stream.lock() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
    }
}

/// In-process fabric for tests and single-host groups: one unbounded channel
/// per ordered pair of ranks.
pub struct LoopbackFabric;

impl LoopbackFabric {
    /// Wire up connections for every rank of a `world_size` group; index `i`
    /// of the returned vector belongs to rank `i`. `recv_timeout` bounds each
    /// receive, mirroring the TCP read timeout.
    pub fn new(world_size: usize, recv_timeout: Duration) -> Vec<LoopbackConn> {
        let mut txs: Vec<HashMap<usize, Sender<Vec<u8>>>> =
            (0..world_size).map(|_| HashMap::new()).collect();
        let mut rxs: Vec<HashMap<usize, Receiver<Vec<u8>>>> =
            (0..world_size).map(|_| HashMap::new()).collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }
                let (tx, rx) = channel::unbounded();
                txs[from].insert(to, tx);
                rxs[to].insert(from, rx);
            }
        }

        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (txs, rxs))| LoopbackConn {
                rank,
                world_size,
                txs,
                rxs,
                recv_timeout,
            })
            .collect()
    }
}

/// One rank's endpoints in a loopback fabric. Dropping a conn severs the
/// rank: peers observe `ConnectionLost` on their next send or receive.
pub struct LoopbackConn {
    rank: usize,
    world_size: usize,
    txs: HashMap<usize, Sender<Vec<u8>>>,
    rxs: HashMap<usize, Receiver<Vec<u8>>>,
    recv_timeout: Duration,
}

impl LoopbackConn {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }
}

impl Transport for LoopbackConn {
    fn send(&self, peer: usize, payload: &[u8]) -> Result<()> {
        let tx = self.txs.get(&peer).ok_or_else(|| unknown_peer(peer))?;
        tx.send(payload.to_vec())
            .map_err(|_| Error::Transport(meshlink::Error::ConnectionLost))
    }

    fn recv(&self, peer: usize) -> Result<Vec<u8>> {
        let rx = self.rxs.get(&peer).ok_or_else(|| unknown_peer(peer))?;
        match rx.recv_timeout(self.recv_timeout) {
            Ok(payload) => Ok(payload),
            Err(RecvTimeoutError::Timeout) => Err(Error::Transport(meshlink::Error::Timeout(
                "waiting on a loopback channel",
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::Transport(meshlink::Error::ConnectionLost))
            }
        }
    }

    // channel halves close when the conn is dropped; the closed flag on the
    // owning Group already fences further local use
    fn shutdown(&self) {}
}

/// Transport selection, fixed at formation time.
pub enum Fabric {
    /// rendezvous and full mesh over TCP
    Tcp,
    /// pre-wired in-process channels
    Loopback(LoopbackConn),
}
