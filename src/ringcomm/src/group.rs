use crate::collective::{ReduceElement, ReduceOp};
use crate::config::GroupConfig;
use crate::transport::{Fabric, TcpTransport, Transport};
use crate::{Error, Result};
use meshlink::{frame, rendezvous, Node};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering::SeqCst};
use std::time::{Duration, Instant};

/// One process's membership in a formed group: rank identities plus the data
/// mesh. An explicit value passed by reference to every collective call site;
/// there is no process-wide singleton.
pub struct Group {
    world_size: usize,
    global_rank: usize,
    local_rank: usize,
    transport: Box<dyn Transport>,
    /// totally orders successive collectives issued on this group
    seq: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Group(rank {}/{})", self.global_rank, self.world_size)
    }
}

impl Group {
    /// Form the group: rendezvous with every other rank and establish the
    /// data mesh. Blocks until all `world_size` ranks are present or the
    /// formation timeout expires.
    pub fn form(config: &GroupConfig, fabric: Fabric) -> Result<Group> {
        config.validate()?;

        let transport: Box<dyn Transport> = match fabric {
            Fabric::Tcp => Box::new(Self::form_tcp(config)?),
            Fabric::Loopback(conn) => {
                if conn.rank() != config.global_rank || conn.world_size() != config.world_size {
                    return Err(Error::InvalidConfig(format!(
                        "loopback conn is rank {}/{} but the config says {}/{}",
                        conn.rank(),
                        conn.world_size(),
                        config.global_rank,
                        config.world_size
                    )));
                }
                Box::new(conn)
            }
        };

        log::info!(
            "rank {}/{} formed (local rank: {})",
            config.global_rank,
            config.world_size,
            config.local_rank
        );
        Ok(Group {
            world_size: config.world_size,
            global_rank: config.global_rank,
            local_rank: config.local_rank,
            transport,
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn form_tcp(config: &GroupConfig) -> Result<TcpTransport> {
        if config.world_size == 1 {
            // nobody to talk to
            return TcpTransport::new(Default::default(), config.collective_timeout);
        }

        let deadline = Instant::now() + config.formation_timeout;
        let timeout = config.formation_timeout;
        let (listener, mesh_port) =
            frame::bind_avail_port().map_err(|e| formation_error(e, timeout))?;

        let nodes = if config.global_rank == 0 {
            let endpoint: Node = config.rendezvous_endpoint.parse().map_err(|e| {
                Error::InvalidConfig(format!("bad rendezvous endpoint: {}", e))
            })?;
            let control = std::net::TcpListener::bind(config.rendezvous_endpoint.as_str())
                .map_err(|e| formation_error(e.into(), timeout))?;
            // peers reach us at the rendezvous host, on the mesh port
            let my_node = Node {
                addr: endpoint.addr,
                port: mesh_port,
            };
            rendezvous::bootstrap(&control, config.world_size, my_node, deadline)
                .map_err(|e| formation_error(e, timeout))?
        } else {
            rendezvous::join(
                &config.rendezvous_endpoint,
                config.global_rank,
                mesh_port,
                deadline,
            )
            .map_err(|e| formation_error(e, timeout))?
        };

        let peers = rendezvous::full_mesh(&nodes, config.global_rank, &listener, deadline)
            .map_err(|e| formation_error(e, timeout))?;
        TcpTransport::new(peers, config.collective_timeout)
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn global_rank(&self) -> usize {
        self.global_rank
    }

    pub fn local_rank(&self) -> usize {
        self.local_rank
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(SeqCst)
    }

    /// Tear the group down and release its connections. Idempotent; any
    /// collective call issued afterwards fails with `GroupClosed`.
    pub fn teardown(&self) {
        if !self.closed.swap(true, SeqCst) {
            log::info!("rank {}/{} tearing down", self.global_rank, self.world_size);
            self.transport.shutdown();
        }
    }

    /// Elementwise all-reduce across the whole group; blocks until this rank
    /// holds the fully reduced buffer. Every rank must call this with a
    /// buffer of the same length and element type, and all ranks must issue
    /// their collectives in the same order. On any error the buffer contents
    /// are indeterminate and must not be used; the call is never retried
    /// internally.
    ///
    /// Determinism: chunk `j` is accumulated in ring order starting at rank
    /// `j` (`v_j`, then `v_{j+1}`, ...), and that single accumulation chain
    /// is what the all-gather phase distributes, so results are bit-identical
    /// on every rank, floats included.
    pub fn all_reduce<T: ReduceElement>(&self, buf: &mut [T], op: ReduceOp) -> Result<()> {
        if self.closed.load(SeqCst) {
            return Err(Error::GroupClosed);
        }
        let seq = self.seq.fetch_add(1, SeqCst);
        let n = self.world_size;
        if n == 1 {
            // reduction over a singleton group is the identity
            return Ok(());
        }

        log::debug!(
            "rank {} all_reduce start: seq={} len={} op={:?}",
            self.global_rank,
            seq,
            buf.len(),
            op
        );
        let next = (self.global_rank + 1) % n;
        let prev = (self.global_rank + n - 1) % n;

        // Reduce-scatter: n-1 steps; afterwards chunk (r+1) % n is fully
        // reduced on rank r. Each step posts the outgoing chunk before
        // draining the incoming one; if the fabric cannot buffer the chunk
        // the blocked write hits the transport timeout and the call aborts.
        for step in 0..n - 1 {
            let send_chunk = (self.global_rank + n - step) % n;
            let recv_chunk = (self.global_rank + n - step - 1) % n;
            self.send_chunk(next, buf, seq, Phase::ReduceScatter, step, send_chunk)?;
            let incoming =
                self.recv_chunk::<T>(prev, buf.len(), seq, Phase::ReduceScatter, step, recv_chunk)?;
            let range = chunk_range(buf.len(), n, recv_chunk);
            for (elem, acc) in buf[range].iter_mut().zip(incoming) {
                // the received value accumulates all earlier ranks on the
                // ring; our contribution goes last
                *elem = T::combine(op, acc, *elem);
            }
        }

        // All-gather: circulate the finished chunks unchanged.
        for step in 0..n - 1 {
            let send_chunk = (self.global_rank + 1 + n - step) % n;
            let recv_chunk = (self.global_rank + n - step) % n;
            self.send_chunk(next, buf, seq, Phase::AllGather, step, send_chunk)?;
            let incoming =
                self.recv_chunk::<T>(prev, buf.len(), seq, Phase::AllGather, step, recv_chunk)?;
            let range = chunk_range(buf.len(), n, recv_chunk);
            buf[range].copy_from_slice(&incoming);
        }

        log::debug!("rank {} all_reduce done: seq={}", self.global_rank, seq);
        Ok(())
    }

    fn send_chunk<T: ReduceElement>(
        &self,
        peer: usize,
        buf: &[T],
        seq: u64,
        phase: Phase,
        step: usize,
        chunk: usize,
    ) -> Result<()> {
        let range = chunk_range(buf.len(), self.world_size, chunk);
        let msg = ChunkMsg {
            seq,
            phase,
            step,
            chunk,
            dtype: T::type_tag().to_owned(),
            total_len: buf.len(),
            elems: buf[range].to_vec(),
        };
        let payload =
            bincode::serialize(&msg).map_err(|e| Error::Aborted(meshlink::Error::Codec(e)))?;
        self.transport.send(peer, &payload).map_err(abort)
    }

    fn recv_chunk<T: ReduceElement>(
        &self,
        peer: usize,
        total_len: usize,
        seq: u64,
        phase: Phase,
        step: usize,
        chunk: usize,
    ) -> Result<Vec<T>> {
        let payload = self.transport.recv(peer).map_err(abort)?;
        let msg: ChunkMsg<T> = bincode::deserialize(&payload)
            .map_err(|e| Error::Aborted(meshlink::Error::Codec(e)))?;

        if msg.dtype != T::type_tag() {
            return Err(Error::TypeMismatch {
                ours: T::type_tag(),
                theirs: msg.dtype,
            });
        }
        if msg.total_len != total_len {
            return Err(Error::ShapeMismatch {
                ours: total_len,
                theirs: msg.total_len,
            });
        }
        if msg.seq != seq || msg.phase != phase || msg.step != step || msg.chunk != chunk {
            return Err(Error::Aborted(meshlink::Error::Protocol(format!(
                "chunk out of order from rank {}: got seq={} {:?} step={} chunk={}, \
                 expected seq={} {:?} step={} chunk={}",
                peer, msg.seq, msg.phase, msg.step, msg.chunk, seq, phase, step, chunk
            ))));
        }
        let expected = chunk_range(total_len, self.world_size, chunk).len();
        if msg.elems.len() != expected {
            return Err(Error::Aborted(meshlink::Error::Protocol(format!(
                "chunk {} from rank {} has {} elements, expected {}",
                chunk,
                peer,
                msg.elems.len(),
                expected
            ))));
        }
        Ok(msg.elems)
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Phase {
    ReduceScatter,
    AllGather,
}

/// One hop's worth of collective traffic between ring neighbors.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkMsg<T> {
    seq: u64,
    phase: Phase,
    step: usize,
    chunk: usize,
    dtype: String,
    total_len: usize,
    elems: Vec<T>,
}

fn formation_error(e: meshlink::Error, timeout: Duration) -> Error {
    match e {
        meshlink::Error::Timeout(_) => Error::FormationTimeout(timeout),
        meshlink::Error::DuplicateRank(rank) => Error::DuplicateRank(rank),
        e => Error::Transport(e),
    }
}

/// Inside a collective, any transport failure means the call is aborted.
fn abort(e: Error) -> Error {
    match e {
        Error::Transport(e) => Error::Aborted(e),
        e => e,
    }
}

/// Contiguous range of chunk `chunk` when `len` elements are split into `n`
/// chunks: the first `len % n` chunks carry one extra element.
fn chunk_range(len: usize, n: usize, chunk: usize) -> std::ops::Range<usize> {
    let base = len / n;
    let rem = len % n;
    let start = chunk * base + chunk.min(rem);
    let extra = if chunk < rem { 1 } else { 0 };
    start..start + base + extra
}

#[cfg(test)]
mod tests {
    use super::chunk_range;

    #[test]
    fn chunks_tile_the_buffer() {
        for &(len, n) in &[(0usize, 3usize), (2, 4), (5, 4), (12, 3), (33, 4), (7, 1)] {
            let mut covered = 0;
            for chunk in 0..n {
                let range = chunk_range(len, n, chunk);
                assert_eq!(range.start, covered, "len={} n={} chunk={}", len, n, chunk);
                covered = range.end;
            }
            assert_eq!(covered, len);
        }
    }

    #[test]
    fn uneven_lengths_spread_the_remainder() {
        assert_eq!(chunk_range(5, 4, 0), 0..2);
        assert_eq!(chunk_range(5, 4, 1), 2..3);
        assert_eq!(chunk_range(5, 4, 2), 3..4);
        assert_eq!(chunk_range(5, 4, 3), 4..5);
    }
}
