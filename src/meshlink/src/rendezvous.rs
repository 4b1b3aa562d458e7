//! Group formation: rank 0 collects `Join` requests on a well-known endpoint
//! and broadcasts the rank-indexed roster; every rank then builds an
//! all-to-all mesh in two stages (accept from lower ranks, dial higher ones).
use crate::command::{Command, Reject};
use crate::{frame, Error, Node, Result};
use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

fn accept_until(
    listener: &TcpListener,
    deadline: Instant,
    phase: &'static str,
) -> Result<(TcpStream, std::net::SocketAddr)> {
    loop {
        if Instant::now() >= deadline {
            return Err(Error::Timeout(phase));
        }
        match listener.accept() {
            Ok((stream, addr)) => {
                // the accepted socket must not inherit the listener's
                // non-blocking mode
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(frame::remaining(deadline, phase)?))?;
                return Ok((stream, addr));
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Rank 0 side of formation. Blocks until all `world_size - 1` other ranks
/// have joined, then broadcasts the roster. A second claim for an occupied
/// rank is rejected immediately; the group keeps waiting for the real holder.
pub fn bootstrap(
    listener: &TcpListener,
    world_size: usize,
    my_node: Node,
    deadline: Instant,
) -> Result<Vec<Node>> {
    let mut members: Vec<Option<Node>> = vec![None; world_size];
    members[0] = Some(my_node);
    let mut joined: Vec<(usize, TcpStream)> = Vec::new();

    listener.set_nonblocking(true)?;
    while joined.len() + 1 < world_size {
        let (mut stream, addr) = accept_until(listener, deadline, "waiting for ranks to join")?;
        log::debug!("bootstrap accepts a connection from {}", addr);

        let cmd: Command = frame::recv_cmd(&mut stream)?;
        match cmd {
            Command::Join { rank, node } => {
                if rank >= world_size {
                    log::error!("join from out-of-range rank {}", rank);
                    let reject = Reject::RankOutOfRange { rank, world_size };
                    send_reject(&mut stream, reject);
                } else if members[rank].is_some() {
                    log::error!("rank {} claimed twice", rank);
                    let reject = Reject::DuplicateRank { rank };
                    send_reject(&mut stream, reject);
                } else {
                    log::debug!("rank {} joined from {}", rank, node);
                    members[rank] = Some(node);
                    joined.push((rank, stream));
                }
            }
            cmd => return Err(Error::Protocol(format!("unexpected command: {:?}", cmd))),
        }
    }
    listener.set_nonblocking(false)?;

    let nodes = members
        .into_iter()
        .collect::<Option<Vec<Node>>>()
        .ok_or_else(|| Error::Protocol("roster left incomplete".to_owned()))?;

    let roster = Command::Roster {
        nodes: nodes.clone(),
    };
    for (rank, mut stream) in joined {
        log::debug!("sending roster to rank {}", rank);
        frame::send_cmd(&mut stream, &roster)?;
    }

    Ok(nodes)
}

// a claimant that cannot take its reject must not stall the whole group
fn send_reject(stream: &mut TcpStream, reject: Reject) {
    if let Err(e) = frame::send_cmd(stream, &Command::Reject(reject)) {
        log::warn!("failed to deliver a reject: {}", e);
    }
}

/// Joiner side of formation: announce our rank and mesh port to the
/// bootstrap endpoint, then wait for the roster. Our mesh address is the
/// local address of the control connection, which is how the bootstrap
/// (and therefore every peer) can reach us.
pub fn join(uri: &str, rank: usize, mesh_port: u16, deadline: Instant) -> Result<Vec<Node>> {
    let mut bootstrap = frame::connect_retry(uri, deadline)?;
    bootstrap.set_read_timeout(Some(frame::remaining(deadline, "waiting for the roster")?))?;

    let my_node = Node {
        addr: bootstrap.local_addr()?.ip().to_string(),
        port: mesh_port,
    };
    frame::send_cmd(
        &mut bootstrap,
        &Command::Join {
            rank,
            node: my_node,
        },
    )?;

    match frame::recv_cmd(&mut bootstrap)? {
        Command::Roster { nodes } => Ok(nodes),
        Command::Reject(Reject::DuplicateRank { rank }) => Err(Error::DuplicateRank(rank)),
        Command::Reject(reject) => Err(Error::Protocol(format!("join rejected: {:?}", reject))),
        cmd => Err(Error::Protocol(format!("unexpected command: {:?}", cmd))),
    }
}

/// Build the data mesh from a roster. Every rank first accepts one connection
/// from each lower rank, then dials every higher rank in increasing order, so
/// no pair of ranks ever dials each other simultaneously. The first frame on
/// each dialed connection is `Hello` carrying the dialer's rank.
pub fn full_mesh(
    nodes: &[Node],
    my_rank: usize,
    listener: &TcpListener,
    deadline: Instant,
) -> Result<HashMap<usize, TcpStream>> {
    let mut peers: HashMap<usize, TcpStream> = HashMap::new();

    log::debug!("number of mesh connections to accept: {}", my_rank);
    listener.set_nonblocking(true)?;
    while peers.len() < my_rank {
        let (mut stream, addr) = accept_until(listener, deadline, "accepting mesh connections")?;
        log::debug!("accepted a mesh connection from {}", addr);

        match frame::recv_cmd(&mut stream)? {
            Command::Hello { rank } if rank < my_rank => {
                if peers.insert(rank, stream).is_some() {
                    return Err(Error::Protocol(format!("rank {} connected twice", rank)));
                }
            }
            cmd => return Err(Error::Protocol(format!("unexpected command: {:?}", cmd))),
        }
    }
    listener.set_nonblocking(false)?;

    for (rank, node) in nodes.iter().enumerate().skip(my_rank + 1) {
        log::debug!("dialing rank {} at {}", rank, node);
        let mut stream = frame::connect_retry(&node.to_string(), deadline)?;
        frame::send_cmd(&mut stream, &Command::Hello { rank: my_rank })?;
        peers.insert(rank, stream);
    }

    Ok(peers)
}
