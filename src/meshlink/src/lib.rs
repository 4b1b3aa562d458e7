//! Minimal blocking TCP messaging used for group formation and collective
//! traffic: length-prefixed bincode frames plus a small rendezvous protocol
//! (join a bootstrap rank, receive the roster, build a full mesh).
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod command;
pub mod frame;
pub mod rendezvous;

#[derive(Debug, Error)]
pub enum Error {
    #[error("connection has been dropped")]
    ConnectionLost,
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("deadline exceeded while {0}")]
    Timeout(&'static str),
    #[error("rank {0} already joined the group")]
    DuplicateRank(usize),
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            UnexpectedEof | ConnectionReset | ConnectionAborted | BrokenPipe => {
                Error::ConnectionLost
            }
            WouldBlock | TimedOut => Error::Timeout("waiting on a socket"),
            _ => Error::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A peer address in the mesh.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Node {
    pub addr: String,
    pub port: u16,
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

impl std::str::FromStr for Node {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let pos = s
            .rfind(':')
            .ok_or_else(|| Error::Protocol(format!("not an addr:port pair: {}", s)))?;
        let (addr, port) = s.split_at(pos);
        let port = port[1..]
            .parse()
            .map_err(|_| Error::Protocol(format!("bad port in: {}", s)))?;
        Ok(Node {
            addr: addr.to_owned(),
            port,
        })
    }
}

impl std::net::ToSocketAddrs for Node {
    type Iter = std::vec::IntoIter<std::net::SocketAddr>;
    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        (&*self.addr, self.port).to_socket_addrs()
    }
}
