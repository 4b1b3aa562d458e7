use crate::Node;
use serde::{Deserialize, Serialize};

/// Control messages exchanged during group formation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// sent by a joiner to the bootstrap rank
    Join { rank: usize, node: Node },
    /// sent by the bootstrap once every rank has joined; indexed by rank
    Roster { nodes: Vec<Node> },
    /// sent by the bootstrap when a join cannot be honored
    Reject(Reject),
    /// first frame on every mesh connection, identifies the dialer
    Hello { rank: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reject {
    DuplicateRank { rank: usize },
    RankOutOfRange { rank: usize, world_size: usize },
}
