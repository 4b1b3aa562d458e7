use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("group formation timed out after {0:?}")]
    FormationTimeout(Duration),
    #[error("rank {0} is claimed by more than one process")]
    DuplicateRank(usize),
    #[error("device {requested} is unavailable ({available} devices visible)")]
    DeviceUnavailable { requested: usize, available: usize },
    #[error("device {bound} is already bound, refusing to rebind to device {requested}")]
    RebindNotAllowed { bound: usize, requested: usize },
    #[error("the group has been torn down")]
    GroupClosed,
    #[error("buffer length differs across ranks: ours {ours}, peer's {theirs}")]
    ShapeMismatch { ours: usize, theirs: usize },
    #[error("element type differs across ranks: ours {ours}, peer's {theirs}")]
    TypeMismatch { ours: &'static str, theirs: String },
    /// A collective failed mid-flight; the local buffer is indeterminate.
    #[error("collective aborted: {0}")]
    Aborted(#[source] meshlink::Error),
    #[error("transport error: {0}")]
    Transport(#[from] meshlink::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
