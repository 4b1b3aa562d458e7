//! Group-membership and collective-reduction coordination: form a fixed-size
//! group of processes, bind each rank to a device, and run blocking ring
//! all-reduce calls with identical results on every rank.
pub mod collective;
pub mod config;
pub mod device;
pub mod error;
pub mod group;
pub mod session;
pub mod transport;

pub use collective::{ReduceElement, ReduceOp};
pub use config::GroupConfig;
pub use device::{DeviceHandle, DeviceInventory, HostInventory};
pub use error::{Error, Result};
pub use group::Group;
pub use session::Session;
pub use transport::{Fabric, LoopbackConn, LoopbackFabric, Transport};
