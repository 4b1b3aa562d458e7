use crate::{Error, Result};
use std::sync::Mutex;

/// Opaque handle to the compute resource bound to this rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHandle {
    index: usize,
}

impl DeviceHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Enumerates the compute resources visible to this process.
pub trait DeviceInventory {
    fn enumerate(&self) -> usize;

    fn select(&self, index: usize) -> Result<DeviceHandle> {
        let available = self.enumerate();
        if index >= available {
            return Err(Error::DeviceUnavailable {
                requested: index,
                available,
            });
        }
        Ok(DeviceHandle { index })
    }
}

/// Default inventory: one logical device per CPU core.
pub struct HostInventory;

impl DeviceInventory for HostInventory {
    fn enumerate(&self) -> usize {
        num_cpus::get()
    }
}

lazy_static::lazy_static! {
    static ref BOUND_DEVICE: Mutex<Option<usize>> = Mutex::new(None);
}

/// Bind this process to the device indexed by `local_rank` and make it the
/// process default. Single-assignment: binding the same index again is a
/// no-op, a different index is an error.
pub fn bind(inventory: &dyn DeviceInventory, local_rank: usize) -> Result<DeviceHandle> {
    let handle = inventory.select(local_rank)?;
    let mut bound = BOUND_DEVICE.lock().unwrap();
    match *bound {
        Some(index) if index == local_rank => Ok(handle),
        Some(index) => Err(Error::RebindNotAllowed {
            bound: index,
            requested: local_rank,
        }),
        None => {
            log::info!("bound device {}", local_rank);
            *bound = Some(local_rank);
            Ok(handle)
        }
    }
}
