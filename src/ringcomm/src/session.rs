use crate::config::GroupConfig;
use crate::device::{self, DeviceHandle, HostInventory};
use crate::group::Group;
use crate::transport::Fabric;
use crate::Result;

/// Lifecycle manager: group formation, then device binding, then any number
/// of collective calls through `group()`, then teardown.
pub struct Session {
    group: Group,
    device: DeviceHandle,
}

impl Session {
    /// Form the group, then bind the local device, in that order; the first
    /// error wins and leaves nothing half-started.
    pub fn start(config: GroupConfig, fabric: Fabric) -> Result<Session> {
        config.validate()?;
        let group = Group::form(&config, fabric)?;
        let device = match device::bind(&HostInventory, config.local_rank) {
            Ok(device) => device,
            Err(e) => {
                group.teardown();
                return Err(e);
            }
        };
        log::info!(
            "session started: rank {}/{}, device {}",
            group.global_rank(),
            group.world_size(),
            device.index()
        );
        Ok(Session { group, device })
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn device(&self) -> DeviceHandle {
        self.device
    }

    /// Tear the group down. Idempotent: a second call is a no-op. The group
    /// is also torn down when the session is dropped.
    pub fn stop(&self) {
        self.group.teardown();
    }
}
