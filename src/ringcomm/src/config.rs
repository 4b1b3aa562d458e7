use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_FORMATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_COLLECTIVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved membership and rendezvous parameters for one process. Built once
/// at startup (from flags or the environment) and validated once; the engine
/// itself never consults the environment.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// total number of ranks in the group
    pub world_size: usize,
    /// this process's unique identity in [0, world_size)
    pub global_rank: usize,
    /// device index on the local host
    pub local_rank: usize,
    /// addr:port where rank 0 accepts joins; must be reachable by every rank.
    /// Ignored by loopback groups.
    pub rendezvous_endpoint: String,
    pub formation_timeout: Duration,
    /// per-receive bound inside a collective call
    pub collective_timeout: Duration,
}

impl GroupConfig {
    pub fn new(
        world_size: usize,
        global_rank: usize,
        local_rank: usize,
        rendezvous_endpoint: impl Into<String>,
    ) -> Self {
        GroupConfig {
            world_size,
            global_rank,
            local_rank,
            rendezvous_endpoint: rendezvous_endpoint.into(),
            formation_timeout: DEFAULT_FORMATION_TIMEOUT,
            collective_timeout: DEFAULT_COLLECTIVE_TIMEOUT,
        }
    }

    /// Read `WORLD_SIZE`, `RANK`, `LOCAL_RANK` and `RENDEZVOUS_URI`.
    pub fn from_env() -> Result<Self> {
        let world_size = env_usize("WORLD_SIZE")?;
        let global_rank = env_usize("RANK")?;
        let local_rank = env_usize("LOCAL_RANK")?;
        let rendezvous_endpoint = std::env::var("RENDEZVOUS_URI")
            .map_err(|_| Error::InvalidConfig("RENDEZVOUS_URI is not set".to_owned()))?;
        let config = GroupConfig::new(world_size, global_rank, local_rank, rendezvous_endpoint);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::InvalidConfig(
                "world_size must be positive".to_owned(),
            ));
        }
        if self.global_rank >= self.world_size {
            return Err(Error::InvalidConfig(format!(
                "global_rank {} is outside [0, {})",
                self.global_rank, self.world_size
            )));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<usize> {
    std::env::var(key)
        .map_err(|_| Error::InvalidConfig(format!("{} is not set", key)))?
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} is not a non-negative integer", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_world_size_is_rejected() {
        let config = GroupConfig::new(0, 0, 0, "127.0.0.1:9000");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rank_outside_world_is_rejected() {
        let config = GroupConfig::new(2, 2, 0, "127.0.0.1:9000");
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn from_env_reads_all_fields() {
        std::env::set_var("WORLD_SIZE", "4");
        std::env::set_var("RANK", "2");
        std::env::set_var("LOCAL_RANK", "1");
        std::env::set_var("RENDEZVOUS_URI", "10.0.0.1:29500");
        let config = GroupConfig::from_env().unwrap();
        assert_eq!(config.world_size, 4);
        assert_eq!(config.global_rank, 2);
        assert_eq!(config.local_rank, 1);
        assert_eq!(config.rendezvous_endpoint, "10.0.0.1:29500");
    }
}
