use anyhow::Context;
use structopt::StructOpt;

use ringcomm::{Fabric, GroupConfig, ReduceOp, Session};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ring_demo",
    about = "Every rank contributes a vector of its own rank value and all-reduces it."
)]
struct Opt {
    /// Total number of ranks; falls back to WORLD_SIZE
    #[structopt(long)]
    world_size: Option<usize>,
    /// This process's rank; falls back to RANK
    #[structopt(long)]
    rank: Option<usize>,
    /// Device index on this host; falls back to LOCAL_RANK, then 0
    #[structopt(long)]
    local_rank: Option<usize>,
    /// addr:port where rank 0 accepts joins; falls back to RENDEZVOUS_URI
    #[structopt(long)]
    rendezvous: Option<String>,
    /// Vector length
    #[structopt(long, default_value = "5")]
    vector_len: usize,
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn resolve_config(opt: &Opt) -> anyhow::Result<GroupConfig> {
    let world_size = opt
        .world_size
        .or_else(|| env_usize("WORLD_SIZE"))
        .context("--world-size or WORLD_SIZE is required")?;
    let global_rank = opt
        .rank
        .or_else(|| env_usize("RANK"))
        .context("--rank or RANK is required")?;
    let local_rank = opt.local_rank.or_else(|| env_usize("LOCAL_RANK")).unwrap_or(0);
    let rendezvous = opt
        .rendezvous
        .clone()
        .or_else(|| std::env::var("RENDEZVOUS_URI").ok())
        .context("--rendezvous or RENDEZVOUS_URI is required")?;
    Ok(GroupConfig::new(
        world_size,
        global_rank,
        local_rank,
        rendezvous,
    ))
}

fn main() -> anyhow::Result<()> {
    logging::init_log();

    let opt = Opt::from_args();
    let config = resolve_config(&opt)?;

    let session = Session::start(config, Fabric::Tcp)?;
    let group = session.group();
    log::info!(
        "running on rank {}/{} (local rank: {})",
        group.global_rank(),
        group.world_size(),
        group.local_rank()
    );

    let mut vector = vec![group.global_rank() as f32; opt.vector_len];
    log::info!("rank {} original vector: {:?}", group.global_rank(), vector);

    group.all_reduce(&mut vector, ReduceOp::Sum)?;
    log::info!(
        "rank {} after all_reduce: {:?}",
        group.global_rank(),
        vector
    );

    // every element should be the sum of 0..world_size
    let expected = (group.world_size() * (group.world_size() - 1) / 2) as f32;
    log::info!("rank {} expected sum: {}", group.global_rank(), expected);

    session.stop();
    Ok(())
}
