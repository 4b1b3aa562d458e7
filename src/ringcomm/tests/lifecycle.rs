use ringcomm::{Error, Fabric, Group, GroupConfig, LoopbackFabric, ReduceOp, Session};
use std::time::Duration;

#[test]
fn teardown_is_idempotent() {
    let mut conns = LoopbackFabric::new(2, Duration::from_secs(1));
    let config = GroupConfig::new(2, 0, 0, "");
    let group = Group::form(&config, Fabric::Loopback(conns.remove(0))).unwrap();

    assert!(!group.is_closed());
    group.teardown();
    assert!(group.is_closed());
    // second teardown is a no-op
    group.teardown();

    let mut buf = vec![1i32; 3];
    match group.all_reduce(&mut buf, ReduceOp::Sum) {
        Err(Error::GroupClosed) => {}
        other => panic!("expected GroupClosed, got {:?}", other),
    }
}

#[test]
fn session_runs_singleton_group() {
    let mut conns = LoopbackFabric::new(1, Duration::from_secs(1));
    let config = GroupConfig::new(1, 0, 0, "");
    let session = Session::start(config, Fabric::Loopback(conns.remove(0))).unwrap();

    assert_eq!(session.group().world_size(), 1);
    assert_eq!(session.device().index(), 0);

    let mut buf = vec![5i32, 6, 7];
    session.group().all_reduce(&mut buf, ReduceOp::Sum).unwrap();
    assert_eq!(buf, vec![5, 6, 7]);

    session.stop();
    session.stop(); // idempotent

    match session.group().all_reduce(&mut buf, ReduceOp::Sum) {
        Err(Error::GroupClosed) => {}
        other => panic!("expected GroupClosed, got {:?}", other),
    }
}

#[test]
fn loopback_conn_must_match_the_config() {
    let mut conns = LoopbackFabric::new(2, Duration::from_secs(1));
    // conn for rank 0 handed to a config claiming rank 1
    let config = GroupConfig::new(2, 1, 0, "");
    match Group::form(&config, Fabric::Loopback(conns.remove(0))) {
        Err(Error::InvalidConfig(_)) => {}
        other => panic!("expected InvalidConfig, got {:?}", other),
    }
}
