use rand::Rng;
use ringcomm::{Error, Fabric, Group, GroupConfig, LoopbackFabric, ReduceOp};
use std::time::Duration;

fn loopback_groups(world_size: usize) -> Vec<Group> {
    LoopbackFabric::new(world_size, Duration::from_secs(5))
        .into_iter()
        .enumerate()
        .map(|(rank, conn)| {
            let config = GroupConfig::new(world_size, rank, 0, "");
            Group::form(&config, Fabric::Loopback(conn)).unwrap()
        })
        .collect()
}

/// Run one closure per rank on its own thread and collect the results in
/// rank order.
fn run_ranks<T, F>(groups: Vec<Group>, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(Group) -> T + Send + Sync + Clone + 'static,
{
    let handles: Vec<_> = groups
        .into_iter()
        .map(|group| {
            let f = f.clone();
            std::thread::spawn(move || f(group))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn sum_matches_elementwise_reference() {
    let world_size = 4;
    let len = 33; // not divisible by world_size, exercises uneven chunks
    let mut rng = rand::thread_rng();
    let inputs: Vec<Vec<i64>> = (0..world_size)
        .map(|_| (0..len).map(|_| rng.gen_range(-1000..1000)).collect())
        .collect();

    let mut expected = vec![0i64; len];
    for input in &inputs {
        for (acc, v) in expected.iter_mut().zip(input) {
            *acc += v;
        }
    }

    let handles: Vec<_> = loopback_groups(world_size)
        .into_iter()
        .zip(inputs)
        .map(|(group, mut buf)| {
            std::thread::spawn(move || {
                group.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
                buf
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn four_ranks_rank_valued_vectors() {
    // world_size = 4, every rank holds [r; 5]; the sum is 0+1+2+3 = 6
    let results = run_ranks(loopback_groups(4), |group| {
        let mut buf = vec![group.global_rank() as f32; 5];
        group.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
        buf
    });
    for buf in results {
        assert_eq!(buf, vec![6.0; 5]);
    }
}

#[test]
fn three_ranks_concrete_vectors() {
    let results = run_ranks(loopback_groups(3), |group| {
        let v = (group.global_rank() + 1) as i32;
        let mut buf = vec![v, v];
        group.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
        buf
    });
    for buf in results {
        assert_eq!(buf, vec![6, 6]);
    }
}

#[test]
fn singleton_group_is_identity() {
    let mut groups = loopback_groups(1);
    let group = groups.pop().unwrap();
    let mut buf = vec![3i64, 1, 4, 1, 5];
    group.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
    assert_eq!(buf, vec![3, 1, 4, 1, 5]);
}

#[test]
fn back_to_back_calls_are_independent() {
    let results = run_ranks(loopback_groups(2), |group| {
        let r = group.global_rank() as i64;
        let mut first = vec![r + 1; 4];
        group.all_reduce(&mut first, ReduceOp::Sum).unwrap();
        let mut second = vec![(r + 1) * 10; 4];
        group.all_reduce(&mut second, ReduceOp::Sum).unwrap();
        (first, second)
    });
    for (first, second) in results {
        assert_eq!(first, vec![3; 4]);
        // no residue from the first call may leak into the second
        assert_eq!(second, vec![30; 4]);
    }
}

#[test]
fn min_max_prod_operators() {
    let results = run_ranks(loopback_groups(2), |group| {
        let mut min_buf = if group.global_rank() == 0 {
            vec![1i32, 5]
        } else {
            vec![3i32, 2]
        };
        let mut max_buf = min_buf.clone();
        let mut prod_buf = min_buf.clone();
        group.all_reduce(&mut min_buf, ReduceOp::Min).unwrap();
        group.all_reduce(&mut max_buf, ReduceOp::Max).unwrap();
        group.all_reduce(&mut prod_buf, ReduceOp::Prod).unwrap();
        (min_buf, max_buf, prod_buf)
    });
    for (min_buf, max_buf, prod_buf) in results {
        assert_eq!(min_buf, vec![1, 2]);
        assert_eq!(max_buf, vec![3, 5]);
        assert_eq!(prod_buf, vec![3, 10]);
    }
}

#[test]
fn float_results_are_bit_identical_across_ranks() {
    let results = run_ranks(loopback_groups(3), |group| {
        let r = group.global_rank();
        let mut buf: Vec<f32> = (0..7)
            .map(|i| 0.1 * (r as f32 + 1.0) + 0.01 * i as f32)
            .collect();
        group.all_reduce(&mut buf, ReduceOp::Sum).unwrap();
        buf.into_iter().map(f32::to_bits).collect::<Vec<u32>>()
    });
    for bits in &results[1..] {
        assert_eq!(bits, &results[0]);
    }
}

#[test]
fn severed_rank_aborts_the_peers() {
    let mut groups = loopback_groups(3);
    // rank 2 disappears before the collective
    let severed = groups.pop().unwrap();
    drop(severed);

    let handles: Vec<_> = groups
        .into_iter()
        .map(|group| {
            std::thread::spawn(move || {
                let mut buf = vec![1.0f64; 8];
                group.all_reduce(&mut buf, ReduceOp::Sum)
            })
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            Err(Error::Aborted(_)) => {}
            other => panic!("expected Aborted, got {:?}", other),
        }
    }
}

#[test]
fn mismatched_element_types_are_surfaced() {
    let mut groups = loopback_groups(2);
    let group1 = groups.pop().unwrap();
    let group0 = groups.pop().unwrap();

    // same length, same element size, different element type: without the
    // wire tag both ranks would happily reinterpret each other's bits
    let float_rank = std::thread::spawn(move || {
        let mut buf = vec![1.5f32; 4];
        group0.all_reduce(&mut buf, ReduceOp::Sum).map(|_| ())
    });
    let int_rank = std::thread::spawn(move || {
        let mut buf = vec![7u32; 4];
        group1.all_reduce(&mut buf, ReduceOp::Sum).map(|_| ())
    });

    for handle in vec![float_rank, int_rank] {
        match handle.join().unwrap() {
            Err(Error::TypeMismatch { ours, theirs }) => {
                assert_ne!(ours, theirs.as_str());
            }
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }
}

#[test]
fn mismatched_buffer_lengths_are_surfaced() {
    let handles: Vec<_> = loopback_groups(2)
        .into_iter()
        .map(|group| {
            std::thread::spawn(move || {
                let len = if group.global_rank() == 0 { 4 } else { 6 };
                let mut buf = vec![1i32; len];
                group.all_reduce(&mut buf, ReduceOp::Sum)
            })
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            Err(Error::ShapeMismatch { ours, theirs }) => {
                assert_ne!(ours, theirs);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }
}
