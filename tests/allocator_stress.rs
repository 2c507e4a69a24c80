//! Random alloc/write/free/move sequences checked against a plain model

use chunkstore::error::Result;
use chunkstore::{ChunkPointer, Cluster, ClusterConfig, MemoryStore};
use proptest::prelude::*;
use proptest::test_runner::RngSeed;

#[derive(Debug, Clone)]
enum Op {
    Alloc { capacity: u64, len: usize, fill: u8 },
    Write { pick: usize, len: usize, fill: u8 },
    Free { pick: usize },
    Move { pick: usize, depth: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        7 => (1u64..200, 0usize..300, any::<u8>())
            .prop_map(|(capacity, len, fill)| Op::Alloc { capacity, len, fill }),
        6 => (any::<usize>(), 0usize..500, any::<u8>())
            .prop_map(|(pick, len, fill)| Op::Write { pick, len, fill }),
        3 => any::<usize>().prop_map(|pick| Op::Free { pick }),
        4 => (any::<usize>(), any::<usize>()).prop_map(|(pick, depth)| Op::Move { pick, depth }),
    ]
}

fn config() -> ClusterConfig {
    ClusterConfig {
        validate: true,
        ..ClusterConfig::default()
    }
}

fn pattern(len: usize, fill: u8) -> Vec<u8> {
    (0..len).map(|i| fill.wrapping_add(i as u8)).collect()
}

fn check_contents(cluster: &mut Cluster<MemoryStore>, live: &[(ChunkPointer, Vec<u8>)]) -> Result<()> {
    assert_eq!(cluster.user_chunks().len(), live.len());
    for (head, content) in live {
        assert_eq!(&cluster.read_content(*head)?, content, "chain at {}", head);
    }
    Ok(())
}

fn run(ops: &[Op]) -> Result<()> {
    let mut cluster = Cluster::init(MemoryStore::new(), config())?;
    let mut live: Vec<(ChunkPointer, Vec<u8>)> = Vec::new();

    for (step, op) in ops.iter().enumerate() {
        match *op {
            Op::Alloc { capacity, len, fill } => {
                let head = cluster.alloc_user(capacity)?.pointer();
                let content = pattern(len, fill);
                cluster.write_content(head, &content)?;
                live.push((head, content));
            }
            Op::Write { pick, len, fill } if !live.is_empty() => {
                let index = pick % live.len();
                let content = pattern(len, fill);
                cluster.write_content(live[index].0, &content)?;
                live[index].1 = content;
            }
            Op::Free { pick } if !live.is_empty() => {
                let (head, _) = live.swap_remove(pick % live.len());
                cluster.free(head)?;
            }
            Op::Move { pick, depth } if !live.is_empty() => {
                let index = pick % live.len();
                let chain = cluster.collect_next(live[index].0)?;
                let position = depth % chain.len();
                let moved = cluster.move_chunk(chain[position].pointer())?;
                if position == 0 {
                    live[index].0 = moved;
                }
            }
            _ => {}
        }

        check_contents(&mut cluster, &live)?;
        if step % 100 == 0 {
            cluster.check_consistency()?;
        }
    }
    cluster.check_consistency()?;
    let len = cluster.store_len();

    let store = cluster.close()?;
    let mut cluster = Cluster::open(store, config())?;
    assert_eq!(cluster.store_len(), len);
    check_contents(&mut cluster, &live)?;
    println!("✓ {} steps, {} live chains, store {} bytes", ops.len(), live.len(), len);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 2,
        rng_seed: RngSeed::Fixed(0x00c0_ffee),
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn random_operations_keep_every_chain_intact(ops in prop::collection::vec(op(), 1500)) {
        run(&ops)?;
    }
}

#[test]
fn test_small_chunks_after_store_outgrows_pointers() -> Result<()> {
    let mut cluster = Cluster::init(MemoryStore::new(), config())?;
    let heads: Vec<ChunkPointer> = (1..8)
        .map(|capacity| cluster.alloc_user(capacity).map(|c| c.pointer()))
        .collect::<Result<_>>()?;
    // push the store past what one- and two-byte next fields can address
    cluster.alloc(70_000)?;

    for (i, head) in heads.iter().enumerate() {
        let content = pattern(50 + i * 10, i as u8);
        cluster.write_content(*head, &content)?;
        let tail = *cluster.collect_next(*head)?.last().expect("chain is never empty");
        cluster.move_chunk(tail.pointer())?;
        assert_eq!(cluster.read_content(*head)?, content);
    }
    cluster.check_consistency()?;
    Ok(())
}
