use crate::structures::expire_table::{ExpireTable, Visit};

use super::assert_permutation;

#[test]
fn walker_drops_records_by_verdict() {
    let table = ExpireTable::create_with_seed(64, 8, 77).unwrap();
    for i in 0..30u8 {
        let mut cell = table.find_or_insert(format!("w{i}").as_bytes());
        cell[0] = i;
    }
    let mut live = 0;
    table.scour(|_| live += 1);
    assert_eq!(live, 30);

    let walker = table.walker_create(|cell| {
        if cell[0] % 2 == 1 {
            Visit::Drop
        } else {
            Visit::Keep
        }
    });

    // Two full sweeps over the four buckets.
    let steps = table.bucket_space() * 2;
    assert_eq!(steps, 8);
    let mut visited_total = 0;
    for _ in 0..steps {
        visited_total += table.walker_step(walker).unwrap();
    }
    // First sweep sees all 30, second only the 15 survivors.
    assert_eq!(visited_total, 45);
    assert_eq!(table.walker_loops(walker).unwrap(), 2);

    let mut survivors = Vec::new();
    table.scour(|cell| survivors.push(cell[0]));
    survivors.sort_unstable();
    assert_eq!(survivors, (0..30).filter(|b| b % 2 == 0).collect::<Vec<u8>>());

    assert!(table.find(b"w1").is_none(), "dropped record still findable");
    assert!(table.find(b"w2").is_some());
    assert_permutation(&table);
}

#[test]
fn walker_step_counts_only_live_records() {
    let table = ExpireTable::create(64, 8).unwrap();
    let walker = table.walker_create(|_| Visit::Keep);
    for _ in 0..table.bucket_space() {
        assert_eq!(table.walker_step(walker).unwrap(), 0);
    }
    assert_eq!(table.walker_loops(walker).unwrap(), 1);
}

#[test]
fn walkers_keep_independent_cursors() {
    let table = ExpireTable::create_with_seed(64, 8, 31).unwrap();
    for i in 0..20u32 {
        table.find_or_insert(format!("i{i}").as_bytes());
    }
    let fast = table.walker_create(|_| Visit::Keep);
    let slow = table.walker_create(|_| Visit::Keep);

    for _ in 0..table.bucket_space() {
        table.walker_step(fast).unwrap();
    }
    assert_eq!(table.walker_loops(fast).unwrap(), 1);
    assert_eq!(table.walker_loops(slow).unwrap(), 0);

    // The slow walker still sees the whole table on its own sweep.
    let mut seen = 0;
    for _ in 0..table.bucket_space() {
        seen += table.walker_step(slow).unwrap();
    }
    assert_eq!(seen, 20);
}

#[test]
fn destroyed_walker_handles_go_stale() {
    let table = ExpireTable::create(64, 8).unwrap();
    let walker = table.walker_create(|_| Visit::Keep);
    table.walker_step(walker).unwrap();
    table.walker_destroy(walker).unwrap();

    assert!(table.walker_step(walker).is_err());
    assert!(table.walker_loops(walker).is_err());
    assert!(table.walker_destroy(walker).is_err());

    // The slot is recycled under a fresh generation; the old handle stays
    // dead.
    let replacement = table.walker_create(|_| Visit::Keep);
    assert!(table.walker_step(replacement).is_ok());
    assert!(table.walker_step(walker).is_err());
}

#[test]
fn walker_drop_kills_in_place_without_reordering() {
    let table = ExpireTable::create_with_seed(64, 8, 55).unwrap();
    for i in 0..16u32 {
        let mut cell = table.find_or_insert(format!("k{i}").as_bytes());
        cell[0] = 1;
    }
    // Snapshot slot order, drop everything, and compare: positions and
    // data-slot ownership must be untouched, digests must be zero.
    let before: Vec<_> = (0..table.bucket_space())
        .map(|b| table.bucket_snapshot(b))
        .collect();

    let walker = table.walker_create(|_| Visit::Drop);
    for _ in 0..table.bucket_space() {
        table.walker_step(walker).unwrap();
    }

    for (b, old) in before.iter().enumerate() {
        let now = table.bucket_snapshot(b as u32);
        for pos in 0..old.len() {
            assert_eq!(now[pos].data_slot(), old[pos].data_slot());
            assert!(!now[pos].is_occupied());
        }
    }
    assert_permutation(&table);
}
