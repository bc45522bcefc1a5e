//! Integration tests for blockdb

use std::{
    fs::{self, OpenOptions},
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use blockdb::{
    BlockDb, BlockDbConfig, BlockId, BlockPos, ChangeFlags, ChangeRecord, Dims, HEADER_SIZE,
    RECORD_SIZE,
};

// ============================================================================
// Helpers
// ============================================================================

fn open(dir: &tempfile::TempDir, dims: Dims) -> BlockDb {
    BlockDb::open(&BlockDbConfig::with_root(dir.path()), "world", dims).unwrap()
}

fn change(author: i32, time_delta: i32, index: i32) -> ChangeRecord {
    ChangeRecord::new(
        author,
        time_delta,
        index,
        ChangeFlags::empty(),
        BlockId::new(1),
        BlockId::new(4),
    )
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn test_point_and_author_queries_after_flush() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(64, 64, 64));
    let pos = db.dims().position(42).unwrap();

    db.add_record(change(1, 100, 42));
    db.add_record(change(2, 150, 42));
    db.add_record(change(1, 200, 42));
    db.flush().unwrap();

    let at: Vec<_> = db
        .changes_at(pos)
        .unwrap()
        .iter()
        .map(|c| (c.author, c.time_delta))
        .collect();
    assert_eq!(at, vec![(1, 100), (2, 150), (1, 200)]);

    let (by, reached_start) = db.changes_by(&[1], 120, 500).unwrap();
    assert_eq!(by.len(), 1);
    assert_eq!(by[0].time_delta, 200);
    assert!(reached_start);
}

#[test]
fn test_distinct_positions_roundtrip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(32, 32, 32));

    let positions: Vec<_> = (0..20).map(|i| BlockPos::new(i, i % 7, 31 - i)).collect();
    for (author, &pos) in positions.iter().enumerate() {
        db.add(
            author as i32,
            pos,
            ChangeFlags::empty(),
            BlockId::new(0),
            BlockId::custom(author as u8),
        );
    }
    db.flush().unwrap();
    assert_eq!(db.buffered_len(), 0);

    for (author, &pos) in positions.iter().enumerate() {
        let changes = db.changes_at(pos).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].author, author as i32);
        assert_eq!(changes[0].new_block(), BlockId::custom(author as u8));
        assert_eq!(changes[0].old_block(), BlockId::new(0));
    }
}

#[test]
fn test_unflushed_changes_are_visible() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    let pos = BlockPos::new(1, 1, 1);

    db.add(5, pos, ChangeFlags::empty(), BlockId::new(0), BlockId::new(1));

    assert!(!db.path().exists());
    assert_eq!(db.changes_at(pos).unwrap().len(), 1);
    let (by, reached_start) = db.changes_by(&[5], 0, i32::MAX).unwrap();
    assert_eq!(by.len(), 1);
    assert!(!reached_start);
}

#[test]
fn test_memory_scan_stops_at_start() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    for t in [10, 20, 30, 40, 50] {
        db.add_record(change(1, t, 0));
    }

    let mut visited = Vec::new();
    let reached_start = db
        .find_changes_by(&[1], 25, 45, |c| visited.push(c.time_delta))
        .unwrap();
    assert!(reached_start);
    assert_eq!(visited, vec![40, 30]);

    let (all, reached_start) = db.changes_by(&[1], 10, 50).unwrap();
    assert_eq!(all.len(), 5);
    assert!(!reached_start);
}

#[test]
fn test_disk_scan_is_newest_first_and_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    for t in 1..=100 {
        db.add_record(change(t % 3, t, 0));
    }
    db.flush().unwrap();

    let mut visited = Vec::new();
    let reached_start = db
        .find_changes_by(&[0], 50, 80, |c| visited.push(c.time_delta))
        .unwrap();

    assert!(reached_start);
    let expected: Vec<_> = (50..=80).rev().filter(|t| t % 3 == 0).collect();
    assert_eq!(visited, expected);
}

#[test]
fn test_author_set_filter() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    for (author, t) in [(1, 10), (2, 20), (3, 30), (2, 40)] {
        db.add_record(change(author, t, 0));
    }
    db.flush().unwrap();

    let (found, _) = db.changes_by(&[2, 3], 0, 100).unwrap();
    let authors: Vec<_> = found.iter().map(|c| c.author).collect();
    assert_eq!(authors, vec![2, 3, 2]);

    let (none, reached_start) = db.changes_by(&[], 0, 100).unwrap();
    assert!(none.is_empty());
    assert!(!reached_start);
}

// ============================================================================
// File Format and Recovery Tests
// ============================================================================

#[test]
fn test_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(64, 32, 16));
    db.add_record(change(9, 1000, 77));
    db.flush().unwrap();

    let bytes = fs::read(db.path()).unwrap();
    assert_eq!(bytes.len(), HEADER_SIZE + RECORD_SIZE);
    assert_eq!(&bytes[..6], &[64, 0, 32, 0, 16, 0]);
    assert_eq!(
        ChangeRecord::from_bytes(&bytes[HEADER_SIZE..]).unwrap(),
        change(9, 1000, 77)
    );
}

#[test]
fn test_flush_discards_torn_trailing_record() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    for t in 0..3 {
        db.add_record(change(1, t, 0));
    }
    db.flush().unwrap();

    let mut raw = OpenOptions::new().append(true).open(db.path()).unwrap();
    raw.write_all(&[0xAB; 11]).unwrap();
    drop(raw);

    db.add_record(change(2, 10, 0));
    db.flush().unwrap();

    let len = fs::metadata(db.path()).unwrap().len() as usize;
    assert_eq!(len, HEADER_SIZE + 4 * RECORD_SIZE);

    let authors: Vec<_> = db
        .changes_at(BlockPos::new(0, 0, 0))
        .unwrap()
        .iter()
        .map(|c| c.author)
        .collect();
    assert_eq!(authors, vec![1, 1, 1, 2]);
}

#[test]
fn test_growth_keeps_old_records_queryable() {
    let dir = tempfile::tempdir().unwrap();
    let small = Dims::new(16, 16, 16);
    let positions = [
        BlockPos::new(0, 0, 0),
        BlockPos::new(15, 0, 0),
        BlockPos::new(0, 15, 0),
        BlockPos::new(0, 0, 15),
        BlockPos::new(7, 9, 13),
    ];

    {
        let db = open(&dir, small);
        for (author, &pos) in positions.iter().enumerate() {
            db.add(
                author as i32,
                pos,
                ChangeFlags::empty(),
                BlockId::new(1),
                BlockId::new(0),
            );
        }
        db.flush().unwrap();
    }

    // The world grew while unloaded.
    let db = open(&dir, Dims::new(48, 32, 40));
    let pending = BlockPos::new(40, 20, 30);
    db.add(99, pending, ChangeFlags::empty(), BlockId::new(0), BlockId::new(3));
    db.flush().unwrap();

    for (author, &pos) in positions.iter().enumerate() {
        let changes = db.changes_at(pos).unwrap();
        assert_eq!(changes.len(), 1, "lost change at {pos:?}");
        assert_eq!(changes[0].author, author as i32);
    }
    assert_eq!(db.changes_at(pending).unwrap()[0].author, 99);
}

#[test]
fn test_grow_while_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(8, 8, 8));
    let flushed = BlockPos::new(7, 7, 7);
    let buffered = BlockPos::new(1, 2, 3);

    db.add(1, flushed, ChangeFlags::empty(), BlockId::new(1), BlockId::new(0));
    db.flush().unwrap();
    db.add(2, buffered, ChangeFlags::empty(), BlockId::new(1), BlockId::new(0));

    db.grow_dims(Dims::new(24, 24, 24));
    let grown = BlockPos::new(20, 20, 20);
    db.add(3, grown, ChangeFlags::empty(), BlockId::new(1), BlockId::new(0));

    // Before the flush, the file still has the old header.
    assert_eq!(db.changes_at(flushed).unwrap()[0].author, 1);
    assert_eq!(db.changes_at(buffered).unwrap()[0].author, 2);
    assert_eq!(db.changes_at(grown).unwrap()[0].author, 3);

    db.flush().unwrap();
    assert_eq!(db.changes_at(flushed).unwrap()[0].author, 1);
    assert_eq!(db.changes_at(buffered).unwrap()[0].author, 2);
    assert_eq!(db.changes_at(grown).unwrap()[0].author, 3);
}

#[test]
fn test_disabled_engine_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir, Dims::new(16, 16, 16));
    db.add_record(change(1, 1, 0));
    db.flush().unwrap();
    let before = fs::read(db.path()).unwrap();

    db.set_enabled(false);
    for i in 0..50 {
        db.add(
            1,
            BlockPos::new(i % 16, 0, 0),
            ChangeFlags::empty(),
            BlockId::new(0),
            BlockId::new(1),
        );
    }
    assert_eq!(db.buffered_len(), 0);
    db.flush().unwrap();

    assert_eq!(fs::read(db.path()).unwrap(), before);
}

// ============================================================================
// Concurrency Tests
// ============================================================================

#[test]
fn test_concurrent_add_flush_and_query() {
    const WRITERS: i32 = 4;
    const PER_WRITER: i32 = 2_000;

    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open(&dir, Dims::new(64, 64, 64)));
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..WRITERS)
        .map(|author| {
            let db = Arc::clone(&db);
            std::thread::spawn(move || {
                for i in 0..PER_WRITER {
                    db.add(
                        author,
                        BlockPos::new(i % 64, author, 0),
                        ChangeFlags::empty(),
                        BlockId::new(0),
                        BlockId::new(1),
                    );
                }
            })
        })
        .collect();

    let flusher = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                db.flush().unwrap();
            }
        })
    };

    let reader = {
        let db = Arc::clone(&db);
        let done = Arc::clone(&done);
        std::thread::spawn(move || {
            let mut last = 0;
            while !done.load(Ordering::Acquire) {
                let (found, _) = db.changes_by(&[0], 0, i32::MAX).unwrap();
                // Changes are never lost or duplicated mid-flush.
                assert!(found.len() >= last);
                assert!(found.len() <= PER_WRITER as usize);
                last = found.len();
            }
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    flusher.join().unwrap();
    reader.join().unwrap();

    db.flush().unwrap();
    assert_eq!(db.buffered_len(), 0);
    assert_eq!(db.disk_record_count().unwrap(), (WRITERS * PER_WRITER) as u64);
    for author in 0..WRITERS {
        let (found, _) = db.changes_by(&[author], 0, i32::MAX).unwrap();
        assert_eq!(found.len(), PER_WRITER as usize);
    }
}
