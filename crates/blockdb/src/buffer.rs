//! In-memory buffer of records that have not been flushed yet.
//!
//! The buffer has its own short-held lock, separate from the backing file
//! lock, so that writers never wait on file I/O. Records are kept in
//! insertion order, which is also ascending time order.

use parking_lot::Mutex;

use crate::{ChangeRecord, Dims, dims};

/// Append-only buffer of pending change records.
#[derive(Debug, Default)]
pub struct ChangeBuffer {
    records: Mutex<Vec<ChangeRecord>>,
}

impl ChangeBuffer {
    /// Create a new empty buffer.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    #[inline]
    pub fn push(&self, record: ChangeRecord) {
        self.records.lock().push(record);
    }

    /// Number of pending records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Swap the buffer for an empty one, returning everything it held.
    pub fn take(&self) -> Vec<ChangeRecord> {
        std::mem::take(&mut *self.records.lock())
    }

    /// Put records back in front of anything pushed since they were taken.
    pub fn restore(&self, mut records: Vec<ChangeRecord>) {
        let mut current = self.records.lock();
        records.append(&mut current);
        *current = records;
    }

    /// Copy of the pending records, oldest first.
    pub fn snapshot(&self) -> Vec<ChangeRecord> {
        self.records.lock().clone()
    }

    /// Matching records, oldest first.
    pub fn matching(&self, mut pred: impl FnMut(&ChangeRecord) -> bool) -> Vec<ChangeRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| pred(*record))
            .copied()
            .collect()
    }

    /// Walk records newest-first and collect those in `[start, end]`
    /// accepted by `pred`.
    ///
    /// Stops at the first record older than `start`; the returned flag says
    /// whether that happened.
    pub fn newest_in_window(
        &self,
        start: i32,
        end: i32,
        mut pred: impl FnMut(&ChangeRecord) -> bool,
    ) -> (Vec<ChangeRecord>, bool) {
        let records = self.records.lock();
        let mut found = Vec::new();

        for record in records.iter().rev() {
            if record.time_delta < start {
                return (found, true);
            }
            if record.time_delta > end {
                continue;
            }
            if pred(record) {
                found.push(*record);
            }
        }
        (found, false)
    }

    /// Re-flatten every pending index from `old` to `new` dimensions.
    ///
    /// Returns the number of records whose index could not be remapped;
    /// those are left untouched.
    pub fn remap(&self, old: Dims, new: Dims) -> usize {
        let mut stale = 0;
        for record in self.records.lock().iter_mut() {
            match dims::remap(record.index, old, new) {
                Some(index) => record.index = index,
                None => stale += 1,
            }
        }
        stale
    }
}
