//! The BlockDB engine.
//!
//! # Locking
//!
//! ```text
//! file lock (RwLock)  ──▶  dims lock (RwLock)  ──▶  buffer lock (Mutex)
//! ```
//!
//! Locks are always taken in this order and the buffer lock is never held
//! across file I/O.
//!
//! - `add` takes the dims lock (shared) and the buffer lock only.
//! - Queries take the file lock shared, so any number run together.
//! - `flush`, `grow_dims`, `delete_backing_file` and `rename_backing_file`
//!   take the file lock exclusively. A query therefore sees either none or
//!   all of a flushed batch on disk, and the batch is in the buffer exactly
//!   when it is not on disk.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    BlockDbConfig, BlockId, BlockPos, ChangeBuffer, ChangeFlags, ChangeRecord, Dims,
    error::BlockDbResult, file::BackingFile, time,
};

struct WorldFile {
    name: String,
    file: BackingFile,
}

/// Change log for one world.
pub struct BlockDb {
    config: BlockDbConfig,
    file: RwLock<WorldFile>,
    dims: RwLock<Dims>,
    buffer: ChangeBuffer,
    enabled: AtomicBool,
}

impl std::fmt::Debug for BlockDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockDb")
            .field("world", &self.file.read().name)
            .field("dims", &*self.dims.read())
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

impl BlockDb {
    /// Open the change log for `world`.
    ///
    /// Dimensions start as the per-axis max of the backing file header (if
    /// there is a readable one) and `world_dims`. Nothing is written until
    /// the first flush.
    pub fn open(config: &BlockDbConfig, world: &str, world_dims: Dims) -> BlockDbResult<Self> {
        let file = BackingFile::new(config.path_for(world)?);
        let dims = file
            .read_dims()?
            .map_or(world_dims, |on_disk| on_disk.max(world_dims));

        Ok(Self {
            config: config.clone(),
            file: RwLock::new(WorldFile {
                name: world.to_owned(),
                file,
            }),
            dims: RwLock::new(dims),
            buffer: ChangeBuffer::new(),
            enabled: AtomicBool::new(config.enabled),
        })
    }

    #[must_use]
    pub fn world_name(&self) -> String {
        self.file.read().name.clone()
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.file.read().file.path().to_path_buf()
    }

    /// Dimensions new records are flattened under.
    #[must_use]
    pub fn dims(&self) -> Dims {
        *self.dims.read()
    }

    /// Whether `add` records anything.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Records not flushed yet, oldest first.
    #[must_use]
    pub fn buffered(&self) -> Vec<ChangeRecord> {
        self.buffer.snapshot()
    }

    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of complete records in the backing file.
    pub fn disk_record_count(&self) -> BlockDbResult<u64> {
        self.file.read().file.record_count()
    }

    // ==================== Writes ====================

    /// Record a block change made now.
    ///
    /// Does nothing when disabled. Never touches the backing file.
    pub fn add(&self, author: i32, pos: BlockPos, flags: ChangeFlags, old: BlockId, new: BlockId) {
        if !self.is_enabled() {
            return;
        }

        let dims = self.dims.read();
        let Some(index) = dims.index(pos) else {
            warn!(?pos, dims = ?*dims, "dropping change outside world dimensions");
            return;
        };
        let record = ChangeRecord::new(author, time::now_delta(), index, flags, old, new);
        self.buffer.push(record);
    }

    /// Record a pre-built change; its index must be flattened under
    /// [`Self::dims`].
    ///
    /// Does nothing when disabled.
    pub fn add_record(&self, record: ChangeRecord) {
        if !self.is_enabled() {
            return;
        }
        // Held so grow_dims cannot remap the buffer between the caller
        // flattening the index and this push.
        let _dims = self.dims.read();
        self.buffer.push(record);
    }

    /// Write every buffered record to the backing file.
    ///
    /// Returns the number of records written. If writing fails, the records
    /// go back into the buffer ahead of anything added meanwhile.
    pub fn flush(&self) -> BlockDbResult<usize> {
        let world = self.file.write();
        let dims = *self.dims.read();

        let mut records = self.buffer.take();
        if records.is_empty() {
            return Ok(0);
        }

        let written = world.file.validate_or_create(dims).and_then(|on_disk| {
            if on_disk != dims {
                self.adopt_dims(dims, on_disk, &mut records);
            }
            world.file.append(&records)
        });
        if let Err(err) = written {
            self.buffer.restore(records);
            return Err(err);
        }

        debug!(
            world = %world.name,
            count = records.len(),
            "flushed block changes"
        );
        Ok(records.len())
    }

    /// Switch to the larger dimensions of an existing backing file,
    /// remapping `records` and whatever was buffered since they were taken.
    ///
    /// The caller holds the file lock exclusively.
    fn adopt_dims(&self, old: Dims, new: Dims, records: &mut [ChangeRecord]) {
        let mut dims = self.dims.write();

        let mut stale = self.buffer.remap(old, new);
        for record in records.iter_mut() {
            match crate::remap(record.index, old, new) {
                Some(index) => record.index = index,
                None => stale += 1,
            }
        }
        if stale > 0 {
            warn!(stale, "records with out-of-range indices left unchanged");
        }
        debug!(?old, ?new, "adopted backing file dimensions");
        *dims = new;
    }

    /// Grow the dimensions to cover `world_dims`. Never shrinks.
    ///
    /// Buffered records are remapped right away; the backing file is
    /// rewritten on the next flush.
    pub fn grow_dims(&self, world_dims: Dims) {
        let _world = self.file.write();
        let mut dims = self.dims.write();

        let grown = dims.max(world_dims);
        if grown == *dims {
            return;
        }

        let stale = self.buffer.remap(*dims, grown);
        if stale > 0 {
            warn!(stale, "buffered records with out-of-range indices left unchanged");
        }
        debug!(old = ?*dims, new = ?grown, "grew block log dimensions");
        *dims = grown;
    }

    /// Delete the backing file. Buffered records are kept.
    pub fn delete_backing_file(&self) -> BlockDbResult<()> {
        self.file.write().file.delete()
    }

    /// Move the backing file to follow a world rename.
    pub fn rename_backing_file(&self, new_name: &str) -> BlockDbResult<()> {
        let to = self.config.path_for(new_name)?;
        let mut world = self.file.write();
        world.file.rename(to)?;
        world.name = new_name.to_owned();
        Ok(())
    }

    // ==================== Queries ====================

    /// Visit every change made at `pos`: on-disk records oldest first, then
    /// buffered records oldest first.
    pub fn find_changes_at(
        &self,
        pos: BlockPos,
        mut f: impl FnMut(&ChangeRecord),
    ) -> BlockDbResult<()> {
        let world = self.file.read();

        if let Some(index) = world.file.read_dims()?.and_then(|disk| disk.index(pos)) {
            world.file.find_at(index, &mut f)?;
        }

        let Some(index) = self.dims.read().index(pos) else {
            return Ok(());
        };
        for record in self.buffer.matching(|record| record.index == index) {
            f(&record);
        }
        Ok(())
    }

    /// Collecting form of [`Self::find_changes_at`].
    pub fn changes_at(&self, pos: BlockPos) -> BlockDbResult<Vec<ChangeRecord>> {
        let mut out = Vec::new();
        self.find_changes_at(pos, |record| out.push(*record))?;
        Ok(out)
    }

    /// Visit changes by any of `authors` with `start <= time_delta <= end`,
    /// newest first.
    ///
    /// Scanning stops at the first record older than `start`. Returns
    /// whether that happened; `false` means the whole log was scanned
    /// without reaching `start`.
    pub fn find_changes_by(
        &self,
        authors: &[i32],
        start: i32,
        end: i32,
        mut f: impl FnMut(&ChangeRecord),
    ) -> BlockDbResult<bool> {
        let world = self.file.read();

        let (recent, reached_start) = self
            .buffer
            .newest_in_window(start, end, |record| authors.contains(&record.author));
        for record in &recent {
            f(record);
        }
        // Everything on disk is older than everything buffered.
        if reached_start {
            return Ok(true);
        }

        world.file.find_by(authors, start, end, f)
    }

    /// Collecting form of [`Self::find_changes_by`].
    pub fn changes_by(
        &self,
        authors: &[i32],
        start: i32,
        end: i32,
    ) -> BlockDbResult<(Vec<ChangeRecord>, bool)> {
        let mut out = Vec::new();
        let reached_start = self.find_changes_by(authors, start, end, |record| out.push(*record))?;
        Ok((out, reached_start))
    }
}
