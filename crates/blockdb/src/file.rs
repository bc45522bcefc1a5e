//! The per-world backing file.
//!
//! A backing file is a [`HEADER_SIZE`] header holding the dimensions every
//! record index was flattened under, followed by [`RECORD_SIZE`] records in
//! write order (oldest first). Locking is the caller's job; `BackingFile`
//! only knows where the file is and how to read and write it.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write},
    ops::ControlFlow,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    ChangeRecord, Dims, dims,
    error::BlockDbResult,
    record::{self, HEADER_SIZE, RECORD_SIZE},
};

/// Records read per chunk while scanning.
const SCAN_CHUNK_RECORDS: usize = 4096;

const HEADER_LEN: u64 = HEADER_SIZE as u64;
const RECORD_LEN: u64 = RECORD_SIZE as u64;

/// Offset at which the next record should be written for a file that is
/// `len` bytes long.
///
/// A trailing partial record left behind by a crash is overwritten rather
/// than preserved.
#[must_use]
pub const fn append_offset(len: u64) -> u64 {
    if len < HEADER_LEN {
        return HEADER_LEN;
    }
    HEADER_LEN + (len - HEADER_LEN) / RECORD_LEN * RECORD_LEN
}

/// Number of complete records in a file that is `len` bytes long.
const fn complete_records(len: u64) -> u64 {
    (append_offset(len) - HEADER_LEN) / RECORD_LEN
}

/// Location of one world's change log on disk.
#[derive(Debug, Clone)]
pub struct BackingFile {
    path: PathBuf,
}

impl BackingFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Open for reading, `None` if there is no file.
    fn open_read(&self) -> BlockDbResult<Option<File>> {
        match File::open(&self.path) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Dimensions from the file header.
    ///
    /// `None` if the file does not exist or is too short to hold a header.
    pub fn read_dims(&self) -> BlockDbResult<Option<Dims>> {
        let Some(file) = self.open_read()? else {
            return Ok(None);
        };
        read_header(&file)
    }

    /// Number of complete records on disk.
    pub fn record_count(&self) -> BlockDbResult<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(complete_records(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Make sure the file exists and its header covers `dims`.
    ///
    /// Creates the file if missing, replaces an unreadable header, and
    /// rewrites every record if the on-disk dimensions are smaller than
    /// `dims` on any axis. Returns the dimensions in the header afterwards,
    /// which may be larger than `dims` on some axis.
    pub fn validate_or_create(&self, dims: Dims) -> BlockDbResult<Dims> {
        let on_disk = match self.open_read()? {
            Some(file) => read_header(&file)?,
            None => {
                self.create(dims)?;
                return Ok(dims);
            }
        };

        match on_disk {
            None => {
                warn!(path = %self.path.display(), "backing file has no usable header, recreating");
                self.create(dims)?;
                Ok(dims)
            }
            Some(old) if old.smaller_than(&dims) => {
                let grown = old.max(dims);
                self.resize(old, grown)?;
                Ok(grown)
            }
            Some(old) => Ok(old),
        }
    }

    fn create(&self, dims: Dims) -> BlockDbResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        file.write_all(&record::encode_header(dims))?;
        file.sync_all()?;
        Ok(())
    }

    /// Rewrite the file under `new` dimensions, remapping every index.
    ///
    /// The new contents go to a sibling file which then replaces the
    /// original.
    fn resize(&self, old: Dims, new: Dims) -> BlockDbResult<()> {
        info!(
            path = %self.path.display(),
            ?old,
            ?new,
            "resizing backing file"
        );

        let tmp_path = self.path.with_extension("resize");
        let mut stale = 0_u64;
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            out.write_all(&record::encode_header(new))?;

            let mut result = Ok(());
            self.scan_forward(|mut rec| {
                if result.is_err() {
                    return;
                }
                match dims::remap(rec.index, old, new) {
                    Some(index) => rec.index = index,
                    None => stale += 1,
                }
                result = out.write_all(&rec.to_bytes());
            })?;
            result?;

            let file = out.into_inner().map_err(io::IntoInnerError::into_error)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        if stale > 0 {
            warn!(stale, "records with out-of-range indices copied unchanged");
        }
        Ok(())
    }

    /// Append `records` at the crash-safe offset.
    ///
    /// The file must already have a valid header.
    pub fn append(&self, records: &[ChangeRecord]) -> BlockDbResult<()> {
        let mut file = OpenOptions::new().write(true).open(&self.path)?;
        let len = file.metadata()?.len();
        let offset = append_offset(len);
        if offset < len {
            warn!(
                path = %self.path.display(),
                discarded = len - offset,
                "discarding partial trailing record"
            );
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut out = BufWriter::new(&mut file);
        for rec in records {
            out.write_all(&rec.to_bytes())?;
        }
        out.flush()?;
        drop(out);

        let end = offset + records.len() as u64 * RECORD_LEN;
        if end < len {
            file.set_len(end)?;
        }
        file.sync_data()?;
        Ok(())
    }

    /// Visit every complete record, oldest first.
    pub fn scan_forward(&self, mut f: impl FnMut(ChangeRecord)) -> BlockDbResult<()> {
        let Some(file) = self.open_read()? else {
            return Ok(());
        };
        let mut remaining = complete_records(file.metadata()?.len());

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(HEADER_LEN))?;

        let mut chunk = vec![0; SCAN_CHUNK_RECORDS * RECORD_SIZE];
        while remaining > 0 {
            let count = remaining.min(SCAN_CHUNK_RECORDS as u64) as usize;
            let bytes = &mut chunk[..count * RECORD_SIZE];
            reader.read_exact(bytes)?;
            for raw in bytes.chunks_exact(RECORD_SIZE) {
                f(ChangeRecord::from_bytes(raw)?);
            }
            remaining -= count as u64;
        }
        Ok(())
    }

    /// Visit complete records newest first until `f` breaks.
    ///
    /// Returns whether `f` broke before the oldest record was reached.
    pub fn scan_backward(
        &self,
        mut f: impl FnMut(ChangeRecord) -> ControlFlow<()>,
    ) -> BlockDbResult<bool> {
        let Some(mut file) = self.open_read()? else {
            return Ok(false);
        };
        let mut remaining = complete_records(file.metadata()?.len());

        let mut chunk = vec![0; SCAN_CHUNK_RECORDS * RECORD_SIZE];
        while remaining > 0 {
            let count = remaining.min(SCAN_CHUNK_RECORDS as u64);
            remaining -= count;

            let bytes = &mut chunk[..count as usize * RECORD_SIZE];
            file.seek(SeekFrom::Start(HEADER_LEN + remaining * RECORD_LEN))?;
            file.read_exact(bytes)?;

            for raw in bytes.chunks_exact(RECORD_SIZE).rev() {
                if f(ChangeRecord::from_bytes(raw)?).is_break() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Visit records flattened at `index`, oldest first.
    pub fn find_at(&self, index: i32, mut f: impl FnMut(&ChangeRecord)) -> BlockDbResult<()> {
        self.scan_forward(|record| {
            if record.index == index {
                f(&record);
            }
        })
    }

    /// Visit records by any of `authors` with `start <= time_delta <= end`,
    /// newest first, stopping at the first record older than `start`.
    ///
    /// Returns whether the scan stopped at `start`.
    pub fn find_by(
        &self,
        authors: &[i32],
        start: i32,
        end: i32,
        mut f: impl FnMut(&ChangeRecord),
    ) -> BlockDbResult<bool> {
        self.scan_backward(|record| {
            if record.time_delta < start {
                return ControlFlow::Break(());
            }
            if record.time_delta <= end && authors.contains(&record.author) {
                f(&record);
            }
            ControlFlow::Continue(())
        })
    }

    /// Delete the file; no-op if it does not exist.
    pub fn delete(&self) -> BlockDbResult<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Move the file to `to`; no-op if it does not exist.
    pub fn rename(&mut self, to: PathBuf) -> BlockDbResult<()> {
        if self.exists() {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&self.path, &to)?;
        }
        self.path = to;
        Ok(())
    }
}

fn read_header(mut file: &File) -> BlockDbResult<Option<Dims>> {
    let mut header = [0; HEADER_SIZE];
    match file.read_exact(&mut header) {
        Ok(()) => Ok(Some(record::decode_header(&header)?)),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}
