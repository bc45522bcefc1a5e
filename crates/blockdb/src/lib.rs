//! Per-world block change log.
//!
//! Every block change in a world is appended to an in-memory buffer and,
//! on flush, to a fixed-record backing file. The log answers two questions:
//! who changed this block, and what did these actors change in a time
//! window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  BlockDb                                                            │
//! │    - add: flatten position, push to buffer (no file I/O)            │
//! │    - flush: validate/resize file, append buffer, clear buffer       │
//! │    - find_changes_at / find_changes_by: disk + buffer merged        │
//! └─────────────────────────────────────────────────────────────────────┘
//!           │                                        │
//!           ▼                                        ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//! │  ChangeBuffer                │   │  BackingFile                     │
//! │    - Mutex<Vec<ChangeRecord>>│   │    - 16-byte header (dims)       │
//! │    - insertion = time order  │   │    - 16-byte records, oldest     │
//! │                              │   │      first                       │
//! └──────────────────────────────┘   └──────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use blockdb::{BlockDb, BlockDbConfig, BlockId, BlockPos, ChangeFlags, Dims};
//!
//! # fn main() -> blockdb::BlockDbResult<()> {
//! let config = BlockDbConfig::with_root("blockdb");
//! let db = BlockDb::open(&config, "main", Dims::new(256, 128, 256))?;
//!
//! // Buffered in memory.
//! db.add(7, BlockPos::new(10, 64, 10), ChangeFlags::empty(), BlockId::new(1), BlockId::new(0));
//!
//! // Written to disk.
//! db.flush()?;
//!
//! // Who touched this block?
//! db.find_changes_at(BlockPos::new(10, 64, 10), |change| {
//!     let _ = (change.author, change.time());
//! })?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod db;
mod dims;
mod error;
pub mod file;
mod record;
pub mod time;

pub use buffer::ChangeBuffer;
pub use config::BlockDbConfig;
pub use db::BlockDb;
pub use dims::{BlockPos, Dims, remap};
pub use error::{BlockDbError, BlockDbResult};
pub use record::{
    BlockId, CUSTOM_BLOCK, ChangeFlags, ChangeRecord, HEADER_SIZE, RECORD_SIZE, SYSTEM_AUTHOR,
    decode_header, encode_header,
};
