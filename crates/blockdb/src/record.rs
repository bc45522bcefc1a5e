//! Change records and the on-disk codec.
//!
//! # Record Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  ChangeRecord (16 bytes, little-endian)                    │
//! ├────────────────────────────────────────────────────────────┤
//! │  author: i32      (4 bytes) - Actor responsible            │
//! │  time_delta: i32  (4 bytes) - Seconds since 2010-01-01     │
//! │  index: i32       (4 bytes) - Flattened block position     │
//! │  old_raw: u8      (1 byte)  - Previous block               │
//! │  new_raw: u8      (1 byte)  - New block                    │
//! │  flags: u16       (2 bytes) - ChangeFlags                  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Header Format
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  Header (16 bytes, little-endian)                          │
//! ├────────────────────────────────────────────────────────────┤
//! │  dim_x: u16, dim_y: u16, dim_z: u16  (6 bytes)             │
//! │  reserved                            (10 zero bytes)       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header is padded to one record so that the record region stays
//! aligned: record `i` lives at `HEADER_SIZE + i * RECORD_SIZE`.

use std::time::SystemTime;

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::{
    Dims,
    error::{BlockDbError, BlockDbResult},
};

/// Size of one encoded record in bytes.
pub const RECORD_SIZE: usize = 16;

/// Size of the encoded file header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Primary block id meaning "the real id is in the extension byte".
pub const CUSTOM_BLOCK: u8 = 163;

/// Author id used for changes not made by any actor.
pub const SYSTEM_AUTHOR: i32 = -1;

bitflags! {
    /// Per-record flag bits.
    ///
    /// The low two bits are owned by the engine; the rest are passed through
    /// from whoever reported the change.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ChangeFlags: u16 {
        /// `new_raw` holds an extended block id.
        const NEW_EXTENDED = 1 << 0;
        /// `old_raw` holds an extended block id.
        const OLD_EXTENDED = 1 << 1;

        const _ = !0;
    }
}

impl ChangeFlags {
    /// Bits reserved for the engine.
    pub const ENGINE_BITS: Self = Self::NEW_EXTENDED.union(Self::OLD_EXTENDED);
}

/// A block id as reported by the world: a primary byte plus an extension
/// byte that is only meaningful when the primary is [`CUSTOM_BLOCK`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub block: u8,
    pub ext: u8,
}

impl BlockId {
    /// A plain block id.
    #[must_use]
    pub const fn new(block: u8) -> Self {
        Self { block, ext: 0 }
    }

    /// An extended block id.
    #[must_use]
    pub const fn custom(ext: u8) -> Self {
        Self {
            block: CUSTOM_BLOCK,
            ext,
        }
    }

    #[must_use]
    pub const fn is_custom(&self) -> bool {
        self.block == CUSTOM_BLOCK
    }

    /// The byte stored in a record and whether it is an extended id.
    const fn to_raw(self) -> (u8, bool) {
        if self.is_custom() {
            (self.ext, true)
        } else {
            (self.block, false)
        }
    }

    const fn from_raw(raw: u8, extended: bool) -> Self {
        if extended { Self::custom(raw) } else { Self::new(raw) }
    }
}

/// One block modification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChangeRecord {
    /// Actor responsible for the change.
    pub author: i32,
    /// Seconds since the record epoch.
    pub time_delta: i32,
    /// Flattened block position.
    pub index: i32,
    pub old_raw: u8,
    pub new_raw: u8,
    pub flags: ChangeFlags,
}

impl ChangeRecord {
    /// Build a record, folding extended block ids into the raw bytes and
    /// setting the matching flag bits.
    #[must_use]
    pub fn new(
        author: i32,
        time_delta: i32,
        index: i32,
        flags: ChangeFlags,
        old: BlockId,
        new: BlockId,
    ) -> Self {
        let (old_raw, old_ext) = old.to_raw();
        let (new_raw, new_ext) = new.to_raw();

        let mut flags = flags.difference(ChangeFlags::ENGINE_BITS);
        flags.set(ChangeFlags::OLD_EXTENDED, old_ext);
        flags.set(ChangeFlags::NEW_EXTENDED, new_ext);

        Self {
            author,
            time_delta,
            index,
            old_raw,
            new_raw,
            flags,
        }
    }

    /// The block before the change.
    #[must_use]
    pub const fn old_block(&self) -> BlockId {
        BlockId::from_raw(self.old_raw, self.flags.contains(ChangeFlags::OLD_EXTENDED))
    }

    /// The block after the change.
    #[must_use]
    pub const fn new_block(&self) -> BlockId {
        BlockId::from_raw(self.new_raw, self.flags.contains(ChangeFlags::NEW_EXTENDED))
    }

    /// When the change happened.
    #[must_use]
    pub fn time(&self) -> SystemTime {
        crate::time::to_system_time(self.time_delta)
    }

    /// Encode into the fixed 16-byte layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0; RECORD_SIZE];
        LittleEndian::write_i32(&mut buf[0..4], self.author);
        LittleEndian::write_i32(&mut buf[4..8], self.time_delta);
        LittleEndian::write_i32(&mut buf[8..12], self.index);
        buf[12] = self.old_raw;
        buf[13] = self.new_raw;
        LittleEndian::write_u16(&mut buf[14..16], self.flags.bits());
        buf
    }

    /// Decode from the first [`RECORD_SIZE`] bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> BlockDbResult<Self> {
        check_len(bytes, RECORD_SIZE)?;
        Ok(Self {
            author: LittleEndian::read_i32(&bytes[0..4]),
            time_delta: LittleEndian::read_i32(&bytes[4..8]),
            index: LittleEndian::read_i32(&bytes[8..12]),
            old_raw: bytes[12],
            new_raw: bytes[13],
            flags: ChangeFlags::from_bits_retain(LittleEndian::read_u16(&bytes[14..16])),
        })
    }
}

/// Encode the file header for `dims`.
#[must_use]
pub fn encode_header(dims: Dims) -> [u8; HEADER_SIZE] {
    let mut buf = [0; HEADER_SIZE];
    LittleEndian::write_u16(&mut buf[0..2], dims.x);
    LittleEndian::write_u16(&mut buf[2..4], dims.y);
    LittleEndian::write_u16(&mut buf[4..6], dims.z);
    buf
}

/// Decode the dimensions stored in a file header.
pub fn decode_header(bytes: &[u8]) -> BlockDbResult<Dims> {
    check_len(bytes, HEADER_SIZE)?;
    Ok(Dims::new(
        LittleEndian::read_u16(&bytes[0..2]),
        LittleEndian::read_u16(&bytes[2..4]),
        LittleEndian::read_u16(&bytes[4..6]),
    ))
}

fn check_len(bytes: &[u8], needed: usize) -> BlockDbResult<()> {
    if bytes.len() < needed {
        return Err(BlockDbError::ShortBuffer {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}
