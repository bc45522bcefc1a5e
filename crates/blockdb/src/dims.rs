//! World dimensions and flattened block indices.
//!
//! A position `(x, y, z)` is flattened as `x + dim_x * (z + dim_z * y)`, so
//! an index only means something together with the dimensions it was
//! computed under.

/// A block position in world coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    /// Create a new block position.
    #[must_use]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Size of the coordinate space used to flatten positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Dims {
    pub x: u16,
    pub y: u16,
    pub z: u16,
}

impl Dims {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(x: u16, y: u16, z: u16) -> Self {
        Self { x, y, z }
    }

    /// Whether `pos` lies inside these dimensions.
    #[must_use]
    pub fn contains(&self, pos: BlockPos) -> bool {
        (0..i32::from(self.x)).contains(&pos.x)
            && (0..i32::from(self.y)).contains(&pos.y)
            && (0..i32::from(self.z)).contains(&pos.z)
    }

    /// Flatten `pos` into an index.
    ///
    /// Returns `None` if the position is out of range or the index does not
    /// fit in an `i32`.
    #[must_use]
    pub fn index(&self, pos: BlockPos) -> Option<i32> {
        if !self.contains(pos) {
            return None;
        }
        let index = i64::from(pos.x)
            + i64::from(self.x) * (i64::from(pos.z) + i64::from(self.z) * i64::from(pos.y));
        i32::try_from(index).ok()
    }

    /// Recover the position an index was flattened from.
    #[must_use]
    pub fn position(&self, index: i32) -> Option<BlockPos> {
        if index < 0 || self.x == 0 || self.z == 0 {
            return None;
        }
        let (dx, dz) = (i32::from(self.x), i32::from(self.z));
        let x = index % dx;
        let rest = index / dx;
        let pos = BlockPos::new(x, rest / dz, rest % dz);
        self.contains(pos).then_some(pos)
    }

    /// Per-axis maximum of two dimensions.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        Self {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            z: self.z.max(other.z),
        }
    }

    /// Whether any axis of `self` is smaller than the same axis of `other`.
    #[must_use]
    pub const fn smaller_than(&self, other: &Self) -> bool {
        self.x < other.x || self.y < other.y || self.z < other.z
    }
}

/// Re-flatten an index written under `old` dimensions so that it refers to
/// the same block under `new` dimensions.
///
/// Returns `None` if `index` is not a valid index under `old`, or the block
/// does not fit in `new`.
#[must_use]
pub fn remap(index: i32, old: Dims, new: Dims) -> Option<i32> {
    old.position(index).and_then(|pos| new.index(pos))
}
