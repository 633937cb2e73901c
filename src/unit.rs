use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UnitFlags(u8);

impl UnitFlags {
    pub const NONE: Self = Self(0);
    pub const FRAME_START: Self = Self(1 << 0);
    pub const FRAME_END: Self = Self(1 << 1);
    pub const SLICE: Self = Self(1 << 2);
    pub const SKIP: Self = Self(1 << 3);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for UnitFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for UnitFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// A parsed segment of the elementary stream.
///
/// `offset` is the position inside the owning frame's payload and is only
/// meaningful once the unit has been appended to a frame assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodedUnit {
    size: usize,
    offset: usize,
    flags: UnitFlags,
}

impl CodedUnit {
    #[must_use]
    pub fn new(size: usize, flags: UnitFlags) -> Self {
        Self {
            size,
            offset: 0,
            flags,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn flags(&self) -> UnitFlags {
        self.flags
    }

    pub fn is_frame_start(&self) -> bool {
        self.flags.contains(UnitFlags::FRAME_START)
    }

    pub fn is_frame_end(&self) -> bool {
        self.flags.contains(UnitFlags::FRAME_END)
    }

    pub fn is_slice(&self) -> bool {
        self.flags.contains(UnitFlags::SLICE)
    }

    pub fn is_skipped(&self) -> bool {
        self.flags.contains(UnitFlags::SKIP)
    }

    pub(crate) fn set_offset(&mut self, offset: usize) {
        self.offset = offset;
    }
}
