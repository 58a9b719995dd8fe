//! Slot addressing for slab pools

use std::fmt;

/// Address of a record inside a [`super::SlabPool`]
///
/// Stable for the lifetime of the allocation; reused after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId {
    /// Slab index (0 = first slab carved)
    pub slab: u32,
    /// Record offset within the slab
    pub offset: u32,
}

impl SlotId {
    pub fn new(slab: u32, offset: u32) -> Self {
        Self { slab, offset }
    }

    /// Pack into a single integer, suitable as an opaque correlation token
    pub fn to_raw(self) -> u64 {
        (u64::from(self.slab) << 32) | u64::from(self.offset)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self {
            slab: (raw >> 32) as u32,
            offset: raw as u32,
        }
    }

    pub fn slab_index(&self) -> usize {
        self.slab as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(slab={}, offset={})", self.slab, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_id_raw_packing() {
        let id = SlotId::new(5, 255);
        assert_eq!(SlotId::from_raw(id.to_raw()), id);
        assert_eq!(id.slab_index(), 5);
        assert_eq!(id.to_string(), "Slot(slab=5, offset=255)");
    }
}
