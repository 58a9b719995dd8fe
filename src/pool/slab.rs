//! A single fixed-size slab of records

use super::SLAB_SIZE;
use crate::error::{Error, Result};

#[derive(Debug)]
struct Record<T> {
    value: T,
    live: bool,
}

/// One chunk of `SLAB_SIZE` records
///
/// Storage is reserved up front, so carving a record never touches the
/// allocator. Records are bump-allocated until the slab is exhausted;
/// reuse of released records is the owning pool's job.
#[derive(Debug)]
pub struct Slab<T> {
    records: Vec<Record<T>>,
}

impl<T: Default> Slab<T> {
    /// Reserve a new slab, failing instead of aborting when memory is short
    pub fn try_new() -> Result<Self> {
        let mut records = Vec::new();
        records
            .try_reserve_exact(SLAB_SIZE)
            .map_err(|e| Error::OutOfMemory(format!("failed to reserve slab: {}", e)))?;
        Ok(Self { records })
    }

    /// Carve the next unused record, returning its offset
    pub fn carve(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }
        let offset = self.records.len() as u32;
        self.records.push(Record {
            value: T::default(),
            live: true,
        });
        Some(offset)
    }

    /// Bring a released record back into use, resetting its contents
    pub fn revive(&mut self, offset: u32) -> bool {
        match self.records.get_mut(offset as usize) {
            Some(r) if !r.live => {
                r.value = T::default();
                r.live = true;
                true
            }
            _ => false,
        }
    }

    /// Mark a live record free. Returns false on a double release.
    pub fn retire(&mut self, offset: u32) -> bool {
        match self.records.get_mut(offset as usize) {
            Some(r) if r.live => {
                r.live = false;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, offset: u32) -> Option<&T> {
        self.records
            .get(offset as usize)
            .filter(|r| r.live)
            .map(|r| &r.value)
    }

    pub fn get_mut(&mut self, offset: u32) -> Option<&mut T> {
        self.records
            .get_mut(offset as usize)
            .filter(|r| r.live)
            .map(|r| &mut r.value)
    }

    pub fn is_exhausted(&self) -> bool {
        self.records.len() == SLAB_SIZE
    }

    /// Records carved so far (live or released)
    pub fn used(&self) -> usize {
        self.records.len()
    }

    pub fn live_count(&self) -> usize {
        self.records.iter().filter(|r| r.live).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slab_carving() -> Result<()> {
        let mut slab: Slab<u64> = Slab::try_new()?;

        assert_eq!(slab.carve(), Some(0));
        assert_eq!(slab.carve(), Some(1));
        assert_eq!(slab.carve(), Some(2));

        assert_eq!(slab.used(), 3);
        assert_eq!(slab.live_count(), 3);
        Ok(())
    }

    #[test]
    fn test_slab_exhaustion() -> Result<()> {
        let mut slab: Slab<u8> = Slab::try_new()?;
        for _ in 0..SLAB_SIZE {
            assert!(slab.carve().is_some());
        }
        assert!(slab.is_exhausted());
        assert_eq!(slab.carve(), None);
        Ok(())
    }

    #[test]
    fn test_retire_and_revive() -> Result<()> {
        let mut slab: Slab<u32> = Slab::try_new()?;
        let offset = slab.carve().unwrap();
        *slab.get_mut(offset).unwrap() = 42;

        assert!(slab.retire(offset));
        assert!(!slab.retire(offset), "double release must be rejected");
        assert!(slab.get(offset).is_none());

        assert!(slab.revive(offset));
        assert_eq!(slab.get(offset), Some(&0), "revived record is reset");
        assert!(!slab.revive(offset));
        Ok(())
    }
}
