//! Slab pool implementation

use super::slab::Slab;
use super::slot::SlotId;
use super::SLAB_SIZE;
use crate::error::{Error, Result};
use tracing::debug;

/// Freelist-recycled record pool
///
/// Records are handed out from a LIFO freelist first, then carved from the
/// newest slab; a fresh slab is linked only when both are empty. Slabs are
/// never compacted or returned before the pool itself is dropped.
#[derive(Debug)]
pub struct SlabPool<T> {
    /// Pool name, for logs and stats
    name: &'static str,
    /// Linked slabs, oldest first
    slabs: Vec<Slab<T>>,
    /// Released records, most recently freed last
    free: Vec<SlotId>,
    /// Records currently handed out
    live: usize,
    /// Upper bound on linked slabs (None = unbounded)
    max_slabs: Option<usize>,
}

impl<T: Default> SlabPool<T> {
    /// Create an empty pool; the first slab is linked on first allocation
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slabs: Vec::new(),
            free: Vec::new(),
            live: 0,
            max_slabs: None,
        }
    }

    /// Cap the number of slabs; growth past the cap fails with `OutOfMemory`
    pub fn with_max_slabs(mut self, max_slabs: Option<usize>) -> Self {
        self.max_slabs = max_slabs;
        self
    }

    /// Create a pool with its first slab already linked
    pub fn preallocated(name: &'static str, max_slabs: Option<usize>) -> Result<Self> {
        let mut pool = Self::new(name).with_max_slabs(max_slabs);
        pool.grow()?;
        Ok(pool)
    }

    /// Allocate a record, reset to `T::default()`
    pub fn allocate(&mut self) -> Result<SlotId> {
        if let Some(id) = self.free.pop() {
            let revived = self.slabs[id.slab_index()].revive(id.offset);
            debug_assert!(revived, "freelist held a live record");
            self.live += 1;
            return Ok(id);
        }

        if let Some(id) = self.carve_newest() {
            self.live += 1;
            return Ok(id);
        }

        self.grow()?;
        let id = self
            .carve_newest()
            .ok_or_else(|| Error::OutOfMemory(format!("{} pool: fresh slab unusable", self.name)))?;
        self.live += 1;
        Ok(id)
    }

    /// Return a record to the freelist
    pub fn release(&mut self, id: SlotId) -> Result<()> {
        let slab = self.slabs.get_mut(id.slab_index()).ok_or_else(|| {
            Error::InvalidArgument(format!("{} pool: no slab for {}", self.name, id))
        })?;
        if !slab.retire(id.offset) {
            return Err(Error::InvalidArgument(format!(
                "{} pool: {} is not live",
                self.name, id
            )));
        }
        // capacity for every record was reserved when its slab was linked
        self.free.push(id);
        self.live -= 1;
        Ok(())
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slabs.get(id.slab_index())?.get(id.offset)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slabs.get_mut(id.slab_index())?.get_mut(id.offset)
    }

    pub fn live(&self) -> usize {
        self.live
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> PoolStats {
        let carved: usize = self.slabs.iter().map(|s| s.used()).sum();
        PoolStats {
            slabs: self.slabs.len(),
            capacity: self.slabs.len() * SLAB_SIZE,
            carved,
            live: self.live,
            free: self.free.len(),
        }
    }

    /// Drop every slab at once, returning how many records were still live
    pub fn clear(&mut self) -> usize {
        let reclaimed = self.live;
        self.slabs.clear();
        self.free.clear();
        self.live = 0;
        reclaimed
    }

    fn carve_newest(&mut self) -> Option<SlotId> {
        let slab_index = self.slabs.len().checked_sub(1)?;
        let offset = self.slabs[slab_index].carve()?;
        Some(SlotId::new(slab_index as u32, offset))
    }

    /// Link a new slab. Nothing is linked unless every reservation succeeds.
    fn grow(&mut self) -> Result<()> {
        if let Some(max) = self.max_slabs {
            if self.slabs.len() >= max {
                return Err(Error::OutOfMemory(format!(
                    "{} pool exhausted at {} slabs",
                    self.name, max
                )));
            }
        }

        let total = (self.slabs.len() + 1) * SLAB_SIZE;
        self.free
            .try_reserve(total.saturating_sub(self.free.len()))
            .map_err(|e| Error::OutOfMemory(format!("{} pool freelist: {}", self.name, e)))?;
        self.slabs
            .try_reserve(1)
            .map_err(|e| Error::OutOfMemory(format!("{} pool slab list: {}", self.name, e)))?;
        let slab = Slab::try_new()?;
        self.slabs.push(slab);

        debug!(pool = self.name, slabs = self.slabs.len(), "Linked new slab");
        Ok(())
    }
}

/// Statistics for a slab pool
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub slabs: usize,
    pub capacity: usize,
    /// Records ever carved from slabs
    pub carved: usize,
    pub live: usize,
    pub free: usize,
}
