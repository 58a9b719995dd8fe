//! Slab Pools
//!
//! Bulk-preallocated, freelist-recycled storage for the small records every
//! operation needs: correlation tickets and timeout registrations.
//!
//! # Architecture
//!
//! ```text
//! SlabPool<Ticket>
//!   ├─→ Slab 0 [256 records]  carved: 256
//!   ├─→ Slab 1 [256 records]  carved: 17
//!   └─→ Freelist (LIFO): [Slot(0,3), Slot(1,2)]
//! ```
//!
//! Allocation pops the freelist, then carves from the newest slab, then
//! links a new slab. Once slabs are warm, steady-state traffic performs no
//! allocator calls at all.

pub mod allocator;
pub mod slab;
pub mod slot;

pub use allocator::{PoolStats, SlabPool};
pub use slab::Slab;
pub use slot::SlotId;

/// Records per slab
pub const SLAB_SIZE: usize = 256;
