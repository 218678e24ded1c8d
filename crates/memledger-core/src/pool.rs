//! Fixed-object-size pool allocator.
//!
//! A pool carves one eagerly allocated block into equal slots and hands them
//! out from a LIFO free list. It never grows: once every slot is out,
//! `allocate` returns `None` until an object is given back. Pools are
//! independent of any [`Tracker`](crate::Tracker) ledger; each has its own lock.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::PoolError;

/// Alignment of every pool object.
pub const POOL_ALIGN: usize = 16;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    /// Requested object size.
    pub object_size: usize,
    /// Distance between consecutive slots (object size rounded up to [`POOL_ALIGN`]).
    pub slot_size: usize,
    pub total: usize,
    pub free: usize,
    pub allocated: usize,
    /// Most objects ever out at once.
    pub high_water: usize,
}

#[derive(Debug)]
struct PoolState {
    /// Free slot indices; the next slot handed out is at the end.
    free_list: Vec<usize>,
    live: Vec<bool>,
    allocated: usize,
    high_water: usize,
}

/// Fixed-size object allocator over one contiguous block.
#[derive(Debug)]
pub struct MemoryPool {
    name: String,
    base: NonNull<u8>,
    layout: Layout,
    object_size: usize,
    slot_size: usize,
    count: usize,
    state: Mutex<PoolState>,
}

// SAFETY: the block is owned exclusively by the pool, and all free-list
// bookkeeping goes through the pool mutex.
unsafe impl Send for MemoryPool {}
// SAFETY: see above.
unsafe impl Sync for MemoryPool {}

impl MemoryPool {
    /// Allocate room for `count` objects of `object_size` bytes.
    ///
    /// Every slot starts free; the first `allocate` returns the lowest address.
    pub fn create(
        object_size: usize,
        count: usize,
        name: impl Into<String>,
    ) -> Result<Self, PoolError> {
        let name = name.into();
        if object_size == 0 || count == 0 {
            return Err(PoolError::EmptyGeometry { name });
        }
        let overflow = |name| PoolError::Overflow {
            name,
            object_size,
            count,
        };
        let Some(slot_size) = object_size.checked_next_multiple_of(POOL_ALIGN) else {
            return Err(overflow(name));
        };
        let Some(bytes) = slot_size.checked_mul(count) else {
            return Err(overflow(name));
        };
        let Ok(layout) = Layout::from_size_align(bytes, POOL_ALIGN) else {
            return Err(overflow(name));
        };

        let mut free_list = Vec::new();
        let mut live = Vec::new();
        if free_list.try_reserve_exact(count).is_err() || live.try_reserve_exact(count).is_err() {
            return Err(PoolError::Exhausted { name, bytes });
        }
        free_list.extend((0..count).rev());
        live.resize(count, false);

        // SAFETY: `layout` has non-zero size.
        let Some(base) = NonNull::new(unsafe { alloc::alloc(layout) }) else {
            return Err(PoolError::Exhausted { name, bytes });
        };

        Ok(Self {
            name,
            base,
            layout,
            object_size,
            slot_size,
            count,
            state: Mutex::new(PoolState {
                free_list,
                live,
                allocated: 0,
                high_water: 0,
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Pop the most recently returned free slot. `None` when exhausted.
    pub fn allocate(&self) -> Option<NonNull<u8>> {
        let mut state = self.state.lock();
        let slot = state.free_list.pop()?;
        state.live[slot] = true;
        state.allocated += 1;
        state.high_water = state.high_water.max(state.allocated);
        drop(state);
        // SAFETY: `slot < count`, so the offset stays inside the block.
        Some(unsafe { self.base.add(slot * self.slot_size) })
    }

    /// Push `object` back onto the free list.
    ///
    /// Addresses outside the block, not on a slot boundary, or already free
    /// are rejected and the pool is left unchanged.
    pub fn give_back(&self, object: NonNull<u8>) -> Result<(), PoolError> {
        let addr = object.as_ptr() as usize;
        let slot = self.slot_of(addr).ok_or_else(|| PoolError::ForeignObject {
            name: self.name.clone(),
            addr,
        })?;
        let mut state = self.state.lock();
        if !state.live[slot] {
            return Err(PoolError::DoubleReturn {
                name: self.name.clone(),
                addr,
            });
        }
        state.live[slot] = false;
        state.allocated -= 1;
        state.free_list.push(slot);
        Ok(())
    }

    /// Whether `object` is one of this pool's slots.
    #[must_use]
    pub fn owns(&self, object: NonNull<u8>) -> bool {
        self.slot_of(object.as_ptr() as usize).is_some()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            name: self.name.clone(),
            object_size: self.object_size,
            slot_size: self.slot_size,
            total: self.count,
            free: state.free_list.len(),
            allocated: state.allocated,
            high_water: state.high_water,
        }
    }

    /// Release the block. Outstanding objects become invalid.
    pub fn destroy(self) {}

    fn slot_of(&self, addr: usize) -> Option<usize> {
        let offset = addr.checked_sub(self.base.as_ptr() as usize)?;
        if offset >= self.layout.size() || offset % self.slot_size != 0 {
            return None;
        }
        Some(offset / self.slot_size)
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        // SAFETY: `base` came from `alloc::alloc(self.layout)` and is freed once.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}
