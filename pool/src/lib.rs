//! Two-tier memory pool.
//!
//! Tier one is a slab pool of fixed-size records (connection state); tier
//! two is a buddy allocator over one arena for variable-size scratch
//! buffers (request overflow). [`TieredPool`] unifies both behind a single
//! acquire/release surface and adds composite status and health reporting.

pub mod buddy;
pub mod slab;

pub use buddy::BuddyPool;
pub use slab::{SLAB_OBJECTS, SlabPool, SlabStats, SlotId};

/// Composite pool health, derived from the buddy tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolHealth {
    Healthy,
    LowMemory,
    HighFragmentation,
}

/// Point-in-time snapshot of both tiers.
#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub slab: SlabStats,
    pub buffer_available: usize,
    pub buffer_total: usize,
    pub fragmentation: usize,
}

/// Slab + buddy behind one surface.
pub struct TieredPool<T> {
    connections: SlabPool<T>,
    buffers: BuddyPool,
}

impl<T: Default + 'static> TieredPool<T> {
    pub fn new(max_connections: usize, buffer_pool_size: usize, min_block: usize) -> Self {
        Self::with_factory(max_connections, buffer_pool_size, min_block, T::default)
    }
}

impl<T> TieredPool<T> {
    /// Like [`new`](Self::new), but connection records are built by
    /// `factory`. Used when records carry runtime-configured capacities.
    pub fn with_factory(
        max_connections: usize,
        buffer_pool_size: usize,
        min_block: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        TieredPool {
            connections: SlabPool::with_factory(max_connections, factory),
            buffers: BuddyPool::new(buffer_pool_size, min_block),
        }
    }

    /// Acquire a connection record slot. `None` when the cap is reached.
    pub fn acquire_connection(&self) -> Option<SlotId> {
        self.connections.acquire()
    }

    /// Return a connection record slot to the slab tier.
    pub fn release_connection(&self, id: SlotId) -> bool {
        self.connections.release(id)
    }

    /// Exclusive access to a connection record.
    ///
    /// # Safety
    ///
    /// Same contract as [`SlabPool::get_mut`]: the caller holds logical
    /// ownership of the slot.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn connection_mut(&self, id: SlotId) -> &mut T {
        unsafe { self.connections.get_mut(id) }
    }

    /// Allocate a zeroed scratch buffer of at least `size` bytes from the
    /// buddy tier. Returns the block offset.
    pub fn allocate_buffer(&self, size: usize) -> Option<usize> {
        self.buffers.allocate(size)
    }

    /// Free a scratch buffer by offset.
    pub fn deallocate_buffer(&self, offset: usize) -> bool {
        self.buffers.deallocate(offset)
    }

    /// Pointer to a live scratch buffer, for kernel reads into it.
    pub fn buffer_ptr(&self, offset: usize) -> *mut u8 {
        self.buffers.block_ptr(offset)
    }

    pub fn defragment(&self) {
        self.buffers.defragment();
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            slab: self.connections.stats(),
            buffer_available: self.buffers.available(),
            buffer_total: self.buffers.pool_size(),
            fragmentation: self.buffers.fragmentation(),
        }
    }

    /// Health classification over the buffer tier: fragmentation above 80
    /// reports `HighFragmentation`, less than a tenth of the arena free
    /// reports `LowMemory`.
    pub fn health_check(&self) -> PoolHealth {
        let status = self.status();
        if status.fragmentation > 80 {
            PoolHealth::HighFragmentation
        } else if status.buffer_available < status.buffer_total / 10 {
            PoolHealth::LowMemory
        } else {
            PoolHealth::Healthy
        }
    }

    pub fn slab_stats(&self) -> SlabStats {
        self.connections.stats()
    }

    /// Handles of every live connection record, for shutdown sweeps.
    pub fn live_connections(&self) -> Vec<SlotId> {
        self.connections.live_ids()
    }
}
