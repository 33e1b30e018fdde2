//! Pool-based memory allocator: a slab cache for small fixed sizes, a
//! best-fit red-black index of small pools, and a single large pool as the
//! fallback, all bound together by the error context facility in
//! [`error`].
//!
//! The process-wide convenience API (`init`/`alloc`/`free`/...) is a thin
//! wrapper over a `OnceLock`-held [`Allocator`]; callers who don't want
//! global mutable state can construct their own with [`Allocator::new`] and
//! call its inherent methods directly.

pub mod align;
pub mod config;
#[cfg(feature = "debug-leak-tracking")]
pub mod debug;
pub mod error;
pub mod pool;
pub mod rbtree;
pub mod slab;

pub use config::AllocatorConfig;
pub use error::ErrorCode;

use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;

use align::{align_up, MEMORY_ALIGNMENT};
use pool::{Pool, ReallocOutcome};
use rbtree::{PoolId, PoolIndex};
use slab::SlabCache;

/// A best-effort snapshot of allocator-wide byte counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Sum of every pool's total backing size (large pool + all small
    /// pools). Slab regions are not pools and are excluded.
    pub total_allocated: usize,
    /// Sum of every pool's used-byte counter.
    pub total_used: usize,
}

impl fmt::Display for AllocatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "allocated={} used={}",
            self.total_allocated, self.total_used
        )
    }
}

struct AdminState {
    small_pools: Vec<Option<Pool>>,
    index: PoolIndex,
    /// Sorted by base address; rebuilt on every create/destroy. Resolves
    /// the "address classification on free" design note: the size-keyed
    /// index alone cannot answer "which pool owns this pointer", so a
    /// separate address-ordered structure is kept alongside it.
    address_index: Vec<(usize, usize, PoolId)>,
}

impl AdminState {
    fn locate_owner(&self, addr: usize) -> Option<PoolId> {
        let i = self
            .address_index
            .partition_point(|&(base, _, _)| base <= addr);
        if i == 0 {
            return None;
        }
        let (base, end, pool_id) = self.address_index[i - 1];
        (addr >= base && addr < end).then_some(pool_id)
    }

    fn rebuild_address_index(&mut self) {
        self.address_index = self
            .small_pools
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref().map(|p| {
                    let base = p.base_addr();
                    (base, base + p.total_size(), i as PoolId)
                })
            })
            .collect();
        self.address_index.sort_unstable_by_key(|&(base, _, _)| base);
    }
}

/// An allocator instance: one large pool, a table of small pools indexed
/// for best-fit lookup, and a slab cache in front of both.
pub struct Allocator {
    config: AllocatorConfig,
    large: Pool,
    slab: SlabCache,
    admin: Mutex<AdminState>,
}

impl Allocator {
    /// Builds a standalone allocator. Does not touch the process-wide
    /// singleton; use [`init`] for that.
    pub fn new(config: AllocatorConfig) -> Result<Self, ErrorCode> {
        let large = Pool::new(config.large_pool_size)?;
        let mut small_pools = Vec::with_capacity(config.max_pools);
        let mut index = PoolIndex::new();
        for i in 0..config.max_pools {
            let pool = Pool::new(config.small_pool_size)?;
            index.insert(pool.total_size(), i as PoolId);
            small_pools.push(Some(pool));
        }
        let mut admin = AdminState {
            small_pools,
            index,
            address_index: Vec::new(),
        };
        admin.rebuild_address_index();
        let slab = SlabCache::new(config.objects_per_slab);
        Ok(Self {
            config,
            large,
            slab,
            admin: Mutex::new(admin),
        })
    }

    #[must_use]
    pub fn config(&self) -> AllocatorConfig {
        self.config
    }

    /// `size <- align_up(size, MEMORY_ALIGNMENT)`, then slab cache, then
    /// best-fit small pool, then the large pool.
    #[cfg_attr(feature = "debug-leak-tracking", track_caller)]
    pub fn alloc(&self, size: usize) -> Result<*mut u8, ErrorCode> {
        let size = align_up(size.max(1), MEMORY_ALIGNMENT);

        if SlabCache::class_for(size).is_some() {
            if let Some(result) = self.slab.alloc(size) {
                return result;
            }
        }

        {
            let admin = self.admin.lock();
            if let Some((_, pool_id)) = admin.index.find_best_fit(size) {
                if let Some(pool) = admin.small_pools[pool_id as usize].as_ref() {
                    if let Ok(ptr) = pool.allocate(size) {
                        #[cfg(feature = "debug-leak-tracking")]
                        self.track_alloc(ptr, size);
                        return Ok(ptr);
                    }
                }
            }
        }

        let ptr = self.large.allocate(size)?;
        #[cfg(feature = "debug-leak-tracking")]
        self.track_alloc(ptr, size);
        Ok(ptr)
    }

    #[cfg(feature = "debug-leak-tracking")]
    #[track_caller]
    fn track_alloc(&self, ptr: *mut u8, size: usize) {
        let loc = std::panic::Location::caller();
        debug::track(ptr, size, loc.file(), loc.line());
    }

    /// Null is a no-op. Classifies `ptr` by address range (slab, large
    /// pool, then small pools) and dispatches to the owner.
    pub fn free(&self, ptr: *mut u8) -> Result<(), ErrorCode> {
        if ptr.is_null() {
            return Ok(());
        }
        if let Some(class_size) = self.slab.class_owning(ptr) {
            self.slab.free(class_size, ptr);
            #[cfg(feature = "debug-leak-tracking")]
            debug::untrack(ptr);
            return Ok(());
        }
        if self.large.contains(ptr) {
            self.large.free(ptr)?;
            #[cfg(feature = "debug-leak-tracking")]
            debug::untrack(ptr);
            return Ok(());
        }
        let freed = {
            let admin = self.admin.lock();
            match admin.locate_owner(ptr as usize) {
                Some(pool_id) => admin.small_pools[pool_id as usize]
                    .as_ref()
                    .map(|pool| pool.free(ptr)),
                None => None,
            }
        };
        if let Some(result) = freed {
            result?;
            #[cfg(feature = "debug-leak-tracking")]
            debug::untrack(ptr);
            return Ok(());
        }
        error::log_event(
            ErrorCode::PoolInvalidFree,
            error::Level::Error,
            file!(),
            line!(),
            "Allocator::free",
            "free of a pointer not owned by any pool or slab",
        );
        Err(ErrorCode::PoolInvalidFree)
    }

    /// Null pointer delegates to `alloc`; zero size delegates to `free`.
    ///
    /// The admin lock is never held across the recursive `alloc`/`free`
    /// calls a move-on-grow takes, since those re-acquire it themselves.
    pub fn realloc(&self, ptr: *mut u8, new_size: usize) -> Result<*mut u8, ErrorCode> {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        if new_size == 0 {
            self.free(ptr)?;
            return Ok(std::ptr::null_mut());
        }
        let new_size = align_up(new_size, MEMORY_ALIGNMENT);

        if self.large.contains(ptr) {
            let outcome = self.large.reallocate(ptr, new_size)?;
            return self.finish_realloc_large(ptr, new_size, outcome);
        }

        let pool_id = self
            .admin
            .lock()
            .locate_owner(ptr as usize)
            .ok_or(ErrorCode::PoolInvalidFree)?;
        let outcome = {
            let admin = self.admin.lock();
            let pool = admin.small_pools[pool_id as usize]
                .as_ref()
                .ok_or(ErrorCode::PoolInvalidPool)?;
            pool.reallocate(ptr, new_size)?
        };
        self.finish_realloc_small(pool_id, ptr, new_size, outcome)
    }

    fn finish_realloc_large(
        &self,
        ptr: *mut u8,
        new_size: usize,
        outcome: ReallocOutcome,
    ) -> Result<*mut u8, ErrorCode> {
        match outcome {
            ReallocOutcome::Unchanged(p) | ReallocOutcome::Grown(p) => Ok(p),
            ReallocOutcome::MustMove { old_payload_size } => {
                let new_ptr = self.alloc(new_size)?;
                Pool::copy_payload(new_ptr, ptr, old_payload_size);
                self.large.free(ptr)?;
                Ok(new_ptr)
            }
        }
    }

    fn finish_realloc_small(
        &self,
        pool_id: PoolId,
        ptr: *mut u8,
        new_size: usize,
        outcome: ReallocOutcome,
    ) -> Result<*mut u8, ErrorCode> {
        match outcome {
            ReallocOutcome::Unchanged(p) | ReallocOutcome::Grown(p) => Ok(p),
            ReallocOutcome::MustMove { old_payload_size } => {
                let new_ptr = self.alloc(new_size)?;
                Pool::copy_payload(new_ptr, ptr, old_payload_size);
                let admin = self.admin.lock();
                let pool = admin.small_pools[pool_id as usize]
                    .as_ref()
                    .ok_or(ErrorCode::PoolInvalidPool)?;
                pool.free(ptr)?;
                Ok(new_ptr)
            }
        }
    }

    #[must_use]
    pub fn get_stats(&self) -> AllocatorStats {
        let admin = self.admin.lock();
        let mut total_allocated = self.large.total_size();
        let mut total_used = self.large.used_bytes();
        for pool in admin.small_pools.iter().flatten() {
            total_allocated += pool.total_size();
            total_used += pool.used_bytes();
        }
        AllocatorStats {
            total_allocated,
            total_used,
        }
    }

    /// Creates and registers a new small pool of `size` bytes. Fails if the
    /// registry has no free slot.
    pub fn create(&self, size: usize) -> Result<PoolId, ErrorCode> {
        let mut admin = self.admin.lock();
        let slot = admin.small_pools.iter().position(Option::is_none);
        let slot = match slot {
            Some(i) => i,
            None if admin.small_pools.len() < self.config.max_pools => {
                admin.small_pools.push(None);
                admin.small_pools.len() - 1
            }
            None => return Err(ErrorCode::PoolFull),
        };
        let pool = Pool::new(size)?;
        admin.index.insert(pool.total_size(), slot as PoolId);
        admin.small_pools[slot] = Some(pool);
        admin.rebuild_address_index();
        Ok(slot as PoolId)
    }

    /// Deregisters and releases the pool at `pool_id`.
    pub fn destroy(&self, pool_id: PoolId) -> Result<(), ErrorCode> {
        let mut admin = self.admin.lock();
        let slot = admin
            .small_pools
            .get_mut(pool_id as usize)
            .ok_or(ErrorCode::PoolInvalidPool)?;
        let pool = slot.take().ok_or(ErrorCode::PoolInvalidPool)?;
        admin.index.remove(pool.total_size(), pool_id);
        drop(pool);
        admin.rebuild_address_index();
        Ok(())
    }

    /// Explicit per-pool allocation, skipping the routing policy. Per the
    /// resolved open question, does not fall back to the router on
    /// failure.
    pub fn alloc_from(&self, pool_id: PoolId, size: usize) -> Result<*mut u8, ErrorCode> {
        let size = align_up(size.max(1), MEMORY_ALIGNMENT);
        let admin = self.admin.lock();
        let pool = admin
            .small_pools
            .get(pool_id as usize)
            .and_then(Option::as_ref)
            .ok_or(ErrorCode::PoolInvalidPool)?;
        pool.allocate(size)
    }

    pub fn free_to(&self, pool_id: PoolId, ptr: *mut u8) -> Result<(), ErrorCode> {
        if ptr.is_null() {
            return Ok(());
        }
        let admin = self.admin.lock();
        let pool = admin
            .small_pools
            .get(pool_id as usize)
            .and_then(Option::as_ref)
            .ok_or(ErrorCode::PoolInvalidPool)?;
        if !pool.contains(ptr) {
            return Err(ErrorCode::PoolInvalidFree);
        }
        pool.free(ptr)
    }

    /// Like [`Allocator::realloc`], but confined to `pool_id`: a move that
    /// would require falling back to the router instead fails with
    /// `PoolAllocFailed`, matching `alloc_from`'s no-fallback contract.
    pub fn realloc_from(
        &self,
        pool_id: PoolId,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<*mut u8, ErrorCode> {
        if ptr.is_null() {
            return self.alloc_from(pool_id, new_size);
        }
        if new_size == 0 {
            self.free_to(pool_id, ptr)?;
            return Ok(std::ptr::null_mut());
        }
        let new_size = align_up(new_size, MEMORY_ALIGNMENT);
        let admin = self.admin.lock();
        let pool = admin
            .small_pools
            .get(pool_id as usize)
            .and_then(Option::as_ref)
            .ok_or(ErrorCode::PoolInvalidPool)?;
        if !pool.contains(ptr) {
            return Err(ErrorCode::PoolInvalidFree);
        }
        match pool.reallocate(ptr, new_size)? {
            ReallocOutcome::Unchanged(p) | ReallocOutcome::Grown(p) => Ok(p),
            ReallocOutcome::MustMove { .. } => Err(ErrorCode::PoolAllocFailed),
        }
    }

    /// Explicit per-pool range-containment test.
    #[must_use]
    pub fn contains(&self, pool_id: PoolId, ptr: *mut u8) -> bool {
        let admin = self.admin.lock();
        admin
            .small_pools
            .get(pool_id as usize)
            .and_then(Option::as_ref)
            .is_some_and(|p| p.contains(ptr))
    }

    /// Single-pass defragmentation of one small pool.
    pub fn defragment(&self, pool_id: PoolId) -> Result<(), ErrorCode> {
        let admin = self.admin.lock();
        let pool = admin
            .small_pools
            .get(pool_id as usize)
            .and_then(Option::as_ref)
            .ok_or(ErrorCode::PoolInvalidPool)?;
        pool.defragment();
        Ok(())
    }
}

static GLOBAL: OnceLock<Mutex<Option<Allocator>>> = OnceLock::new();

fn global() -> &'static Mutex<Option<Allocator>> {
    GLOBAL.get_or_init(|| Mutex::new(None))
}

/// Creates the process-wide allocator. Must precede any other free function
/// in this module; calling them outside the `init`/`cleanup` window is a
/// programming error this crate reports by panicking rather than risking
/// undefined behavior.
pub fn init(config: AllocatorConfig) -> Result<(), ErrorCode> {
    let allocator = Allocator::new(config)?;
    *global().lock() = Some(allocator);
    Ok(())
}

/// Tears down the process-wide allocator, releasing every pool's backing
/// memory.
pub fn cleanup() {
    *global().lock() = None;
    #[cfg(feature = "debug-leak-tracking")]
    debug::reset();
}

fn with_global<T>(f: impl FnOnce(&Allocator) -> T) -> T {
    let guard = global().lock();
    let allocator = guard
        .as_ref()
        .expect("lingua_memory API called outside the init()/cleanup() window");
    f(allocator)
}

pub fn alloc(size: usize) -> Result<*mut u8, ErrorCode> {
    with_global(|a| a.alloc(size))
}

pub fn free(ptr: *mut u8) -> Result<(), ErrorCode> {
    with_global(|a| a.free(ptr))
}

pub fn realloc(ptr: *mut u8, new_size: usize) -> Result<*mut u8, ErrorCode> {
    with_global(|a| a.realloc(ptr, new_size))
}

pub fn get_stats() -> AllocatorStats {
    with_global(Allocator::get_stats)
}

pub fn create(size: usize) -> Result<PoolId, ErrorCode> {
    with_global(|a| a.create(size))
}

pub fn destroy(pool_id: PoolId) -> Result<(), ErrorCode> {
    with_global(|a| a.destroy(pool_id))
}

pub fn alloc_from(pool_id: PoolId, size: usize) -> Result<*mut u8, ErrorCode> {
    with_global(|a| a.alloc_from(pool_id, size))
}

pub fn free_to(pool_id: PoolId, ptr: *mut u8) -> Result<(), ErrorCode> {
    with_global(|a| a.free_to(pool_id, ptr))
}

pub fn realloc_from(pool_id: PoolId, ptr: *mut u8, new_size: usize) -> Result<*mut u8, ErrorCode> {
    with_global(|a| a.realloc_from(pool_id, ptr, new_size))
}

pub fn contains(pool_id: PoolId, ptr: *mut u8) -> bool {
    with_global(|a| a.contains(pool_id, ptr))
}

#[cfg(feature = "debug-leak-tracking")]
pub fn leak_check() -> Vec<debug::LeakRecord> {
    debug::leak_check()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> AllocatorConfig {
        AllocatorConfig {
            small_block_size: 64,
            small_pool_size: 4096,
            large_pool_size: 1024 * 1024,
            max_pools: 4,
            objects_per_slab: 8,
        }
    }

    #[test]
    fn scenario_slab_allocation_does_not_count_toward_pool_used() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        let stats_before = alloc.get_stats();
        let _p = alloc.alloc(32).unwrap();
        let stats_after = alloc.get_stats();
        assert_eq!(stats_before.total_used, stats_after.total_used);
    }

    #[test]
    fn scenario_first_fit_reclaims_earliest_hole() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        let p1 = alloc.alloc(200).unwrap();
        let _p2 = alloc.alloc(200).unwrap();
        alloc.free(p1).unwrap();
        let p3 = alloc.alloc(200).unwrap();
        assert_eq!(p1, p3);
    }

    #[test]
    fn scenario_realloc_same_size_is_identity() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        let p = alloc.alloc(1000).unwrap();
        let p2 = alloc.realloc(p, 500).unwrap();
        assert_eq!(p, p2);
    }

    #[test]
    fn destroy_pool_invalidates_containment() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        // The registry starts at `max_pools` already (init pre-populates
        // it), so a fresh slot must be freed before `create` can succeed.
        alloc.destroy(0).unwrap();
        let pool_id = alloc.create(4096).unwrap();
        let p = alloc.alloc_from(pool_id, 64).unwrap();
        assert!(alloc.contains(pool_id, p));
        alloc.destroy(pool_id).unwrap();
        assert!(!alloc.contains(pool_id, p));
    }

    #[test]
    fn registry_full_returns_pool_full() {
        let mut cfg = tiny_config();
        cfg.max_pools = 1;
        let alloc = Allocator::new(cfg).unwrap();
        // The one slot is already occupied by init's own small pool.
        assert_eq!(alloc.create(512), Err(ErrorCode::PoolFull));
    }

    #[test]
    fn alloc_exceeding_every_pool_fails_cleanly() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        let stats_before = alloc.get_stats();
        let result = alloc.alloc(1024 * 1024 * 1024);
        assert_eq!(result, Err(ErrorCode::PoolAllocFailed));
        assert_eq!(alloc.get_stats(), stats_before);
    }

    #[test]
    fn free_alloc_round_trip_preserves_stats() {
        let alloc = Allocator::new(tiny_config()).unwrap();
        let before = alloc.get_stats();
        let p = alloc.alloc(500).unwrap();
        alloc.free(p).unwrap();
        assert_eq!(alloc.get_stats(), before);
    }

    #[test]
    fn global_facade_init_alloc_cleanup_round_trips() {
        init(tiny_config()).unwrap();
        let p = alloc(64).unwrap();
        assert!(!p.is_null());
        free(p).unwrap();
        cleanup();
    }
}
