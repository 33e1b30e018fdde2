//! Fixed-size-class slab cache.
//!
//! Small, hot allocation sizes are served from per-class magazines instead
//! of going through the pool's first-fit search. All classes share one
//! `parking_lot::Mutex` guarding the whole cache; this is a known point of
//! contention under concurrent load and is kept deliberately rather than
//! sharded per class or per thread.

use parking_lot::Mutex;

use crate::align::MAX_ALIGN;

/// Size classes served by the slab cache, smallest first.
pub const SIZE_CLASSES: [usize; 4] = [16, 32, 64, 128];

/// Objects carved out of each freshly grown slab region.
pub const OBJECTS_PER_SLAB_DEFAULT: usize = 64;

fn class_index(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&c| size <= c)
}

struct Magazine {
    class_size: usize,
    /// Free object pointers for this class, in no particular order.
    free_list: Vec<*mut u8>,
    /// Every region ever allocated for this class, for `contains` and for
    /// teardown.
    regions: Vec<(*mut u8, usize)>,
    objects_per_slab: usize,
}

// SAFETY: raw pointers here always originate from this process's own
// allocations and are only ever handed back to the same allocator; the
// cache's mutex serializes all access to the pointers it stores.
unsafe impl Send for Magazine {}

impl Magazine {
    fn new(class_size: usize, objects_per_slab: usize) -> Self {
        Self {
            class_size,
            free_list: Vec::new(),
            regions: Vec::new(),
            objects_per_slab,
        }
    }

    fn grow(&mut self) -> Result<(), crate::error::ErrorCode> {
        let layout_size = self.class_size * self.objects_per_slab;
        let layout = std::alloc::Layout::from_size_align(layout_size, MAX_ALIGN)
            .map_err(|_| crate::error::ErrorCode::InvalidArgument)?;
        // SAFETY: layout_size is non-zero (class_size and objects_per_slab
        // are both non-zero) and alignment is a valid power of two.
        let base = unsafe { std::alloc::alloc(layout) };
        if base.is_null() {
            return Err(crate::error::ErrorCode::MemoryAllocation);
        }
        self.regions.push((base, layout_size));
        for i in 0..self.objects_per_slab {
            // SAFETY: offset stays within the region just allocated above.
            let ptr = unsafe { base.add(i * self.class_size) };
            self.free_list.push(ptr);
        }
        Ok(())
    }

    fn alloc(&mut self) -> Result<*mut u8, crate::error::ErrorCode> {
        if self.free_list.is_empty() {
            self.grow()?;
        }
        Ok(self
            .free_list
            .pop()
            .expect("grow() always pushes at least one free object"))
    }

    fn free(&mut self, ptr: *mut u8) {
        self.free_list.push(ptr);
    }

    fn contains(&self, ptr: *mut u8) -> bool {
        self.regions.iter().any(|&(base, len)| {
            let base_addr = base as usize;
            let ptr_addr = ptr as usize;
            ptr_addr >= base_addr && ptr_addr < base_addr + len
        })
    }
}

impl Drop for Magazine {
    fn drop(&mut self) {
        let layout = std::alloc::Layout::from_size_align(self.class_size, MAX_ALIGN).ok();
        for &(base, len) in &self.regions {
            if let Ok(l) = std::alloc::Layout::from_size_align(len, MAX_ALIGN) {
                // SAFETY: each region was allocated with this exact layout
                // in `grow` and is only freed once, here.
                unsafe { std::alloc::dealloc(base, l) };
            } else if let Some(l) = layout {
                // SAFETY: fallback path, unreachable in practice since
                // `len` is always a multiple of `class_size` computed with
                // the same alignment.
                unsafe { std::alloc::dealloc(base, l) };
            }
        }
    }
}

struct SlabCacheInner {
    magazines: Vec<Magazine>,
    objects_per_slab: usize,
}

/// A size-classed free-object cache sitting in front of the pool allocator.
pub struct SlabCache {
    inner: Mutex<SlabCacheInner>,
}

impl SlabCache {
    #[must_use]
    pub fn new(objects_per_slab: usize) -> Self {
        let magazines = SIZE_CLASSES
            .iter()
            .map(|&c| Magazine::new(c, objects_per_slab))
            .collect();
        Self {
            inner: Mutex::new(SlabCacheInner {
                magazines,
                objects_per_slab,
            }),
        }
    }

    /// Returns the size class `size` would be served from, if any fits.
    #[must_use]
    pub fn class_for(size: usize) -> Option<usize> {
        class_index(size).map(|i| SIZE_CLASSES[i])
    }

    pub fn alloc(&self, size: usize) -> Option<Result<*mut u8, crate::error::ErrorCode>> {
        let idx = class_index(size)?;
        let mut inner = self.inner.lock();
        Some(inner.magazines[idx].alloc())
    }

    /// Frees `ptr`, which must have come from this cache's class `size`.
    pub fn free(&self, size: usize, ptr: *mut u8) -> bool {
        let Some(idx) = class_index(size) else {
            return false;
        };
        self.inner.lock().magazines[idx].free(ptr);
        true
    }

    /// True if `ptr` falls inside any region this cache owns, regardless of
    /// class. Used by the facade to route `free`/`contains` calls without
    /// requiring the caller to know the original size class.
    #[must_use]
    pub fn contains(&self, ptr: *mut u8) -> bool {
        let inner = self.inner.lock();
        inner.magazines.iter().any(|m| m.contains(ptr))
    }

    /// Finds the class size that currently owns `ptr`, if any.
    #[must_use]
    pub fn class_owning(&self, ptr: *mut u8) -> Option<usize> {
        let inner = self.inner.lock();
        inner
            .magazines
            .iter()
            .find(|m| m.contains(ptr))
            .map(|m| m.class_size)
    }

    #[must_use]
    pub fn objects_per_slab(&self) -> usize {
        self.inner.lock().objects_per_slab
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_for_rounds_up_to_nearest_class() {
        assert_eq!(SlabCache::class_for(1), Some(16));
        assert_eq!(SlabCache::class_for(16), Some(16));
        assert_eq!(SlabCache::class_for(17), Some(32));
        assert_eq!(SlabCache::class_for(128), Some(128));
        assert_eq!(SlabCache::class_for(129), None);
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let cache = SlabCache::new(8);
        let ptr = cache.alloc(16).unwrap().unwrap();
        assert!(cache.contains(ptr));
        assert_eq!(cache.class_owning(ptr), Some(16));
        assert!(cache.free(16, ptr));
    }

    #[test]
    fn alloc_grows_when_magazine_empty() {
        let cache = SlabCache::new(2);
        let mut ptrs = Vec::new();
        for _ in 0..10 {
            ptrs.push(cache.alloc(32).unwrap().unwrap());
        }
        assert_eq!(ptrs.len(), 10);
        let mut unique = ptrs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);
        for p in ptrs {
            cache.free(32, p);
        }
    }

    #[test]
    fn freed_objects_are_reused() {
        let cache = SlabCache::new(4);
        let a = cache.alloc(64).unwrap().unwrap();
        cache.free(64, a);
        let b = cache.alloc(64).unwrap().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn out_of_range_size_is_not_served() {
        let cache = SlabCache::new(4);
        assert!(cache.alloc(256).is_none());
    }
}
