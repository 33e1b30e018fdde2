//! Allocator configuration.

/// Tunables for an [`crate::Allocator`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Requests at or below this size are routed to a small pool (after the
    /// slab cache declines them).
    pub small_block_size: usize,
    /// Backing buffer size for each small pool.
    pub small_pool_size: usize,
    /// Backing buffer size for the single large pool.
    pub large_pool_size: usize,
    /// Maximum number of small pool slots the allocator will create.
    pub max_pools: usize,
    /// Objects carved out of each slab region when a size class's magazine
    /// runs dry.
    pub objects_per_slab: usize,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            small_block_size: 256,
            small_pool_size: 64 * 1024,
            large_pool_size: 4 * 1024 * 1024,
            max_pools: 64,
            objects_per_slab: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_internally_consistent() {
        let cfg = AllocatorConfig::default();
        assert!(cfg.small_block_size < cfg.small_pool_size);
        assert!(cfg.small_pool_size < cfg.large_pool_size);
        assert!(cfg.max_pools > 0);
        assert!(cfg.objects_per_slab > 0);
    }
}
