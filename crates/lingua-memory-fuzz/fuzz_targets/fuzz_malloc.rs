#![no_main]

use libfuzzer_sys::fuzz_target;
use lingua_memory::{Allocator, AllocatorConfig};

/// Byte-chunk-driven alloc/free/realloc sequence: each input byte selects
/// an operation and, where relevant, a size drawn from the following byte.
fuzz_target!(|data: &[u8]| {
    let Ok(allocator) = Allocator::new(AllocatorConfig {
        small_block_size: 64,
        small_pool_size: 64 * 1024,
        large_pool_size: 1024 * 1024,
        max_pools: 4,
        objects_per_slab: 32,
    }) else {
        return;
    };

    let mut live: Vec<*mut u8> = Vec::new();
    let mut i = 0;
    while i + 1 < data.len() {
        let op = data[i];
        let size = (data[i + 1] as usize) * 16 + 1;
        i += 2;

        match op % 3 {
            0 => {
                if let Ok(ptr) = allocator.alloc(size) {
                    live.push(ptr);
                }
            }
            1 => {
                if !live.is_empty() {
                    let idx = (size) % live.len();
                    let ptr = live.swap_remove(idx);
                    let _ = allocator.free(ptr);
                }
            }
            _ => {
                if !live.is_empty() {
                    let idx = size % live.len();
                    if let Ok(new_ptr) = allocator.realloc(live[idx], size) {
                        live[idx] = new_ptr;
                    }
                }
            }
        }
    }

    for ptr in live {
        let _ = allocator.free(ptr);
    }
});
