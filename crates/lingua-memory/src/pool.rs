//! Per-pool first-fit heap with splitting and boundary-tag coalescing.
//!
//! Each [`Pool`] owns one contiguous backing region obtained from the system
//! allocator. Blocks are headers written in-band at the front of each carved
//! span, chained in address order through offsets (not raw pointers) into
//! that region, following the "offset, not raw pointer" redesign guidance —
//! adapted here to flat byte offsets since the backing store is one
//! contiguous allocation rather than a paged arena. This mirrors
//! `frankenlibc-membrane`'s `arena.rs`, which writes typed headers into raw
//! `std::alloc`-backed regions from safe-looking methods with `// SAFETY:`
//! blocks documenting each unsafe access.

use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::align::{align_up, MAX_ALIGN};
use crate::error::ErrorCode;

/// "LMM_BLK!" in ASCII, arbitrary but stable.
const BLOCK_MAGIC: u64 = 0x4C4D_4D5F_424C_4B21;

/// Sentinel for "no block" in the prev/next offset chain.
const NULL_OFFSET: usize = usize::MAX;

#[repr(C)]
struct BlockHeader {
    magic: u64,
    payload_size: usize,
    in_use: bool,
    prev: usize,
    next: usize,
}

/// Every block's header occupies this many bytes, padded so the payload
/// that follows is always [`MAX_ALIGN`]-aligned.
fn header_stride() -> usize {
    align_up(std::mem::size_of::<BlockHeader>(), MAX_ALIGN)
}

/// The smallest payload a split-off remainder block is allowed to have;
/// below this, splitting is skipped and the whole block is handed out.
const MIN_SPLIT_PAYLOAD: usize = MAX_ALIGN;

/// Outcome of [`Pool::reallocate`] when growth was requested.
pub enum ReallocOutcome {
    /// `new_size` was within the existing payload; pointer unchanged.
    Unchanged(*mut u8),
    /// Grown in place, absorbing the following free block.
    Grown(*mut u8),
    /// No in-place growth possible; caller must allocate elsewhere, copy
    /// `old_payload_size` bytes, and free the original block.
    MustMove { old_payload_size: usize },
}

struct Inner {
    /// Offset of the first block in the chain. Always `0` once initialized.
    head: usize,
}

/// A contiguous backing region managed as a chain of headers + payloads.
pub struct Pool {
    buffer: *mut u8,
    layout: Layout,
    total_size: usize,
    structural: Mutex<Inner>,
    /// Guards the address-range containment test. The range itself never
    /// changes after construction; this lock exists to match the locking
    /// discipline described for `contains`, not because the range is
    /// mutable.
    range_lock: RwLock<()>,
    used_bytes: AtomicUsize,
}

// SAFETY: `buffer` is exclusively owned by this `Pool` and all access to
// the region it points to is mediated by `structural`/`range_lock`.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    /// Creates a pool backed by a fresh `total_size`-byte region.
    pub fn new(total_size: usize) -> Result<Self, ErrorCode> {
        let stride = header_stride();
        if total_size <= stride {
            return Err(ErrorCode::InvalidArgument);
        }
        let layout =
            Layout::from_size_align(total_size, MAX_ALIGN).map_err(|_| ErrorCode::InvalidArgument)?;
        // SAFETY: layout.size() is non-zero (checked above) and alignment
        // is a valid power of two.
        let buffer = unsafe { alloc::alloc(layout) };
        if buffer.is_null() {
            return Err(ErrorCode::MemoryAllocation);
        }
        let pool = Self {
            buffer,
            layout,
            total_size,
            structural: Mutex::new(Inner { head: 0 }),
            range_lock: RwLock::new(()),
            used_bytes: AtomicUsize::new(0),
        };
        // SAFETY: `buffer` was just allocated with `layout` and is not yet
        // aliased; `stride` fits within `total_size` by the check above.
        unsafe {
            pool.write_header(
                0,
                &BlockHeader {
                    magic: BLOCK_MAGIC,
                    payload_size: total_size - stride,
                    in_use: false,
                    prev: NULL_OFFSET,
                    next: NULL_OFFSET,
                },
            );
        }
        Ok(pool)
    }

    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// The backing region's base address, for address-ordered indexing.
    #[must_use]
    pub(crate) fn base_addr(&self) -> usize {
        self.buffer as usize
    }

    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// True iff `ptr` lies in `[backing, backing + total_size)`.
    #[must_use]
    pub fn contains(&self, ptr: *mut u8) -> bool {
        let _guard = self.range_lock.read();
        let base = self.buffer as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.total_size
    }

    // SAFETY: callers must hold `structural` and `offset` must be a valid,
    // in-bounds header offset written by this pool.
    unsafe fn header_ptr(&self, offset: usize) -> *mut BlockHeader {
        self.buffer.add(offset).cast()
    }

    // SAFETY: see `header_ptr`; `header` must be a fully-initialized value.
    unsafe fn write_header(&self, offset: usize, header: &BlockHeader) {
        self.header_ptr(offset).write(BlockHeader {
            magic: header.magic,
            payload_size: header.payload_size,
            in_use: header.in_use,
            prev: header.prev,
            next: header.next,
        });
    }

    // SAFETY: see `header_ptr`.
    unsafe fn read_header(&self, offset: usize) -> BlockHeader {
        self.header_ptr(offset).read()
    }

    fn payload_ptr(&self, offset: usize) -> *mut u8 {
        // SAFETY: offset + header_stride() is within the backing region for
        // every offset this module produces.
        unsafe { self.buffer.add(offset + header_stride()) }
    }

    /// Converts a payload pointer back to its header's offset, verifying it
    /// falls within this pool's region and on a `MAX_ALIGN` boundary.
    fn offset_of(&self, ptr: *mut u8) -> Option<usize> {
        let stride = header_stride();
        let base = self.buffer as usize;
        let addr = ptr as usize;
        if addr < base + stride || addr >= base + self.total_size {
            return None;
        }
        Some(addr - base - stride)
    }

    fn check_magic(&self, header: &BlockHeader, file: &'static str, line: u32) {
        if header.magic != BLOCK_MAGIC {
            crate::error::log_event(
                ErrorCode::PoolCorruptionDetected,
                crate::error::Level::Fatal,
                file,
                line,
                "pool::check_magic",
                "block header magic mismatch; facility state is compromised",
            );
            std::process::abort();
        }
    }

    /// First-fit allocation with splitting. `size` must already be aligned.
    pub fn allocate(&self, size: usize) -> Result<*mut u8, ErrorCode> {
        let inner = self.structural.lock();
        let mut cur = inner.head;
        loop {
            if cur == NULL_OFFSET {
                return Err(ErrorCode::PoolAllocFailed);
            }
            // SAFETY: `cur` is either the initial head (0) or a value
            // previously written as a valid `next` link by this function.
            let mut header = unsafe { self.read_header(cur) };
            self.check_magic(&header, file!(), line!());

            if !header.in_use && header.payload_size >= size {
                let stride = header_stride();
                let remaining = header.payload_size - size;
                if remaining >= stride + MIN_SPLIT_PAYLOAD {
                    let new_offset = cur + stride + size;
                    let new_payload = remaining - stride;
                    let old_next = header.next;
                    // SAFETY: new_offset + stride + new_payload == cur +
                    // header.payload_size + stride, which is within bounds
                    // since `header` itself was in-bounds.
                    unsafe {
                        self.write_header(
                            new_offset,
                            &BlockHeader {
                                magic: BLOCK_MAGIC,
                                payload_size: new_payload,
                                in_use: false,
                                prev: cur,
                                next: old_next,
                            },
                        );
                        if old_next != NULL_OFFSET {
                            let mut next_header = self.read_header(old_next);
                            next_header.prev = new_offset;
                            self.write_header(old_next, &next_header);
                        }
                    }
                    header.payload_size = size;
                    header.next = new_offset;
                }
                header.in_use = true;
                // SAFETY: `cur` was already validated above.
                unsafe { self.write_header(cur, &header) };
                self.used_bytes
                    .fetch_add(stride + header.payload_size, Ordering::Relaxed);
                return Ok(self.payload_ptr(cur));
            }

            cur = header.next;
        }
    }

    /// Marks the block at `ptr` free and coalesces with adjacent free
    /// neighbors. Logs and returns without effect if `ptr` does not
    /// identify an in-use block of this pool.
    pub fn free(&self, ptr: *mut u8) -> Result<(), ErrorCode> {
        let Some(offset) = self.offset_of(ptr) else {
            return Err(ErrorCode::PoolInvalidFree);
        };
        let _inner = self.structural.lock();
        // SAFETY: offset was validated by `offset_of` against this pool's
        // region; every header-sized span in range was written by `new` or
        // `allocate`.
        let mut header = unsafe { self.read_header(offset) };
        self.check_magic(&header, file!(), line!());
        if !header.in_use {
            crate::error::log_event(
                ErrorCode::PoolInvalidFree,
                crate::error::Level::Error,
                file!(),
                line!(),
                "pool::free",
                "double free or free of a non-allocated block",
            );
            return Err(ErrorCode::PoolInvalidFree);
        }

        let stride = header_stride();
        self.used_bytes
            .fetch_sub(stride + header.payload_size, Ordering::Relaxed);
        header.in_use = false;
        // SAFETY: offset already validated above.
        unsafe { self.write_header(offset, &header) };

        let cur_offset = offset;
        let mut cur = header;

        // Coalesce forward.
        if cur.next != NULL_OFFSET {
            // SAFETY: `cur.next` is a link written by `allocate`/`new` and
            // is therefore a valid in-bounds offset.
            let next = unsafe { self.read_header(cur.next) };
            if !next.in_use {
                cur.payload_size += stride + next.payload_size;
                cur.next = next.next;
                // SAFETY: see above.
                unsafe {
                    if cur.next != NULL_OFFSET {
                        let mut after = self.read_header(cur.next);
                        after.prev = cur_offset;
                        self.write_header(cur.next, &after);
                    }
                    self.write_header(cur_offset, &cur);
                }
            }
        }

        // Coalesce backward.
        if cur.prev != NULL_OFFSET {
            // SAFETY: `cur.prev` is a link written by `allocate`/`new`.
            let mut prev = unsafe { self.read_header(cur.prev) };
            if !prev.in_use {
                prev.payload_size += stride + cur.payload_size;
                prev.next = cur.next;
                // SAFETY: see above.
                unsafe {
                    if prev.next != NULL_OFFSET {
                        let mut after = self.read_header(prev.next);
                        after.prev = cur.prev;
                        self.write_header(prev.next, &after);
                    }
                    self.write_header(cur.prev, &prev);
                }
            }
        }

        Ok(())
    }

    /// Returns the current payload size of the in-use block at `ptr`.
    pub fn payload_size(&self, ptr: *mut u8) -> Result<usize, ErrorCode> {
        let offset = self.offset_of(ptr).ok_or(ErrorCode::PoolInvalidFree)?;
        let _inner = self.structural.lock();
        // SAFETY: offset validated above.
        let header = unsafe { self.read_header(offset) };
        self.check_magic(&header, file!(), line!());
        if !header.in_use {
            return Err(ErrorCode::PoolInvalidFree);
        }
        Ok(header.payload_size)
    }

    /// Grows or leaves unchanged the block at `ptr` to hold `new_size`
    /// bytes, per spec.md §4.5's reallocation rule. Never shrinks.
    pub fn reallocate(&self, ptr: *mut u8, new_size: usize) -> Result<ReallocOutcome, ErrorCode> {
        let offset = self.offset_of(ptr).ok_or(ErrorCode::PoolInvalidFree)?;
        let mut _inner = self.structural.lock();
        // SAFETY: offset validated above.
        let mut header = unsafe { self.read_header(offset) };
        self.check_magic(&header, file!(), line!());
        if !header.in_use {
            crate::error::log_event(
                ErrorCode::PoolInvalidFree,
                crate::error::Level::Error,
                file!(),
                line!(),
                "pool::reallocate",
                "reallocation of a free block",
            );
            return Err(ErrorCode::PoolInvalidFree);
        }

        if new_size <= header.payload_size {
            return Ok(ReallocOutcome::Unchanged(ptr));
        }

        let old_payload = header.payload_size;
        let stride = header_stride();
        if header.next != NULL_OFFSET {
            // SAFETY: `header.next` is a valid link.
            let next = unsafe { self.read_header(header.next) };
            if !next.in_use && header.payload_size + stride + next.payload_size >= new_size {
                let combined_payload = header.payload_size + stride + next.payload_size;
                let old_next_next = next.next;
                let remaining = combined_payload - new_size;
                if remaining >= stride + MIN_SPLIT_PAYLOAD {
                    let split_offset = offset + stride + new_size;
                    let split_payload = remaining - stride;
                    // SAFETY: split_offset is within the merged span, which
                    // was validated as in-bounds when both headers were
                    // read.
                    unsafe {
                        self.write_header(
                            split_offset,
                            &BlockHeader {
                                magic: BLOCK_MAGIC,
                                payload_size: split_payload,
                                in_use: false,
                                prev: offset,
                                next: old_next_next,
                            },
                        );
                        if old_next_next != NULL_OFFSET {
                            let mut after = self.read_header(old_next_next);
                            after.prev = split_offset;
                            self.write_header(old_next_next, &after);
                        }
                    }
                    header.payload_size = new_size;
                    header.next = split_offset;
                } else {
                    header.payload_size = combined_payload;
                    header.next = old_next_next;
                    // SAFETY: old_next_next, if present, is a valid link.
                    unsafe {
                        if old_next_next != NULL_OFFSET {
                            let mut after = self.read_header(old_next_next);
                            after.prev = offset;
                            self.write_header(old_next_next, &after);
                        }
                    }
                }
                self.used_bytes
                    .fetch_add(header.payload_size - old_payload, Ordering::Relaxed);
                // SAFETY: offset already validated.
                unsafe { self.write_header(offset, &header) };
                return Ok(ReallocOutcome::Grown(ptr));
            }
        }

        Ok(ReallocOutcome::MustMove {
            old_payload_size: header.payload_size,
        })
    }

    /// Single pass coalescing every adjacent free pair. Idempotent.
    pub fn defragment(&self) {
        let inner = self.structural.lock();
        let stride = header_stride();
        let mut cur = inner.head;
        while cur != NULL_OFFSET {
            // SAFETY: `cur` is either the head or a previously-written link.
            let mut header = unsafe { self.read_header(cur) };
            self.check_magic(&header, file!(), line!());
            if header.in_use || header.next == NULL_OFFSET {
                cur = header.next;
                continue;
            }
            // SAFETY: header.next is a valid link.
            let next = unsafe { self.read_header(header.next) };
            if next.in_use {
                cur = header.next;
                continue;
            }
            header.payload_size += stride + next.payload_size;
            header.next = next.next;
            // SAFETY: see above.
            unsafe {
                if header.next != NULL_OFFSET {
                    let mut after = self.read_header(header.next);
                    after.prev = cur;
                    self.write_header(header.next, &after);
                }
                self.write_header(cur, &header);
            }
            // Stay at `cur` to absorb further consecutive free neighbors.
        }
    }

    /// Copies `len` payload bytes from `src` to `dst`. Used by the façade's
    /// realloc-by-move path.
    pub fn copy_payload(dst: *mut u8, src: *const u8, len: usize) {
        // SAFETY: callers pass payload pointers with non-overlapping
        // allocations and `len` bounded by the smaller payload's size.
        unsafe { std::ptr::copy_nonoverlapping(src, dst, len) };
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        // SAFETY: `self.buffer` was allocated with `self.layout` in `new`
        // and is never aliased or freed elsewhere.
        unsafe { alloc::dealloc(self.buffer, self.layout) };
    }
}
