//! Debug leak-tracking overlay, gated behind the `debug-leak-tracking`
//! feature. Mirrors the original `MEMORY_DEBUG` compile-time switch: every
//! tracked allocation records its pointer, size, and call site; freeing
//! removes the record; [`leak_check`] reports any that remain.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeakRecord {
    pub ptr: usize,
    pub size: usize,
    pub file: &'static str,
    pub line: u32,
}

static RECORDS: Mutex<Vec<LeakRecord>> = Mutex::new(Vec::new());

/// Records a tracked allocation. Called from the façade's `alloc`/`create`
/// paths when the feature is enabled.
pub fn track(ptr: *mut u8, size: usize, file: &'static str, line: u32) {
    RECORDS.lock().push(LeakRecord {
        ptr: ptr as usize,
        size,
        file,
        line,
    });
}

/// Removes the tracked record for `ptr`, if any.
pub fn untrack(ptr: *mut u8) {
    let mut records = RECORDS.lock();
    if let Some(i) = records.iter().position(|r| r.ptr == ptr as usize) {
        records.swap_remove(i);
    }
}

/// Returns every allocation still outstanding, in recording order.
#[must_use]
pub fn leak_check() -> Vec<LeakRecord> {
    RECORDS.lock().clone()
}

/// Drops all tracked records without reporting them. Called from
/// `cleanup()` so a fresh `init()` starts with an empty overlay.
pub fn reset() {
    RECORDS.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leak_check_reports_only_unfreed_allocations() {
        reset();
        let a = 0x1000 as *mut u8;
        let b = 0x2000 as *mut u8;
        let c = 0x3000 as *mut u8;
        track(a, 16, "t.rs", 1);
        track(b, 32, "t.rs", 2);
        track(c, 64, "t.rs", 3);
        untrack(a);
        untrack(c);
        let leaks = leak_check();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].ptr, b as usize);
        reset();
    }
}
