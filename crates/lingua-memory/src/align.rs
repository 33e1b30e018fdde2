//! Alignment primitives.
//!
//! Every allocation request is normalized through [`align_up`] before it
//! reaches the slab cache or a pool. Callers are responsible for passing a
//! power-of-two alignment; debug builds assert it.

/// Platform maximum fundamental alignment.
pub const MAX_ALIGN: usize = 16;

/// Alignment applied to every allocation request before routing.
pub const MEMORY_ALIGNMENT: usize = MAX_ALIGN;

/// Rounds `n` up to the nearest multiple of `a`.
///
/// `a` must be a power of two; checked with a debug assertion only, mirroring
/// the "caller ensures" contract in the original design.
#[must_use]
pub const fn align_up(n: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    (n + a - 1) & !(a - 1)
}

/// Rounds `n` down to the nearest multiple of `a`.
#[must_use]
pub const fn align_down(n: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    n & !(a - 1)
}

/// Rounds `n` up to [`MAX_ALIGN`]. Equivalent to the original `ALIGNED_SIZE`.
#[must_use]
pub const fn aligned_size(n: usize) -> usize {
    align_up(n, MAX_ALIGN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_exact_multiple() {
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(32, 16), 32);
    }

    #[test]
    fn align_up_rounds() {
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_up(0, 16), 0);
    }

    #[test]
    fn align_down_rounds() {
        assert_eq!(align_down(17, 16), 16);
        assert_eq!(align_down(31, 16), 16);
        assert_eq!(align_down(32, 16), 32);
    }

    #[test]
    fn aligned_size_matches_memory_alignment() {
        assert_eq!(aligned_size(1), MEMORY_ALIGNMENT);
        assert_eq!(aligned_size(100), 112);
    }

    #[test]
    fn pointer_returned_by_align_up_is_multiple_of_alignment() {
        for n in 0..256usize {
            let aligned = align_up(n, MAX_ALIGN);
            assert_eq!(aligned % MAX_ALIGN, 0);
            assert!(aligned >= n);
        }
    }
}
