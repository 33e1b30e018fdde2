//! Fixed-size token records carved out of the slab cache's 32-byte class.

use lingua_memory::{Allocator, ErrorCode};

/// A placeholder lexical unit. Large enough to land in the slab cache's
/// 32-byte class once padded, small enough that real tokenizer output
/// (a span + a tag) would plausibly look like this.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub start: u32,
    pub end: u32,
    pub kind: u32,
}

/// Owns token records allocated from an [`Allocator`]'s slab path.
pub struct TokenArena<'a> {
    allocator: &'a Allocator,
    live: Vec<*mut u8>,
}

impl<'a> TokenArena<'a> {
    #[must_use]
    pub fn new(allocator: &'a Allocator) -> Self {
        Self {
            allocator,
            live: Vec::new(),
        }
    }

    /// Allocates one token record and writes `token` into it.
    pub fn push(&mut self, token: Token) -> Result<(), ErrorCode> {
        let ptr = self.allocator.alloc(std::mem::size_of::<Token>())?;
        // SAFETY: `ptr` was just allocated with at least `size_of::<Token>()`
        // bytes and 16-byte alignment, which exceeds `Token`'s alignment.
        unsafe { ptr.cast::<Token>().write(token) };
        self.live.push(ptr);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl Drop for TokenArena<'_> {
    fn drop(&mut self) {
        for ptr in self.live.drain(..) {
            let _ = self.allocator.free(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingua_memory::AllocatorConfig;

    #[test]
    fn pushed_tokens_round_trip_through_the_slab_cache() {
        let allocator = Allocator::new(AllocatorConfig::default()).unwrap();
        let mut arena = TokenArena::new(&allocator);
        for i in 0..5u32 {
            arena
                .push(Token {
                    start: i,
                    end: i + 1,
                    kind: 0,
                })
                .unwrap();
        }
        assert_eq!(arena.len(), 5);
    }
}
