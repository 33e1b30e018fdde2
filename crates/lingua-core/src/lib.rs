//! Thin, honestly-stubbed consumers of `lingua_memory`. Nothing in this
//! crate tokenizes, classifies, translates, aligns, or renders anything —
//! it exists to give the allocator real call sites.

pub mod pipeline;
pub mod token;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("stage is not implemented")]
    NotImplemented,
    #[error("allocator error: {0:?}")]
    Allocator(lingua_memory::ErrorCode),
}

impl From<lingua_memory::ErrorCode> for PipelineError {
    fn from(code: lingua_memory::ErrorCode) -> Self {
        PipelineError::Allocator(code)
    }
}
