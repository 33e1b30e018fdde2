//! Stub pipeline stages. Every stage logs that it is unimplemented and
//! returns [`PipelineError::NotImplemented`] rather than a silent default,
//! so a caller can always distinguish a stub from a working stage.

use lingua_memory::error::{log_event, Level};
use lingua_memory::{Allocator, AllocatorConfig, ErrorCode};

use crate::token::{Token, TokenArena};
use crate::PipelineError;

pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<Token>, PipelineError>;
}

pub trait Classifier {
    fn classify(&self, tokens: &[Token]) -> Result<Vec<u32>, PipelineError>;
}

pub trait Translator {
    fn translate(&self, tokens: &[Token], classes: &[u32]) -> Result<Vec<Token>, PipelineError>;
}

pub trait Aligner {
    fn align(&self, source: &[Token], target: &[Token]) -> Result<Vec<(u32, u32)>, PipelineError>;
}

pub trait Renderer {
    fn render(&self, target: &[Token], alignment: &[(u32, u32)]) -> Result<String, PipelineError>;
}

macro_rules! stub_stage {
    ($name:ident, $trait:ident, $method:ident($($arg:ident: $ty:ty),*) -> $ret:ty) => {
        pub struct $name;

        impl $trait for $name {
            fn $method(&self, $($arg: $ty),*) -> Result<$ret, PipelineError> {
                let _ = ($(&$arg),*);
                log_event(
                    ErrorCode::Unknown,
                    Level::Info,
                    file!(),
                    line!(),
                    concat!(stringify!($name), "::", stringify!($method)),
                    concat!(stringify!($name), " is not implemented"),
                );
                Err(PipelineError::NotImplemented)
            }
        }
    };
}

stub_stage!(StubTokenizer, Tokenizer, tokenize(text: &str) -> Vec<Token>);
stub_stage!(StubClassifier, Classifier, classify(tokens: &[Token]) -> Vec<u32>);
stub_stage!(StubTranslator, Translator, translate(tokens: &[Token], classes: &[u32]) -> Vec<Token>);
stub_stage!(StubAligner, Aligner, align(source: &[Token], target: &[Token]) -> Vec<(u32, u32)>);
stub_stage!(StubRenderer, Renderer, render(target: &[Token], alignment: &[(u32, u32)]) -> String);

/// Wires the stub stages together against a private allocator instance.
/// Every stage is a guaranteed no-op past the first, so the return value is
/// always the first stage's error — what matters for this crate's purpose
/// is the allocation traffic `TokenArena` generates along the way, not the
/// pipeline's (nonexistent) output.
#[must_use]
pub fn run_stub_pipeline(text: &str) -> PipelineError {
    let allocator = match Allocator::new(AllocatorConfig::default()) {
        Ok(a) => a,
        Err(code) => return PipelineError::from(code),
    };
    let mut arena = TokenArena::new(&allocator);
    // A stub tokenizer produces nothing, but scratch records are still
    // carved out of the slab cache to give the allocator a realistic,
    // short-lived small-object workload to serve.
    for (i, _) in text.char_indices().take(8) {
        let _ = arena.push(Token {
            start: i as u32,
            end: i as u32 + 1,
            kind: 0,
        });
    }

    let tokenizer = StubTokenizer;
    match tokenizer.tokenize(text) {
        Ok(_) => unreachable!("StubTokenizer never succeeds"),
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_stub_pipeline_reports_not_implemented() {
        assert_eq!(run_stub_pipeline("hello world"), PipelineError::NotImplemented);
    }

    #[test]
    fn each_stub_stage_logs_and_returns_not_implemented() {
        assert_eq!(
            StubTokenizer.tokenize("x").unwrap_err(),
            PipelineError::NotImplemented
        );
        assert_eq!(
            StubClassifier.classify(&[]).unwrap_err(),
            PipelineError::NotImplemented
        );
        assert_eq!(
            StubTranslator.translate(&[], &[]).unwrap_err(),
            PipelineError::NotImplemented
        );
        assert_eq!(
            StubAligner.align(&[], &[]).unwrap_err(),
            PipelineError::NotImplemented
        );
        assert_eq!(
            StubRenderer.render(&[], &[]).unwrap_err(),
            PipelineError::NotImplemented
        );
    }
}
