//! Error context facility.
//!
//! A per-thread last-error record, a bounded ring buffer of recent errors,
//! and a pluggable sink, modeled on the structured lifecycle logging the
//! allocator itself used to keep internally (decision ids, severity levels,
//! a drainable record list) before this port split logging out into its own
//! component.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use thiserror::Error;

/// Ring buffer capacity for recent errors.
const HISTORY_CAPACITY: usize = 100;

/// Severity levels, ordered `Debug < Info < Warning < Error < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        };
        f.write_str(s)
    }
}

/// Semantic error kinds surfaced at the public boundary.
///
/// Numeric discriminants are assigned from a documented base so a logged
/// `code=N` is stable across builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i32)]
pub enum ErrorCode {
    #[error("success")]
    Success = 0,
    #[error("null pointer")]
    NullPointer = 1,
    #[error("invalid argument")]
    InvalidArgument = 2,
    #[error("memory allocation failed")]
    MemoryAllocation = 3,
    #[error("file i/o error")]
    FileIo = 4,
    #[error("network error")]
    Network = 5,
    #[error("failed to acquire lock")]
    ThreadLock = 6,
    #[error("failed to release lock")]
    ThreadUnlock = 7,
    #[error("failed to initialize thread primitive")]
    ThreadInit = 8,
    #[error("pool initialization failed")]
    PoolInitFailed = 9,
    #[error("pool allocation failed")]
    PoolAllocFailed = 10,
    #[error("invalid free")]
    PoolInvalidFree = 11,
    #[error("pool registry full")]
    PoolFull = 12,
    #[error("invalid pool handle")]
    PoolInvalidPool = 13,
    #[error("pool corruption detected")]
    PoolCorruptionDetected = 14,
    #[error("unknown error")]
    Unknown = 15,
}

impl ErrorCode {
    /// The numeric code, matching spec.md §6's "documented base" phrasing.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// The call-site and payload of one logged error event.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: ErrorCode,
    pub level: Level,
    pub file: &'static str,
    pub line: u32,
    pub function: &'static str,
    pub message: String,
    /// Milliseconds since the Unix epoch, best-effort.
    pub timestamp_ms: u128,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] [{}:{}] {}: (code={}) {}",
            self.timestamp_ms,
            self.level,
            self.file,
            self.line,
            self.function,
            self.code.code(),
            self.message
        )
    }
}

/// A sink callback invoked for every logged event, in place of the default
/// file sink.
pub type Sink = Box<dyn Fn(&ErrorContext) + Send + Sync>;

struct FacilityState {
    sink: Option<Sink>,
    min_level: Level,
    history: VecDeque<ErrorContext>,
}

impl FacilityState {
    fn new() -> Self {
        Self {
            sink: None,
            min_level: Level::Debug,
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }
}

static FACILITY: OnceLock<Mutex<FacilityState>> = OnceLock::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<ErrorContext>> = const { RefCell::new(None) };
}

fn facility() -> &'static Mutex<FacilityState> {
    FACILITY.get_or_init(|| Mutex::new(FacilityState::new()))
}

/// Resets the facility to its initial state. Idempotent; safe to call
/// outside an `init`/`cleanup` window.
pub fn init() {
    let mut state = facility().lock();
    *state = FacilityState::new();
}

/// Tears down the facility's sink and history. Per-thread last-error storage
/// is left alone since it is thread-local, not process-global, state.
pub fn cleanup() {
    let mut state = facility().lock();
    state.sink = None;
    state.history.clear();
}

/// Installs a sink callback, replacing any previous one.
pub fn set_sink(sink: Sink) {
    facility().lock().sink = Some(sink);
}

/// Removes any installed sink, reverting to the default file sink.
pub fn clear_sink() {
    facility().lock().sink = None;
}

/// Suppresses events below `level`.
pub fn set_min_level(level: Level) {
    facility().lock().min_level = level;
}

/// Default sink: append one line to `error.log` in the working directory.
/// Failures are reported to stderr and silently dropped, per spec.md §7.
fn default_sink(ctx: &ErrorContext) {
    let result = OpenOptions::new()
        .create(true)
        .append(true)
        .open("error.log")
        .and_then(|mut f| writeln!(f, "{ctx}"));
    if let Err(e) = result {
        eprintln!("lingua-memory: error facility: could not write error.log: {e}");
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Builds an [`ErrorContext`], records it as the calling thread's last error,
/// appends it to the ring buffer (evicting the oldest on overflow), and
/// invokes the sink (or the default file sink if none is installed).
///
/// Events below the facility's minimum level are dropped entirely — they are
/// not recorded as the last error and do not reach the ring buffer or sink.
#[allow(clippy::too_many_arguments)]
pub fn log_event(
    code: ErrorCode,
    level: Level,
    file: &'static str,
    line: u32,
    function: &'static str,
    message: impl Into<String>,
) {
    let ctx = ErrorContext {
        code,
        level,
        file,
        line,
        function,
        message: message.into(),
        timestamp_ms: now_ms(),
    };

    {
        let mut state = facility().lock();
        if level < state.min_level {
            return;
        }
        if state.history.len() == HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(ctx.clone());
    }

    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(ctx.clone()));

    let sink_is_set = {
        let state = facility().lock();
        if let Some(sink) = &state.sink {
            sink(&ctx);
            true
        } else {
            false
        }
    };
    if !sink_is_set {
        default_sink(&ctx);
    }
}

/// Logs at [`Level::Debug`]. Convenience wrapper over [`log_event`].
pub fn log_debug(code: ErrorCode, file: &'static str, line: u32, function: &'static str, message: impl Into<String>) {
    log_event(code, Level::Debug, file, line, function, message);
}

/// Logs at [`Level::Info`]. Convenience wrapper over [`log_event`].
pub fn log_info(code: ErrorCode, file: &'static str, line: u32, function: &'static str, message: impl Into<String>) {
    log_event(code, Level::Info, file, line, function, message);
}

/// Logs at [`Level::Warning`]. Convenience wrapper over [`log_event`].
pub fn log_warning(code: ErrorCode, file: &'static str, line: u32, function: &'static str, message: impl Into<String>) {
    log_event(code, Level::Warning, file, line, function, message);
}

/// Logs at [`Level::Error`]. Convenience wrapper over [`log_event`].
pub fn log_error(code: ErrorCode, file: &'static str, line: u32, function: &'static str, message: impl Into<String>) {
    log_event(code, Level::Error, file, line, function, message);
}

/// Logs at [`Level::Fatal`]. Convenience wrapper over [`log_event`].
pub fn log_fatal(code: ErrorCode, file: &'static str, line: u32, function: &'static str, message: impl Into<String>) {
    log_event(code, Level::Fatal, file, line, function, message);
}

/// Returns the calling thread's last logged error, if any.
#[must_use]
pub fn get_last() -> Option<ErrorContext> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Clears the calling thread's last error.
pub fn clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Returns a snapshot of the ring buffer, oldest first. Exposed for tests
/// and for callers that want more than the last-error slot.
#[must_use]
pub fn history_snapshot() -> Vec<ErrorContext> {
    facility().lock().history.iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // The facility is process-wide singleton state; serialize tests that
    // touch it so they don't observe each other's sink/level changes.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    fn here(code: ErrorCode, level: Level, msg: &str) {
        log_event(code, level, file!(), line!(), "here", msg.to_string());
    }

    #[test]
    fn last_error_round_trips() {
        let _guard = TEST_GUARD.lock();
        init();
        clear();
        here(ErrorCode::PoolFull, Level::Error, "registry full");
        let last = get_last().expect("last error set");
        assert_eq!(last.code, ErrorCode::PoolFull);
        assert_eq!(last.message, "registry full");
        clear();
        assert!(get_last().is_none());
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let _guard = TEST_GUARD.lock();
        init();
        for i in 0..(HISTORY_CAPACITY + 10) {
            here(ErrorCode::Unknown, Level::Info, &format!("event {i}"));
        }
        let history = history_snapshot();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.first().unwrap().message, "event 10");
        assert_eq!(
            history.last().unwrap().message,
            format!("event {}", HISTORY_CAPACITY + 9)
        );
    }

    #[test]
    fn min_level_suppresses_events() {
        let _guard = TEST_GUARD.lock();
        init();
        set_min_level(Level::Error);
        clear();
        here(ErrorCode::Unknown, Level::Info, "should be suppressed");
        assert!(get_last().is_none());
        here(ErrorCode::Unknown, Level::Fatal, "should pass");
        assert!(get_last().is_some());
        set_min_level(Level::Debug);
    }

    #[test]
    fn sink_is_invoked_instead_of_default() {
        let _guard = TEST_GUARD.lock();
        init();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        set_sink(Box::new(move |_ctx| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        here(ErrorCode::PoolAllocFailed, Level::Warning, "sunk");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        clear_sink();
    }

    #[test]
    fn error_code_numeric_values_are_stable() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::PoolCorruptionDetected.code(), 14);
        assert_eq!(ErrorCode::Unknown.code(), 15);
    }
}
