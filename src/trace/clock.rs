//! Collaborator traits supplied by the embedding runtime.
//!
//! The tracer never reaches into the scheduler: the clock, the stack
//! unwinder, and the symbolizer are injected through
//! [`TracerBuilder`](crate::TracerBuilder).

/// Monotonic time source for the tracer.
///
/// `ticks` feeds event timestamps (divided by a per-architecture constant to
/// shrink varint deltas); `nanos` anchors the tick rate so the consumer can
/// convert ticks back to wall time.
pub trait Clock: Send + Sync {
    fn ticks(&self) -> u64;
    fn nanos(&self) -> u64;
}

/// Default clock backed by `clock_gettime(CLOCK_MONOTONIC)`. This is a vDSO
/// call on Linux, no actual syscall.
pub struct SystemClock;

fn clock_monotonic_ns() -> u64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid timespec on the stack. CLOCK_MONOTONIC is
    // always available on Linux and always succeeds.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64
}

impl Clock for SystemClock {
    fn ticks(&self) -> u64 {
        clock_monotonic_ns()
    }

    fn nanos(&self) -> u64 {
        clock_monotonic_ns()
    }
}

/// Stack unwinder for the current thread.
///
/// `unwind` fills `pcs` with program counters, outermost frame last, after
/// dropping the top `skip` frames, and returns the number written. Runtime
/// terminator frames (the scheduler's goroutine exit trampoline and the main
/// entry) may be included; the tracer trims the configured terminator PCs
/// from the tail before interning.
pub trait Unwinder: Send + Sync {
    fn unwind(&self, skip: usize, pcs: &mut [u64]) -> usize;
}

/// Unwinder that records no frames. Events declared as stack-bearing carry
/// stack id 0.
pub struct NullUnwinder;

impl Unwinder for NullUnwinder {
    fn unwind(&self, _skip: usize, _pcs: &mut [u64]) -> usize {
        0
    }
}

/// Resolved source position of one program counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub function: String,
    pub file: String,
    pub line: u64,
}

/// Maps program counters to source positions when the stack table is dumped
/// at stop.
pub trait Symbolizer: Send + Sync {
    fn symbolize(&self, pc: u64) -> FrameInfo;
}

/// Fallback symbolizer: the hex address stands in for the function name.
pub struct AddrSymbolizer;

impl Symbolizer for AddrSymbolizer {
    fn symbolize(&self, pc: u64) -> FrameInfo {
        FrameInfo {
            function: format!("{pc:#x}"),
            file: "?".to_string(),
            line: 0,
        }
    }
}
