//! Runtime-facing state.
//!
//! The original tracer reached the current processor and goroutine through
//! the scheduler's thread-local binding; here the runtime passes them in
//! explicitly. A [`Processor`] owns its trace buffer, so the emit fast path
//! touches only state the calling worker thread already owns exclusively.

use crate::trace::buffer::TraceBuf;

/// Processor id written into `Batch` events emitted without a processor.
pub(crate) const GLOBAL_PROC: i32 = -1;

/// `last_proc` value of a goroutine that has not run since tracing started.
pub(crate) const NO_PROC: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoStatus {
    Runnable,
    Running,
    Waiting,
    Syscall,
    Dead,
}

/// What kind of GC mark worker a processor is currently running, if any.
/// Selects the label attached to `GoStartLabel` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkWorkerMode {
    NotWorker = 0,
    Dedicated = 1,
    Fractional = 2,
    Idle = 3,
}

pub(crate) const MARK_WORKER_LABELS: [&str; 4] =
    ["Not worker", "GC (dedicated)", "GC (fractional)", "GC (idle)"];

/// A logical execution slot. One worker thread is bound to a processor at a
/// time; the bound thread owns the processor's trace buffer.
pub struct Processor {
    pub id: i32,
    pub mark_worker: MarkWorkerMode,
    pub(crate) buf: Option<Box<TraceBuf>>,
    pub(crate) sweep_active: bool,
    pub(crate) swept: u64,
    pub(crate) reclaimed: u64,
}

impl Processor {
    pub fn new(id: i32) -> Processor {
        Processor {
            id,
            mark_worker: MarkWorkerMode::NotWorker,
            buf: None,
            sweep_active: false,
            swept: 0,
            reclaimed: 0,
        }
    }
}

/// Trace-visible state of one goroutine. `seq` orders this goroutine's
/// start/unblock/syscall-exit events across processors; `last_proc` enables
/// the compact `*Local` encodings when consecutive events land on the same
/// processor.
pub struct Goroutine {
    pub id: u64,
    pub start_pc: u64,
    pub status: GoStatus,
    pub(crate) seq: u64,
    pub(crate) last_proc: i32,
}

impl Goroutine {
    pub fn new(id: u64, start_pc: u64, status: GoStatus) -> Goroutine {
        Goroutine {
            id,
            start_pc,
            status,
            seq: 0,
            last_proc: NO_PROC,
        }
    }
}

/// Exclusive view of the runtime taken under global quiescence.
///
/// [`Tracer::start`](crate::Tracer::start) and
/// [`Tracer::stop`](crate::Tracer::stop) require that no mutator thread is
/// executing; handing the tracer `&mut` access to every processor and
/// goroutine is how the embedding runtime vouches for that.
pub struct World<'a> {
    pub procs: &'a mut [Processor],
    pub goroutines: &'a mut [Goroutine],
    /// Index into `procs` of the processor bound to the calling thread.
    pub current_proc: usize,
    /// Index into `goroutines` of the goroutine driving start/stop.
    pub current_go: usize,
    /// OS thread id of the calling thread, recorded in `ProcStart`.
    pub current_thread: u64,
}
