//! Execution tracer core.
//!
//! Worker threads emit events through the typed hook methods on
//! [`Tracer`]; each
//! event is varint-encoded into the calling processor's buffer (or a
//! mutex-guarded global buffer when the thread has no processor). Full
//! buffers queue up for a single reader, which interleaves the stream
//! header, buffer payloads, the tick-frequency footer, and the stack/string
//! dictionary dump.

pub(crate) mod arena;
pub(crate) mod buffer;
pub mod clock;
pub mod decode;
mod encoder;
pub mod events;
mod hooks;
mod lifecycle;
mod reader;
pub(crate) mod sample;
pub(crate) mod stack_table;
pub(crate) mod strings;
pub mod varint;
pub mod world;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use arc_swap::ArcSwapOption;

use crate::trace::buffer::{BufQueues, TraceBuf};
use crate::trace::clock::{AddrSymbolizer, Clock, NullUnwinder, Symbolizer, SystemClock, Unwinder};
use crate::trace::sample::{ProfRing, SampleSink};
use crate::trace::stack_table::StackTable;
use crate::trace::strings::StringTable;

pub use lifecycle::StartError;

/// Fixed 16-byte stream header.
pub const STREAM_HEADER: &[u8; 16] = b"go 1.19 trace\x00\x00\x00";

/// Raw ticks are divided by this before encoding so deltas fit in fewer
/// varint bytes. 64 on x86, where one raw tick is ~0.3ns; 16 elsewhere.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub const TICK_DIV: u64 = 64;
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub const TICK_DIV: u64 = 16;

/// Maximum number of PCs kept from a single stack capture.
pub const MAX_STACK: usize = 128;

/// Worst-case encoded size of a u64, used in room reservations.
pub(crate) const BYTES_PER_NUMBER: usize = varint::MAX_VARINT_BYTES;

const DEFAULT_BUF_BYTES: usize = 64 << 10;
const MIN_BUF_BYTES: usize = 128;
const DEFAULT_RING_WORDS: usize = 1 << 14;

/// The tracer. One instance per runtime; shared via `Arc` between the
/// runtime's worker threads, the signal handler, and the reader thread.
pub struct Tracer {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) unwinder: Arc<dyn Unwinder>,
    pub(crate) symbolizer: Arc<dyn Symbolizer>,
    pub(crate) buf_bytes: usize,
    pub(crate) ring_words: usize,
    pub(crate) terminator_pcs: Vec<u64>,

    pub(crate) enabled: AtomicBool,
    pub(crate) shutdown: AtomicBool,
    /// Set while `start` runs so its own synthetic events pass the enabled
    /// recheck before `enabled` flips on.
    pub(crate) starting: AtomicBool,

    pub(crate) queues: Mutex<BufQueues>,
    pub(crate) wake: Condvar,
    /// Fallback buffer for threads with no processor bound; rare, so a mutex
    /// is fine here.
    pub(crate) global_buf: Mutex<Option<Box<TraceBuf>>>,

    pub(crate) sink: Mutex<SampleSink>,
    /// Write side of the sample ring, published atomically so the signal
    /// handler observes a fully initialized ring or none at all.
    pub(crate) ring_write: ArcSwapOption<ProfRing>,
    pub(crate) signal_lock: AtomicU32,

    pub(crate) stack_tab: StackTable,
    pub(crate) strings: StringTable,
    pub(crate) seq_gc: AtomicU64,
    pub(crate) mark_worker_labels: [AtomicU64; 4],

    pub(crate) ticks_start: AtomicU64,
    pub(crate) ticks_end: AtomicU64,
    pub(crate) nanos_start: AtomicU64,
    pub(crate) nanos_end: AtomicU64,

    /// Stop blocks here until the reader has drained everything.
    pub(crate) reader_done: Mutex<bool>,
    pub(crate) reader_done_cv: Condvar,
}

impl Tracer {
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Configures and builds a [`Tracer`].
pub struct TracerBuilder {
    clock: Arc<dyn Clock>,
    unwinder: Arc<dyn Unwinder>,
    symbolizer: Arc<dyn Symbolizer>,
    buffer_bytes: usize,
    ring_words: usize,
    terminator_pcs: Vec<u64>,
}

impl Default for TracerBuilder {
    fn default() -> Self {
        TracerBuilder {
            clock: Arc::new(SystemClock),
            unwinder: Arc::new(NullUnwinder),
            symbolizer: Arc::new(AddrSymbolizer),
            buffer_bytes: DEFAULT_BUF_BYTES,
            ring_words: DEFAULT_RING_WORDS,
            terminator_pcs: Vec::new(),
        }
    }
}

impl TracerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn unwinder(mut self, unwinder: Arc<dyn Unwinder>) -> Self {
        self.unwinder = unwinder;
        self
    }

    pub fn symbolizer(mut self, symbolizer: Arc<dyn Symbolizer>) -> Self {
        self.symbolizer = symbolizer;
        self
    }

    /// Capacity of each trace buffer. Smaller buffers rotate more often;
    /// mainly useful for tests.
    pub fn buffer_bytes(mut self, bytes: usize) -> Self {
        self.buffer_bytes = bytes.max(MIN_BUF_BYTES);
        self
    }

    /// Capacity of the CPU-sample ring, in u64 words.
    pub fn ring_words(mut self, words: usize) -> Self {
        self.ring_words = words;
        self
    }

    /// PCs of runtime terminator frames (goroutine exit trampoline, main
    /// entry) to trim from the tail of captured stacks.
    pub fn terminator_pcs(mut self, pcs: Vec<u64>) -> Self {
        self.terminator_pcs = pcs;
        self
    }

    pub fn build(self) -> Tracer {
        Tracer {
            clock: self.clock,
            unwinder: self.unwinder,
            symbolizer: self.symbolizer,
            buf_bytes: self.buffer_bytes,
            ring_words: self.ring_words,
            terminator_pcs: self.terminator_pcs,
            enabled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            starting: AtomicBool::new(false),
            queues: Mutex::new(BufQueues::default()),
            wake: Condvar::new(),
            global_buf: Mutex::new(None),
            sink: Mutex::new(SampleSink::default()),
            ring_write: ArcSwapOption::const_empty(),
            signal_lock: AtomicU32::new(0),
            stack_tab: StackTable::new(),
            strings: StringTable::new(),
            seq_gc: AtomicU64::new(0),
            mark_worker_labels: std::array::from_fn(|_| AtomicU64::new(0)),
            ticks_start: AtomicU64::new(0),
            ticks_end: AtomicU64::new(0),
            nanos_start: AtomicU64::new(0),
            nanos_end: AtomicU64::new(0),
            reader_done: Mutex::new(false),
            reader_done_cv: Condvar::new(),
        }
    }
}
