//! Out-of-band transport for CPU-profile samples.
//!
//! The signal handler deposits samples into a bounded ring of u64 words; the
//! trace reader drains them and converts each into a `CPUSample` event. The
//! writer side is reached through an atomically swapped pointer and
//! serialized by a test-and-set spin lock, never a mutex.
//!
//! Record layout: `[len, timestamp, hdr0, hdr1, pcs...]` where `len` is the
//! total word count. `hdr0` is `(processor_id << 1) | 1`, or `0b10` when no
//! processor was bound, so a real header is never all zeros. A record whose
//! header words are both zero is an overflow marker; its single trailing
//! word is the number of samples dropped while the ring was full.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use smallvec::SmallVec;

use crate::trace::MAX_STACK;
use crate::trace::buffer::TraceBuf;

const HDR_WORDS: usize = 4;
const OVERFLOW_WORDS: usize = HDR_WORDS + 1;

pub(crate) struct ProfRing {
    slots: Box<[AtomicU64]>,
    /// Absolute write position in words; slot index is `pos & (len - 1)`.
    write: AtomicUsize,
    read: AtomicUsize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

pub(crate) struct SampleRecord {
    pub(crate) timestamp: u64,
    pub(crate) hdr: [u64; 2],
    pub(crate) stk: SmallVec<[u64; 32]>,
}

impl SampleRecord {
    pub(crate) fn is_overflow(&self) -> bool {
        self.hdr == [0, 0] && self.stk.len() == 1
    }
}

impl ProfRing {
    pub(crate) fn new(words: usize) -> Arc<ProfRing> {
        let words = words.next_power_of_two().max(64);
        let mut slots = Vec::with_capacity(words);
        slots.resize_with(words, || AtomicU64::new(0));
        Arc::new(ProfRing {
            slots: slots.into_boxed_slice(),
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn put(&self, pos: usize, words: &[u64]) {
        let mask = self.slots.len() - 1;
        for (i, &w) in words.iter().enumerate() {
            self.slots[(pos + i) & mask].store(w, Ordering::Relaxed);
        }
    }

    /// Append one sample. Caller holds the signal lock, so there is exactly
    /// one writer. Samples that do not fit are counted and surface later as
    /// an overflow record.
    pub(crate) fn write(&self, now: u64, hdr: [u64; 2], stk: &[u64]) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        let cap = self.slots.len();
        let mut w = self.write.load(Ordering::Relaxed);
        let r = self.read.load(Ordering::Acquire);
        let mut free = cap - (w - r);

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 && free >= OVERFLOW_WORDS {
            self.put(w, &[OVERFLOW_WORDS as u64, now, 0, 0, dropped]);
            w += OVERFLOW_WORDS;
            free -= OVERFLOW_WORDS;
            self.dropped.store(0, Ordering::Relaxed);
        }

        let nstk = stk.len().min(MAX_STACK);
        let need = HDR_WORDS + nstk;
        if free < need {
            self.dropped.store(self.dropped.load(Ordering::Relaxed) + 1, Ordering::Relaxed);
            self.write.store(w, Ordering::Release);
            return;
        }
        self.put(w, &[need as u64, now, hdr[0], hdr[1]]);
        self.put(w + HDR_WORDS, &stk[..nstk]);
        self.write.store(w + need, Ordering::Release);
    }

    /// Pop one record. Single consumer; serialized by the tracer's sample
    /// sink lock.
    pub(crate) fn read_record(&self) -> Option<SampleRecord> {
        let r = self.read.load(Ordering::Relaxed);
        let w = self.write.load(Ordering::Acquire);
        if r == w {
            return None;
        }
        let mask = self.slots.len() - 1;
        let len = self.slots[r & mask].load(Ordering::Relaxed) as usize;
        if len < HDR_WORDS || len > w - r {
            // Truncated or corrupt record; nothing sane can follow it.
            self.read.store(w, Ordering::Release);
            return None;
        }
        let timestamp = self.slots[(r + 1) & mask].load(Ordering::Relaxed);
        let hdr = [
            self.slots[(r + 2) & mask].load(Ordering::Relaxed),
            self.slots[(r + 3) & mask].load(Ordering::Relaxed),
        ];
        let mut stk = SmallVec::new();
        for i in HDR_WORDS..len {
            stk.push(self.slots[(r + i) & mask].load(Ordering::Relaxed));
        }
        self.read.store(r + len, Ordering::Release);
        Some(SampleRecord {
            timestamp,
            hdr,
            stk,
        })
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Reader-side state for the sample path: the read half of the ring and the
/// staging buffer CPU-sample events are encoded into.
#[derive(Default)]
pub(crate) struct SampleSink {
    pub(crate) ring: Option<Arc<ProfRing>>,
    pub(crate) buf: Option<Box<TraceBuf>>,
}
