//! Stack interning: maps program-counter sequences to dense 32-bit ids.
//!
//! Lookup is lock-free. Bucket heads are atomic pointers; records are
//! written fully before a release store publishes them and are immutable
//! afterwards, so readers may race with inserters. Insertion itself is
//! serialized by one mutex with a double-checked re-probe.
//!
//! Records live in a region allocator ([`Arena`]) so a variable number of
//! PCs can trail the fixed header without a per-stack heap allocation.

use std::hash::{DefaultHasher, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::trace::arena::Arena;

const BUCKETS: usize = 1 << 13;

#[repr(C)]
struct StackRecord {
    next: *mut StackRecord,
    hash: u64,
    id: u32,
    n: u32,
    // `n` PCs follow the header in the same arena allocation.
}

impl StackRecord {
    /// SAFETY: caller must ensure the record was fully initialized with `n`
    /// trailing PCs and that the backing arena is still live.
    unsafe fn pcs(&self) -> &[u64] {
        unsafe {
            let base = (self as *const StackRecord).add(1) as *const u64;
            std::slice::from_raw_parts(base, self.n as usize)
        }
    }
}

struct Inner {
    seq: u32,
    arena: Arena,
}

pub(crate) struct StackTable {
    buckets: Box<[AtomicPtr<StackRecord>]>,
    inner: Mutex<Inner>,
}

fn hash_pcs(pcs: &[u64]) -> u64 {
    let mut h = DefaultHasher::new();
    for &pc in pcs {
        h.write_u64(pc);
    }
    h.finish()
}

impl StackTable {
    pub(crate) fn new() -> StackTable {
        let mut buckets = Vec::with_capacity(BUCKETS);
        buckets.resize_with(BUCKETS, || AtomicPtr::new(std::ptr::null_mut()));
        StackTable {
            buckets: buckets.into_boxed_slice(),
            inner: Mutex::new(Inner {
                seq: 0,
                arena: Arena::new(),
            }),
        }
    }

    /// Return the id for `pcs`, interning it on first sight. The empty
    /// sequence is id 0.
    pub(crate) fn put(&self, pcs: &[u64]) -> u32 {
        if pcs.is_empty() {
            return 0;
        }
        let hash = hash_pcs(pcs);
        let id = self.find(pcs, hash);
        if id != 0 {
            return id;
        }
        let mut inner = self.inner.lock().unwrap();
        // Re-probe under the lock: another thread may have inserted the same
        // stack between our lookup and the acquisition.
        let id = self.find(pcs, hash);
        if id != 0 {
            return id;
        }
        inner.seq += 1;
        let id = inner.seq;
        let size = std::mem::size_of::<StackRecord>() + pcs.len() * 8;
        let rec = inner.arena.alloc(size) as *mut StackRecord;
        let bucket = &self.buckets[hash as usize & (BUCKETS - 1)];
        // SAFETY: `rec` is a fresh, 8-aligned arena allocation large enough
        // for the header plus `pcs.len()` PCs. It becomes reachable only via
        // the release store below, after which it is never written again.
        unsafe {
            rec.write(StackRecord {
                next: bucket.load(Ordering::Relaxed),
                hash,
                id,
                n: pcs.len() as u32,
            });
            let tail = rec.add(1) as *mut u64;
            std::ptr::copy_nonoverlapping(pcs.as_ptr(), tail, pcs.len());
        }
        bucket.store(rec, Ordering::Release);
        id
    }

    fn find(&self, pcs: &[u64], hash: u64) -> u32 {
        let mut p = self.buckets[hash as usize & (BUCKETS - 1)].load(Ordering::Acquire);
        while !p.is_null() {
            // SAFETY: records reachable from a bucket head are fully
            // initialized (published with release ordering) and stay live
            // until `reset`, which requires all emitters to be quiescent.
            let rec = unsafe { &*p };
            if rec.hash == hash && rec.n as usize == pcs.len() && unsafe { rec.pcs() } == pcs {
                return rec.id;
            }
            p = rec.next;
        }
        0
    }

    /// Visit every interned stack. Holds the insertion lock for the duration,
    /// so the callback must not call [`StackTable::put`].
    pub(crate) fn for_each(&self, mut f: impl FnMut(u32, &[u64])) {
        let _inner = self.inner.lock().unwrap();
        for bucket in self.buckets.iter() {
            let mut p = bucket.load(Ordering::Acquire);
            while !p.is_null() {
                // SAFETY: as in `find`.
                let rec = unsafe { &*p };
                f(rec.id, unsafe { rec.pcs() });
                p = rec.next;
            }
        }
    }

    /// Drop every record and the backing memory. Callers must guarantee no
    /// concurrent `put` or `find`; the tracer only resets after tracing is
    /// disabled and all producers have drained.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        for bucket in self.buckets.iter() {
            bucket.store(std::ptr::null_mut(), Ordering::Relaxed);
        }
        inner.arena.reset();
        inner.seq = 0;
    }
}
