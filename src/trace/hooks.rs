//! Typed entry points called from the runtime's hot paths.
//!
//! Each wrapper encodes one event kind. The caller passes its current
//! processor binding explicitly; `None` routes the event through the global
//! buffer. Hooks that concern another processor (`proc_stop`,
//! `go_sys_block`) write into that processor's buffer: the system monitor
//! stops processors belonging to other threads, and the event must land in
//! the victim's batch.

use std::sync::atomic::Ordering;

use crate::trace::encoder::StackRef;
use crate::trace::events::{EventKind, FUTILE_WAKEUP};
use crate::trace::world::{GLOBAL_PROC, Goroutine, MarkWorkerMode, Processor};
use crate::trace::{TICK_DIV, Tracer};

impl Tracer {
    pub fn gomaxprocs(&self, p: Option<&mut Processor>, procs: u64) {
        self.event(p, EventKind::Gomaxprocs, StackRef::Capture(1), &[procs]);
    }

    pub fn proc_start(&self, p: &mut Processor, thread_id: u64) {
        self.event(Some(p), EventKind::ProcStart, StackRef::None, &[thread_id]);
    }

    pub fn proc_stop(&self, p: &mut Processor) {
        self.event(Some(p), EventKind::ProcStop, StackRef::None, &[]);
    }

    /// Release a destroyed processor's buffer to the reader.
    pub fn proc_free(&self, p: &mut Processor) {
        if let Some(buf) = p.buf.take() {
            let mut q = self.queues.lock().unwrap();
            q.full.push_back(buf);
            if q.reader_parked {
                self.wake.notify_one();
            }
        }
    }

    pub fn gc_start(&self, p: Option<&mut Processor>) {
        let seq = self.seq_gc.fetch_add(1, Ordering::Relaxed);
        self.event(p, EventKind::GCStart, StackRef::Capture(3), &[seq]);
    }

    pub fn gc_done(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GCDone, StackRef::None, &[]);
    }

    pub fn gc_stw_start(&self, p: Option<&mut Processor>, kind: u64) {
        self.event(p, EventKind::GCSTWStart, StackRef::None, &[kind]);
    }

    pub fn gc_stw_done(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GCSTWDone, StackRef::None, &[]);
    }

    /// Open a sweep bracket on `p`. No event is emitted until the first
    /// swept span, so empty sweeps stay out of the trace.
    pub fn gc_sweep_start(&self, p: &mut Processor) {
        if p.sweep_active {
            panic!("trace: double sweep start");
        }
        p.sweep_active = true;
        p.swept = 0;
        p.reclaimed = 0;
    }

    /// Record one swept span. Outside a sweep bracket this is a no-op.
    pub fn gc_sweep_span(&self, p: &mut Processor, bytes_swept: u64) {
        if p.sweep_active {
            if p.swept == 0 {
                self.event(Some(&mut *p), EventKind::GCSweepStart, StackRef::Capture(1), &[]);
            }
            p.swept += bytes_swept;
        }
    }

    /// Credit reclaimed bytes to the open sweep bracket.
    pub fn gc_sweep_reclaimed(&self, p: &mut Processor, bytes: u64) {
        if p.sweep_active {
            p.reclaimed += bytes;
        }
    }

    pub fn gc_sweep_done(&self, p: &mut Processor) {
        if !p.sweep_active {
            panic!("trace: sweep done without sweep start");
        }
        if p.swept != 0 {
            let (swept, reclaimed) = (p.swept, p.reclaimed);
            self.event(
                Some(&mut *p),
                EventKind::GCSweepDone,
                StackRef::None,
                &[swept, reclaimed],
            );
        }
        p.sweep_active = false;
    }

    pub fn gc_mark_assist_start(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GCMarkAssistStart, StackRef::Capture(1), &[]);
    }

    pub fn gc_mark_assist_done(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GCMarkAssistDone, StackRef::None, &[]);
    }

    pub fn go_create(&self, p: &mut Processor, newg: &mut Goroutine) {
        newg.seq = 0;
        newg.last_proc = p.id;
        let start_pc_stack = self.stack_tab.put(&[newg.start_pc]);
        self.event(
            Some(p),
            EventKind::GoCreate,
            StackRef::Capture(2),
            &[newg.id, u64::from(start_pc_stack)],
        );
    }

    /// Three encodings: labeled when the processor runs a GC mark worker,
    /// compact when the goroutine stayed on its last processor, full with
    /// the per-goroutine sequence number otherwise.
    pub fn go_start(&self, p: &mut Processor, g: &mut Goroutine) {
        g.seq += 1;
        if p.mark_worker != MarkWorkerMode::NotWorker {
            let label = self.mark_worker_labels[p.mark_worker as usize].load(Ordering::Relaxed);
            self.event(
                Some(p),
                EventKind::GoStartLabel,
                StackRef::None,
                &[g.id, g.seq, label],
            );
        } else if g.last_proc == p.id {
            self.event(Some(p), EventKind::GoStartLocal, StackRef::None, &[g.id]);
        } else {
            g.last_proc = p.id;
            self.event(Some(p), EventKind::GoStart, StackRef::None, &[g.id, g.seq]);
        }
    }

    pub fn go_end(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GoEnd, StackRef::None, &[]);
    }

    pub fn go_sched(&self, p: &mut Processor, g: &mut Goroutine) {
        g.last_proc = p.id;
        self.event(Some(p), EventKind::GoSched, StackRef::Capture(1), &[]);
    }

    pub fn go_preempt(&self, p: &mut Processor, g: &mut Goroutine) {
        g.last_proc = p.id;
        self.event(Some(p), EventKind::GoPreempt, StackRef::Capture(1), &[]);
    }

    /// Park the current goroutine. `ev` is one of the block event kinds
    /// (`GoStop`, `GoSleep`, `GoBlock*`), optionally with the high bit
    /// ([`FUTILE_WAKEUP`]) set to flag the preceding wakeup as futile.
    pub fn go_park(&self, mut p: Option<&mut Processor>, ev: u8, skip: usize) {
        if ev & FUTILE_WAKEUP != 0 {
            self.event(p.as_deref_mut(), EventKind::FutileWakeup, StackRef::None, &[]);
        }
        let Some(kind) = EventKind::from_u8(ev & !FUTILE_WAKEUP) else {
            panic!("trace: invalid park event type {ev}");
        };
        self.event(p, kind, StackRef::Capture(skip), &[]);
    }

    pub fn go_unpark(&self, p: &mut Processor, g: &mut Goroutine, skip: usize) {
        g.seq += 1;
        if g.last_proc == p.id {
            self.event(
                Some(p),
                EventKind::GoUnblockLocal,
                StackRef::Capture(skip),
                &[g.id],
            );
        } else {
            g.last_proc = p.id;
            self.event(
                Some(p),
                EventKind::GoUnblock,
                StackRef::Capture(skip),
                &[g.id, g.seq],
            );
        }
    }

    pub fn go_syscall(&self, p: Option<&mut Processor>) {
        self.event(p, EventKind::GoSysCall, StackRef::Capture(1), &[]);
    }

    /// `ts` is the tick recorded at the actual syscall exit. Exits racing
    /// with trace start can carry a tick from before `ticks_start`; those
    /// are best-effort and replaced with 0 so the consumer never sees the
    /// clock run backwards.
    pub fn go_sys_exit(&self, p: Option<&mut Processor>, g: &mut Goroutine, ts: u64) {
        let mut ts = ts;
        if ts != 0 && ts < self.ticks_start.load(Ordering::Relaxed) {
            ts = 0;
        }
        g.seq += 1;
        g.last_proc = match &p {
            Some(p) => p.id,
            None => GLOBAL_PROC,
        };
        self.event(
            p,
            EventKind::GoSysExit,
            StackRef::None,
            &[g.id, g.seq, ts / TICK_DIV],
        );
    }

    pub fn go_sys_block(&self, p: &mut Processor) {
        self.event(Some(p), EventKind::GoSysBlock, StackRef::None, &[]);
    }

    pub fn heap_alloc(&self, p: Option<&mut Processor>, live: u64) {
        self.event(p, EventKind::HeapAlloc, StackRef::None, &[live]);
    }

    pub fn heap_goal(&self, p: Option<&mut Processor>, goal: u64) {
        // Heap-based triggering disabled reads as "no goal".
        let goal = if goal == u64::MAX { 0 } else { goal };
        self.event(p, EventKind::HeapGoal, StackRef::None, &[goal]);
    }

    pub fn user_task_create(&self, p: Option<&mut Processor>, id: u64, parent: u64, task_type: &str) {
        if !self.is_enabled() {
            return;
        }
        self.with_site(p, |t, slot, pid| {
            if !t.enabled.load(Ordering::Relaxed) && !t.starting.load(Ordering::Relaxed) {
                return;
            }
            let type_id = t.string_id_in(slot, pid, task_type);
            t.event_in(
                slot,
                pid,
                EventKind::UserTaskCreate,
                StackRef::Capture(3),
                &[id, parent, type_id],
                0,
            );
        });
    }

    pub fn user_task_end(&self, p: Option<&mut Processor>, id: u64) {
        self.event(p, EventKind::UserTaskEnd, StackRef::Capture(2), &[id]);
    }

    /// `mode` is 0 for region start, 1 for region end.
    pub fn user_region(&self, p: Option<&mut Processor>, id: u64, mode: u64, name: &str) {
        if !self.is_enabled() {
            return;
        }
        self.with_site(p, |t, slot, pid| {
            if !t.enabled.load(Ordering::Relaxed) && !t.starting.load(Ordering::Relaxed) {
                return;
            }
            let name_id = t.string_id_in(slot, pid, name);
            t.event_in(
                slot,
                pid,
                EventKind::UserRegion,
                StackRef::Capture(3),
                &[id, mode, name_id],
                0,
            );
        });
    }

    pub fn user_log(&self, p: Option<&mut Processor>, id: u64, category: &str, message: &str) {
        if !self.is_enabled() {
            return;
        }
        self.with_site(p, |t, slot, pid| {
            if !t.enabled.load(Ordering::Relaxed) && !t.starting.load(Ordering::Relaxed) {
                return;
            }
            let category_id = t.string_id_in(slot, pid, category);
            // The message trails the framed event; reserve room for it up
            // front so both land in the same buffer.
            let extra = crate::trace::BYTES_PER_NUMBER + message.len();
            let written = t.event_in(
                slot,
                pid,
                EventKind::UserLog,
                StackRef::Capture(3),
                &[id, category_id],
                extra,
            );
            if !written {
                return;
            }
            let buf = slot.as_mut().unwrap();
            let mut mlen = message.len();
            if buf.room() < mlen + crate::trace::BYTES_PER_NUMBER {
                mlen = buf.room().saturating_sub(crate::trace::BYTES_PER_NUMBER);
            }
            buf.push_varint(mlen as u64);
            buf.arr.extend_from_slice(&message.as_bytes()[..mlen]);
        });
    }

    /// Record one CPU-profile sample. Callable from a signal handler: no
    /// mutex is taken, nothing is allocated, and concurrent signals are
    /// serialized by a test-and-set spin.
    pub fn cpu_sample(&self, proc_id: Option<i32>, goroutine_id: u64, pcs: &[u64]) {
        // Best-effort gate; a stale read here only drops the sample.
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        let now = self.clock.ticks();
        // Real headers always have a low bit set in the first word so they
        // can never look like the ring's all-zero overflow marker.
        let hdr0 = match proc_id {
            Some(pid) => (pid as u64) << 1 | 0b1,
            None => 0b10,
        };
        while self
            .signal_lock
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Yielding in signal context is of uncertain safety; this path
            // is only reached when two signals land on distinct threads at
            // once.
            // SAFETY: sched_yield takes no arguments and cannot fail in a
            // way that matters here.
            unsafe {
                libc::sched_yield();
            }
        }
        if let Some(ring) = self.ring_write.load_full() {
            ring.write(now, [hdr0, goroutine_id], pcs);
        }
        self.signal_lock.store(0, Ordering::Release);
    }
}
