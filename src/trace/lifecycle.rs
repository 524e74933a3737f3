//! Start/stop protocol.
//!
//! Both operations run under global quiescence, which the runtime vouches
//! for by handing over `&mut World`. Start takes a consistent snapshot of
//! every live goroutine as synthetic events; stop collects every producer
//! buffer, waits for the reader to drain, and verifies that nothing was
//! left behind.

use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::trace::encoder::StackRef;
use crate::trace::events::EventKind;
use crate::trace::sample::ProfRing;
use crate::trace::world::{GoStatus, MARK_WORKER_LABELS, World};
use crate::trace::{MAX_STACK, Tracer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartError {
    #[error("tracing is already enabled")]
    AlreadyEnabled,
}

impl Tracer {
    /// Enable tracing. The caller must have stopped the world; emits from
    /// threads still finishing syscalls are diverted to the global buffer,
    /// whose lock is held for the whole bracket.
    pub fn start(&self, world: &mut World) -> Result<(), StartError> {
        let global = self.global_buf.lock().unwrap();

        if self.enabled.load(Ordering::Relaxed) || self.shutdown.load(Ordering::Relaxed) {
            return Err(StartError::AlreadyEnabled);
        }

        // Events emitted below must not be dropped by the enabled recheck,
        // but `enabled` itself cannot be set until the snapshot is complete.
        self.starting.store(true, Ordering::Relaxed);

        // Stack of the starting call, shared by every synthetic GoCreate.
        let mut stk = [0u64; MAX_STACK];
        let n = self.unwinder.unwind(2, &mut stk);
        let start_stack = u64::from(self.stack_tab.put(&stk[..n.min(MAX_STACK)]));

        // Publish the sample ring before any sample can arrive; the signal
        // handler must observe a fully initialized ring or none.
        let ring = ProfRing::new(self.ring_words);
        {
            let mut sink = self.sink.lock().unwrap();
            sink.ring = Some(ring.clone());
        }
        self.ring_write.store(Some(ring));

        *self.reader_done.lock().unwrap() = false;

        let cur_pid = world.procs[world.current_proc].id;
        let cur = &mut world.procs[world.current_proc];
        for g in world.goroutines.iter_mut() {
            if g.status == GoStatus::Dead {
                continue;
            }
            g.seq = 0;
            g.last_proc = cur_pid;
            let start_pc_stack = u64::from(self.stack_tab.put(&[g.start_pc]));
            self.event(
                Some(&mut *cur),
                EventKind::GoCreate,
                StackRef::None,
                &[g.id, start_pc_stack, start_stack],
            );
            match g.status {
                GoStatus::Waiting => {
                    // Implied seq 1 on the consumer side.
                    g.seq += 1;
                    self.event(Some(&mut *cur), EventKind::GoWaiting, StackRef::None, &[g.id]);
                }
                GoStatus::Syscall => {
                    g.seq += 1;
                    self.event(
                        Some(&mut *cur),
                        EventKind::GoInSyscall,
                        StackRef::None,
                        &[g.id],
                    );
                }
                _ => {}
            }
        }

        self.event(
            Some(&mut *cur),
            EventKind::ProcStart,
            StackRef::None,
            &[world.current_thread],
        );
        self.go_start(cur, &mut world.goroutines[world.current_go]);

        // The start times must be recorded after the GoInSyscall events: a
        // syscall exiting on a remote thread reads its exit tick without
        // stopping for the world, and that tick must never compare below
        // `ticks_start`.
        self.ticks_start.store(self.clock.ticks(), Ordering::Relaxed);
        self.nanos_start.store(self.clock.nanos(), Ordering::Relaxed);

        {
            let mut q = self.queues.lock().unwrap();
            q.header_written = false;
            q.footer_written = false;
        }
        self.strings.clear();
        self.seq_gc.store(0, Ordering::Relaxed);
        self.starting.store(false, Ordering::Relaxed);
        self.enabled.store(true, Ordering::Relaxed);

        // Canonical labels for GC mark workers, referenced by GoStartLabel.
        let cur = &mut world.procs[world.current_proc];
        for (i, label) in MARK_WORKER_LABELS.iter().enumerate() {
            let id = self.with_site(Some(&mut *cur), |t, slot, pid| t.string_id_in(slot, pid, label));
            self.mark_worker_labels[i].store(id, Ordering::Relaxed);
        }

        drop(global);
        Ok(())
    }

    /// Disable tracing and block until the reader has returned every byte.
    /// The caller must have stopped the world; the reader must be running on
    /// a thread outside it.
    pub fn stop(&self, world: &mut World) {
        let mut global = self.global_buf.lock().unwrap();

        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        // A clean tail for the stopping goroutine.
        {
            let cur_pid = world.procs[world.current_proc].id;
            world.goroutines[world.current_go].last_proc = cur_pid;
            let cur = &mut world.procs[world.current_proc];
            self.event(Some(cur), EventKind::GoSched, StackRef::Capture(1), &[]);
        }

        // Unpublish the ring, then drain what made it in.
        self.ring_write.store(None);
        let cpu_buf = {
            let mut sink = self.sink.lock().unwrap();
            if let Some(ring) = &sink.ring {
                ring.close();
            }
            self.drain_cpu_locked(&mut sink);
            sink.buf.take()
        };

        {
            let mut q = self.queues.lock().unwrap();
            for p in world.procs.iter_mut() {
                if let Some(buf) = p.buf.take() {
                    q.full.push_back(buf);
                }
            }
            if let Some(buf) = global.take() {
                if !buf.is_empty() {
                    q.full.push_back(buf);
                }
            }
            if let Some(buf) = cpu_buf {
                if !buf.is_empty() {
                    q.full.push_back(buf);
                }
            }
        }

        // Coarse clocks may tick every 15ms; the end times must land
        // strictly after the start times or the frequency footer divides by
        // zero.
        loop {
            self.ticks_end.store(self.clock.ticks(), Ordering::Relaxed);
            self.nanos_end.store(self.clock.nanos(), Ordering::Relaxed);
            if self.nanos_end.load(Ordering::Relaxed) != self.nanos_start.load(Ordering::Relaxed) {
                break;
            }
            std::thread::yield_now();
        }

        self.enabled.store(false, Ordering::Relaxed);
        self.shutdown.store(true, Ordering::Relaxed);
        drop(global);

        {
            let q = self.queues.lock().unwrap();
            if q.reader_parked {
                self.wake.notify_one();
            }
        }

        let mut done = self.reader_done.lock().unwrap();
        while !*done {
            done = self.reader_done_cv.wait(done).unwrap();
        }
        drop(done);

        // Everything must be back: any straggler buffer means the stream the
        // reader produced is structurally incomplete.
        for p in world.procs.iter() {
            if p.buf.is_some() {
                panic!("trace: non-empty trace buffer in proc");
            }
        }
        if self.global_buf.lock().unwrap().is_some() {
            panic!("trace: non-empty global trace buffer");
        }
        let mut q = self.queues.lock().unwrap();
        if !q.full.is_empty() {
            panic!("trace: non-empty full trace buffer");
        }
        if q.reading.is_some() || q.reader_active {
            panic!("trace: reading after shutdown");
        }
        q.empty.clear();
        drop(q);

        self.strings.clear();
        {
            let mut sink = self.sink.lock().unwrap();
            sink.ring = None;
        }
        self.shutdown.store(false, Ordering::Relaxed);
    }
}
