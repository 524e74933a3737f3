//! The event-emission fast path.
//!
//! `event` picks the buffer site (per-processor or global), rechecks the
//! enabled flag, and encodes one record: a header byte packing the type and
//! argument count, an optional one-byte length for variable-length events,
//! the tick delta, the argument varints, and an optional stack id. Ticks
//! within one buffer are strictly monotonic; a delta of zero is bumped to
//! one.

use std::sync::atomic::Ordering;

use crate::trace::buffer::{BufQueues, TraceBuf};
use crate::trace::events::{ARG_COUNT_SHIFT, EventKind};
use crate::trace::world::{GLOBAL_PROC, Processor};
use crate::trace::{BYTES_PER_NUMBER, TICK_DIV, Tracer};

/// How an event relates to a call stack.
pub(crate) enum StackRef {
    /// The event kind carries no stack.
    None,
    /// Stack-bearing kind, but record no frames: stack id 0.
    Empty,
    /// Unwind the current thread, dropping `skip` top frames, and intern.
    Capture(usize),
    /// A stack id already obtained from the interning table.
    Known(u32),
}

impl Tracer {
    /// Emit one event at the calling thread's buffer site.
    pub(crate) fn event(
        &self,
        proc: Option<&mut Processor>,
        ev: EventKind,
        stack: StackRef,
        args: &[u64],
    ) {
        self.with_site(proc, |t, slot, pid| {
            t.event_in(slot, pid, ev, stack, args, 0);
        });
    }

    /// Run `f` against the current buffer site: the processor's own slot, or
    /// the global slot under its mutex when no processor is bound.
    pub(crate) fn with_site<R>(
        &self,
        proc: Option<&mut Processor>,
        f: impl FnOnce(&Tracer, &mut Option<Box<TraceBuf>>, i32) -> R,
    ) -> R {
        match proc {
            Some(p) => f(self, &mut p.buf, p.id),
            None => {
                let mut slot = self.global_buf.lock().unwrap();
                f(self, &mut slot, GLOBAL_PROC)
            }
        }
    }

    /// Encode one event into `slot`, rotating the buffer if it cannot hold
    /// the worst case. Returns false if tracing turned out to be disabled.
    ///
    /// `extra` reserves additional room directly after the event, for
    /// callers that append a payload (the user-log message).
    pub(crate) fn event_in(
        &self,
        slot: &mut Option<Box<TraceBuf>>,
        pid: i32,
        ev: EventKind,
        stack: StackRef,
        args: &[u64],
        extra: usize,
    ) -> bool {
        // The caller saw `enabled` set, but stop may have intervened. Events
        // from the thread still running `start` must not be dropped.
        if !self.enabled.load(Ordering::Relaxed) && !self.starting.load(Ordering::Relaxed) {
            return false;
        }

        // Event type, length, tick delta, stack id and up to two more args.
        let max_size = 2 + 5 * BYTES_PER_NUMBER + extra;
        if slot.as_ref().is_none_or(|b| b.room() < max_size) {
            let old = slot.take();
            *slot = Some(self.flush(old, pid));
        }
        let buf = slot.as_mut().unwrap();

        let stack_arg = match stack {
            StackRef::None => None,
            StackRef::Empty => Some(0),
            StackRef::Known(id) => Some(u64::from(id)),
            StackRef::Capture(skip) => {
                let n = self.unwinder.unwind(skip, &mut buf.stk);
                let n = self.trim_terminators(&buf.stk[..n.min(crate::trace::MAX_STACK)]);
                Some(u64::from(self.stack_tab.put(&buf.stk[..n])))
            }
        };

        let mut ticks = self.clock.ticks() / TICK_DIV;
        if ticks == buf.last_ticks {
            ticks += 1;
        }
        let tick_diff = ticks - buf.last_ticks;
        buf.last_ticks = ticks;

        let mut narg = args.len() as u8;
        if stack_arg.is_some() {
            narg += 1;
        }
        // Only 2 bits for the argument count; 3 means "length follows".
        if narg > 3 {
            narg = 3;
        }
        let start = buf.arr.len();
        buf.push_byte(ev as u8 | narg << ARG_COUNT_SHIFT);
        let mut len_at = None;
        if narg == 3 {
            // Reserve the length byte, assuming the event stays under 128.
            buf.push_byte(0);
            len_at = Some(buf.arr.len() - 1);
        }
        buf.push_varint(tick_diff);
        for &a in args {
            buf.push_varint(a);
        }
        if let Some(id) = stack_arg {
            buf.push_varint(id);
        }
        let ev_size = buf.arr.len() - start;
        if ev_size > max_size {
            panic!("trace: invalid length of trace event");
        }
        if let Some(i) = len_at {
            buf.arr[i] = (ev_size - 2) as u8;
        }
        true
    }

    /// Drop configured runtime terminator frames from the stack tail.
    fn trim_terminators(&self, pcs: &[u64]) -> usize {
        let mut n = pcs.len();
        while n > 0 && self.terminator_pcs.contains(&pcs[n - 1]) {
            n -= 1;
        }
        n
    }

    /// Push `old` onto the full queue and return a fresh buffer stamped with
    /// a `Batch` event for `pid`.
    pub(crate) fn flush(&self, old: Option<Box<TraceBuf>>, pid: i32) -> Box<TraceBuf> {
        let mut q = self.queues.lock().unwrap();
        self.flush_locked(&mut q, old, pid)
    }

    pub(crate) fn flush_locked(
        &self,
        q: &mut BufQueues,
        old: Option<Box<TraceBuf>>,
        pid: i32,
    ) -> Box<TraceBuf> {
        if let Some(b) = old {
            q.full.push_back(b);
            if q.reader_parked {
                self.wake.notify_one();
            }
        }
        let mut buf = q
            .empty
            .pop()
            .unwrap_or_else(|| TraceBuf::new(self.buf_bytes));
        buf.arr.clear();
        // A recycled buffer keeps its tick cursor; the opening tick must
        // still be strictly past it.
        let mut ticks = self.clock.ticks() / TICK_DIV;
        if ticks == buf.last_ticks {
            ticks += 1;
        }
        buf.last_ticks = ticks;
        buf.push_byte(EventKind::Batch as u8 | 1 << ARG_COUNT_SHIFT);
        buf.push_varint(pid as u64);
        buf.push_varint(ticks);
        buf
    }

    /// Intern `s`, emitting the `String` dictionary event on first sight.
    ///
    /// The table lock is released before the event is written: writing can
    /// rotate the buffer, and buffer rotation must never happen while a
    /// table lock is held.
    pub(crate) fn string_id_in(
        &self,
        slot: &mut Option<Box<TraceBuf>>,
        pid: i32,
        s: &str,
    ) -> u64 {
        if s.is_empty() {
            return 0;
        }
        let (id, new) = self.strings.lookup_or_insert(s);
        if !new {
            return id;
        }
        let size = 1 + 2 * BYTES_PER_NUMBER + s.len();
        if slot.as_ref().is_none_or(|b| b.room() < size) {
            let old = slot.take();
            *slot = Some(self.flush(old, pid));
        }
        let buf = slot.as_mut().unwrap();
        buf.push_byte(EventKind::String as u8);
        buf.push_varint(id);
        // Truncate if even a fresh buffer cannot hold the whole string.
        let mut slen = s.len();
        if buf.room() < slen + BYTES_PER_NUMBER {
            slen = buf.room().saturating_sub(BYTES_PER_NUMBER);
        }
        buf.push_varint(slen as u64);
        buf.arr.extend_from_slice(&s.as_bytes()[..slen]);
        id
    }
}
