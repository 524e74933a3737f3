//! Single-consumer reader.
//!
//! `read` hands back, in order: the fixed stream header, each full buffer's
//! payload, the tick-frequency footer, the stack/string dictionary buffers
//! produced by the dump, and finally `None` once shutdown has drained.

use std::sync::MutexGuard;
use std::sync::atomic::Ordering;

use crate::trace::buffer::BufQueues;
use crate::trace::encoder::StackRef;
use crate::trace::events::{ARG_COUNT_SHIFT, EventKind};
use crate::trace::sample::SampleSink;
use crate::trace::varint::append_uvarint;
use crate::trace::{BYTES_PER_NUMBER, MAX_STACK, STREAM_HEADER, TICK_DIV, Tracer};

impl Tracer {
    /// Return the next chunk of binary trace data, blocking until data is
    /// available. Returns `None` once tracing has stopped and everything
    /// accumulated has been returned.
    ///
    /// Single consumer: a concurrent call from a second thread is a usage
    /// error, reported with a warning and an immediate `None`.
    pub fn read(&self) -> Option<Vec<u8>> {
        let mut q = self.queues.lock().unwrap();
        if q.reader_active {
            drop(q);
            log::warn!("trace: read called from multiple threads simultaneously");
            return None;
        }
        q.reader_active = true;
        self.read_step(q)
    }

    fn read_step<'a>(&'a self, mut q: MutexGuard<'a, BufQueues>) -> Option<Vec<u8>> {
        // Recycle the buffer handed out by the previous call.
        if let Some(buf) = q.reading.take() {
            q.empty.push(buf);
        }

        if !q.header_written {
            q.header_written = true;
            q.reader_active = false;
            return Some(STREAM_HEADER.to_vec());
        }

        // Look for CPU profile samples; this may intern new stacks and
        // enqueue new full buffers.
        if !q.footer_written && !self.shutdown.load(Ordering::Relaxed) {
            drop(q);
            self.drain_cpu();
            q = self.queues.lock().unwrap();
        }

        while q.full.is_empty() && !self.shutdown.load(Ordering::Relaxed) {
            q.reader_parked = true;
            q = self.wake.wait(q).unwrap();
            q.reader_parked = false;
        }

        if let Some(buf) = q.full.pop_front() {
            let data = buf.arr.clone();
            q.reading = Some(buf);
            q.reader_active = false;
            return Some(data);
        }

        if !q.footer_written {
            q.footer_written = true;
            q.reader_active = false;
            drop(q);
            // f64: the tick span times 1e9 can overflow 64-bit integers.
            let ticks = (self.ticks_end.load(Ordering::Relaxed)
                - self.ticks_start.load(Ordering::Relaxed)) as f64;
            let nanos = (self.nanos_end.load(Ordering::Relaxed)
                - self.nanos_start.load(Ordering::Relaxed)) as f64;
            let freq = (ticks * 1e9 / nanos / TICK_DIV as f64) as i64;
            if freq <= 0 {
                panic!("trace: invalid frequency");
            }
            let mut data = vec![EventKind::Frequency as u8];
            append_uvarint(&mut data, freq as u64);
            // The dump enqueues full buffers; they come back on the next
            // calls.
            self.dump_stacks();
            return Some(data);
        }

        if self.shutdown.load(Ordering::Relaxed) {
            q.reader_active = false;
            drop(q);
            let mut done = self.reader_done.lock().unwrap();
            *done = true;
            self.reader_done_cv.notify_all();
            return None;
        }

        q.reader_active = false;
        drop(q);
        log::warn!("trace: spurious wakeup of trace reader");
        None
    }

    /// Convert pending CPU samples into `CPUSample` events in the staging
    /// buffer.
    pub(crate) fn drain_cpu(&self) {
        let mut sink = self.sink.lock().unwrap();
        self.drain_cpu_locked(&mut sink);
    }

    pub(crate) fn drain_cpu_locked(&self, sink: &mut SampleSink) {
        let Some(ring) = sink.ring.clone() else {
            return;
        };
        while let Some(rec) = ring.read_record() {
            if rec.is_overflow() {
                // Only full records are reported.
                continue;
            }
            if sink.buf.is_none() {
                sink.buf = Some(self.flush(None, 0));
            }
            let buf = sink.buf.as_mut().unwrap();
            let n = rec.stk.len().min(MAX_STACK);
            buf.stk[..n].copy_from_slice(&rec.stk[..n]);
            let stack_id = self.stack_tab.put(&buf.stk[..n]);
            let proc_id = if rec.hdr[0] & 1 != 0 {
                rec.hdr[0] >> 1
            } else {
                u64::MAX
            };
            let goroutine_id = rec.hdr[1];
            self.event_in(
                &mut sink.buf,
                0,
                EventKind::CPUSample,
                StackRef::Known(stack_id),
                &[rec.timestamp / TICK_DIV, proc_id, goroutine_id],
                0,
            );
        }
    }

    /// Emit one `Stack` event per interned stack, then reset the table.
    /// Called exactly once per trace, after the frequency footer.
    fn dump_stacks(&self) {
        let mut slot = Some(self.flush(None, 0));
        let mut tmp: Vec<u8> = Vec::with_capacity((2 + 4 * MAX_STACK) * BYTES_PER_NUMBER);
        self.stack_tab.for_each(|id, pcs| {
            tmp.clear();
            append_uvarint(&mut tmp, u64::from(id));
            append_uvarint(&mut tmp, pcs.len() as u64);
            for &pc in pcs {
                let frame = self.symbolizer.symbolize(pc);
                let func_id = self.string_id_in(&mut slot, 0, tail(&frame.function, 1 << 10));
                let file_id = self.string_id_in(&mut slot, 0, tail(&frame.file, 1 << 10));
                append_uvarint(&mut tmp, pc);
                append_uvarint(&mut tmp, func_id);
                append_uvarint(&mut tmp, file_id);
                append_uvarint(&mut tmp, frame.line);
            }
            let size = 1 + BYTES_PER_NUMBER + tmp.len();
            if slot.as_ref().is_none_or(|b| b.room() < size) {
                let old = slot.take();
                slot = Some(self.flush(old, 0));
            }
            let buf = slot.as_mut().unwrap();
            buf.push_byte(EventKind::Stack as u8 | 3 << ARG_COUNT_SHIFT);
            buf.push_varint(tmp.len() as u64);
            buf.arr.extend_from_slice(&tmp);
        });
        if let Some(buf) = slot {
            let mut q = self.queues.lock().unwrap();
            q.full.push_back(buf);
        }
        self.stack_tab.reset();
    }
}

/// Last `max` bytes of `s`, on a char boundary. Long symbol names keep their
/// more specific tail.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::tail;

    #[test]
    fn test_tail_keeps_short_strings() {
        assert_eq!(tail("abc", 10), "abc");
    }

    #[test]
    fn test_tail_truncates_to_suffix() {
        assert_eq!(tail("abcdef", 3), "def");
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        let s = "aß"; // ß is two bytes
        assert_eq!(tail(s, 1), "");
        assert_eq!(tail(s, 2), "ß");
    }
}
