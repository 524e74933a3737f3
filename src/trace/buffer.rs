//! Trace buffers and the queues that move them between producers and the
//! reader.
//!
//! A buffer belongs to exactly one place at a time: a processor's slot, the
//! global fallback slot, the CPU-sample staging slot, the `empty` free list,
//! the `full` queue, or the reader's `reading` slot. Ownership transfer via
//! `Box` makes that invariant structural; the original intrusive link
//! pointer is not needed.

use std::collections::VecDeque;

use crate::trace::MAX_STACK;
use crate::trace::varint;

pub(crate) struct TraceBuf {
    cap: usize,
    /// Tick of the last event written; successors must be strictly greater.
    pub(crate) last_ticks: u64,
    pub(crate) arr: Vec<u8>,
    /// Scratch space for one captured stack, reused across events.
    pub(crate) stk: [u64; MAX_STACK],
}

impl TraceBuf {
    pub(crate) fn new(cap: usize) -> Box<TraceBuf> {
        Box::new(TraceBuf {
            cap,
            last_ticks: 0,
            arr: Vec::with_capacity(cap),
            stk: [0; MAX_STACK],
        })
    }

    pub(crate) fn room(&self) -> usize {
        self.cap - self.arr.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.arr.is_empty()
    }

    pub(crate) fn push_byte(&mut self, b: u8) {
        self.arr.push(b);
    }

    pub(crate) fn push_varint(&mut self, v: u64) {
        varint::append_uvarint(&mut self.arr, v);
    }
}

#[derive(Default)]
pub(crate) struct BufQueues {
    /// Free list of recycled buffers, LIFO.
    pub(crate) empty: Vec<Box<TraceBuf>>,
    /// Buffers ready for the reader, FIFO.
    pub(crate) full: VecDeque<Box<TraceBuf>>,
    /// The buffer whose bytes were handed out by the previous read call.
    pub(crate) reading: Option<Box<TraceBuf>>,
    pub(crate) reader_parked: bool,
    pub(crate) reader_active: bool,
    pub(crate) header_written: bool,
    pub(crate) footer_written: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_shrinks_as_bytes_are_written() {
        let mut buf = TraceBuf::new(64);
        assert_eq!(buf.room(), 64);
        assert!(buf.is_empty());
        buf.push_byte(1);
        buf.push_varint(300);
        assert_eq!(buf.room(), 64 - 3);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_recycled_buffer_keeps_tick_cursor() {
        let mut buf = TraceBuf::new(64);
        buf.last_ticks = 42;
        buf.push_byte(1);
        buf.arr.clear();
        assert_eq!(buf.last_ticks, 42);
        assert!(buf.is_empty());
    }
}
