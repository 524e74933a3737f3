//! Offline parser for the binary trace stream.
//!
//! Reconstructs batches with absolute ticks, the stack and string
//! dictionaries, and per-event stack ids. Used by the test suite and for
//! ad-hoc analysis of captured streams; the hot path never goes through
//! here.

use serde::Serialize;
use thiserror::Error;

use crate::trace::STREAM_HEADER;
use crate::trace::events::EventKind;
use crate::trace::varint::read_uvarint;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("stream shorter than the 16-byte header")]
    TooShort,
    #[error("bad stream header")]
    BadHeader,
    #[error("truncated varint at offset {0}")]
    BadVarint(usize),
    #[error("unknown event type {0} at offset {1}")]
    UnknownEvent(u8, usize),
    #[error("event before the first batch at offset {0}")]
    EventOutsideBatch(usize),
    #[error("length-framed event of {len} bytes at offset {at}")]
    OversizedFrame { len: u64, at: usize },
    #[error("truncated event at offset {0}")]
    Truncated(usize),
}

/// One decoded event, attributed to the batch it appeared in.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub proc_id: i64,
    /// Absolute tick, accumulated from the batch opening tick.
    pub tick: u64,
    /// Argument varints, excluding the tick delta and the stack id.
    pub args: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_id: Option<u64>,
    /// Trailing bytes of `UserLog` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub proc_id: i64,
    pub start_tick: u64,
    /// Byte offset of the batch header in the stream.
    pub offset: usize,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub pc: u64,
    pub func_id: u64,
    pub file_id: u64,
    pub line: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackRecord {
    pub id: u64,
    pub frames: Vec<Frame>,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StringRecord {
    pub id: u64,
    pub data: Vec<u8>,
    pub offset: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct Trace {
    pub frequency: u64,
    /// Byte offset of the frequency footer, if present.
    pub frequency_offset: Option<usize>,
    pub batches: Vec<Batch>,
    pub stacks: Vec<StackRecord>,
    pub strings: Vec<StringRecord>,
}

impl Trace {
    /// All batch events in stream order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.batches.iter().flat_map(|b| b.events.iter())
    }

    pub fn stack(&self, id: u64) -> Option<&StackRecord> {
        self.stacks.iter().find(|s| s.id == id)
    }

    pub fn string_text(&self, id: u64) -> Option<String> {
        self.strings
            .iter()
            .find(|s| s.id == id)
            .map(|s| String::from_utf8_lossy(&s.data).into_owned())
    }
}

fn uv(data: &[u8], pos: usize) -> Result<(u64, usize), ParseError> {
    read_uvarint(&data[pos..]).ok_or(ParseError::BadVarint(pos))
}

/// Parse a complete stream: header, batches, frequency footer, and the
/// stack/string dictionary tail.
pub fn parse(data: &[u8]) -> Result<Trace, ParseError> {
    if data.len() < STREAM_HEADER.len() {
        return Err(ParseError::TooShort);
    }
    if &data[..STREAM_HEADER.len()] != STREAM_HEADER {
        return Err(ParseError::BadHeader);
    }
    let mut pos = STREAM_HEADER.len();
    let mut trace = Trace::default();
    let mut cur: Option<Batch> = None;

    while pos < data.len() {
        let at = pos;
        let byte = data[pos];
        pos += 1;
        let raw = byte & 0x3f;
        let narg = (byte >> 6) as usize;
        let kind = EventKind::from_u8(raw).ok_or(ParseError::UnknownEvent(raw, at))?;

        match kind {
            EventKind::Batch => {
                let (pid, n) = uv(data, pos)?;
                pos += n;
                let (tick, n) = uv(data, pos)?;
                pos += n;
                if let Some(done) = cur.take() {
                    trace.batches.push(done);
                }
                cur = Some(Batch {
                    proc_id: pid as i64,
                    start_tick: tick,
                    offset: at,
                    events: Vec::new(),
                });
            }
            EventKind::Frequency => {
                let (freq, n) = uv(data, pos)?;
                pos += n;
                trace.frequency = freq;
                trace.frequency_offset = Some(at);
            }
            EventKind::String => {
                // Dictionary entries are not length-framed: id, length, raw
                // bytes.
                let (id, n) = uv(data, pos)?;
                pos += n;
                let (len, n) = uv(data, pos)?;
                pos += n;
                let len = len as usize;
                if pos + len > data.len() {
                    return Err(ParseError::Truncated(at));
                }
                trace.strings.push(StringRecord {
                    id,
                    data: data[pos..pos + len].to_vec(),
                    offset: at,
                });
                pos += len;
            }
            EventKind::Stack => {
                // Dump records carry a full varint length and no tick delta.
                let (len, n) = uv(data, pos)?;
                pos += n;
                let end = pos + len as usize;
                if end > data.len() {
                    return Err(ParseError::Truncated(at));
                }
                let (id, n) = uv(&data[..end], pos)?;
                pos += n;
                let (nframes, n) = uv(&data[..end], pos)?;
                pos += n;
                let mut frames = Vec::with_capacity(nframes as usize);
                for _ in 0..nframes {
                    let (pc, n) = uv(&data[..end], pos)?;
                    pos += n;
                    let (func_id, n) = uv(&data[..end], pos)?;
                    pos += n;
                    let (file_id, n) = uv(&data[..end], pos)?;
                    pos += n;
                    let (line, n) = uv(&data[..end], pos)?;
                    pos += n;
                    frames.push(Frame {
                        pc,
                        func_id,
                        file_id,
                        line,
                    });
                }
                if pos != end {
                    return Err(ParseError::Truncated(at));
                }
                trace.stacks.push(StackRecord { id, frames, offset: at });
            }
            _ => {
                let batch = cur.as_mut().ok_or(ParseError::EventOutsideBatch(at))?;
                let mut args = Vec::new();
                let tick_delta;
                if narg < 3 {
                    let (d, n) = uv(data, pos)?;
                    pos += n;
                    tick_delta = d;
                    for _ in 0..narg {
                        let (a, n) = uv(data, pos)?;
                        pos += n;
                        args.push(a);
                    }
                } else {
                    // Variable-length events reserve a single byte for the
                    // length, so it must stay below 128.
                    let (len, n) = uv(data, pos)?;
                    pos += n;
                    if len > 127 {
                        return Err(ParseError::OversizedFrame { len, at });
                    }
                    let end = pos + len as usize;
                    if end > data.len() {
                        return Err(ParseError::Truncated(at));
                    }
                    let (d, n) = uv(&data[..end], pos)?;
                    pos += n;
                    tick_delta = d;
                    while pos < end {
                        let (a, n) = uv(&data[..end], pos)?;
                        pos += n;
                        args.push(a);
                    }
                    if pos != end {
                        return Err(ParseError::Truncated(at));
                    }
                }

                let stack_id = if kind.has_stack() {
                    Some(args.pop().ok_or(ParseError::Truncated(at))?)
                } else {
                    None
                };

                let mut payload = None;
                if kind == EventKind::UserLog {
                    let (mlen, n) = uv(data, pos)?;
                    pos += n;
                    let mlen = mlen as usize;
                    if pos + mlen > data.len() {
                        return Err(ParseError::Truncated(at));
                    }
                    payload = Some(data[pos..pos + mlen].to_vec());
                    pos += mlen;
                }

                let prev = batch
                    .events
                    .last()
                    .map(|e| e.tick)
                    .unwrap_or(batch.start_tick);
                batch.events.push(Event {
                    kind,
                    proc_id: batch.proc_id,
                    tick: prev + tick_delta,
                    args,
                    stack_id,
                    payload,
                });
            }
        }
    }
    if let Some(done) = cur.take() {
        trace.batches.push(done);
    }
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::events::ARG_COUNT_SHIFT;
    use crate::trace::varint::append_uvarint;

    fn batch_header(pid: u64, tick: u64) -> Vec<u8> {
        let mut out = vec![EventKind::Batch as u8 | 1 << ARG_COUNT_SHIFT];
        append_uvarint(&mut out, pid);
        append_uvarint(&mut out, tick);
        out
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(parse(b"not a trace"), Err(ParseError::TooShort)));
        let mut data = STREAM_HEADER.to_vec();
        data[3] = b'X';
        data.extend_from_slice(&[0u8; 4]);
        assert!(matches!(parse(&data), Err(ParseError::BadHeader)));
    }

    #[test]
    fn test_event_outside_batch_is_an_error() {
        let mut data = STREAM_HEADER.to_vec();
        data.push(EventKind::GoEnd as u8);
        data.push(5); // tick delta
        assert!(matches!(parse(&data), Err(ParseError::EventOutsideBatch(_))));
    }

    #[test]
    fn test_ticks_accumulate_within_batch() {
        let mut data = STREAM_HEADER.to_vec();
        data.extend(batch_header(2, 100));
        // GoEnd: no args
        data.push(EventKind::GoEnd as u8);
        data.push(5);
        // HeapAlloc: one arg
        data.push(EventKind::HeapAlloc as u8 | 1 << ARG_COUNT_SHIFT);
        data.push(3);
        append_uvarint(&mut data, 4096);

        let trace = parse(&data).unwrap();
        assert_eq!(trace.batches.len(), 1);
        let batch = &trace.batches[0];
        assert_eq!(batch.proc_id, 2);
        assert_eq!(batch.start_tick, 100);
        assert_eq!(batch.events[0].tick, 105);
        assert_eq!(batch.events[1].tick, 108);
        assert_eq!(batch.events[1].args, vec![4096]);
    }

    #[test]
    fn test_global_proc_id_decodes_negative() {
        let mut data = STREAM_HEADER.to_vec();
        data.extend(batch_header(u64::MAX, 1));
        let trace = parse(&data).unwrap();
        assert_eq!(trace.batches[0].proc_id, -1);
    }

    #[test]
    fn test_length_framed_event_with_stack() {
        let mut data = STREAM_HEADER.to_vec();
        data.extend(batch_header(0, 10));
        // GoCreate: tick delta + goid + start stack id + stack id, framed.
        let mut body = Vec::new();
        append_uvarint(&mut body, 1); // tick delta
        append_uvarint(&mut body, 9); // goid
        append_uvarint(&mut body, 2); // start pc stack
        append_uvarint(&mut body, 3); // creation stack
        data.push(EventKind::GoCreate as u8 | 3 << ARG_COUNT_SHIFT);
        data.push(body.len() as u8);
        data.extend(body);

        let trace = parse(&data).unwrap();
        let ev = &trace.batches[0].events[0];
        assert_eq!(ev.kind, EventKind::GoCreate);
        assert_eq!(ev.args, vec![9, 2]);
        assert_eq!(ev.stack_id, Some(3));
    }
}
