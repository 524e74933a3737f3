#![doc = include_str!("../README.md")]

pub mod trace;

pub use trace::clock::{AddrSymbolizer, Clock, FrameInfo, NullUnwinder, Symbolizer, SystemClock, Unwinder};
pub use trace::decode;
pub use trace::events::{EventKind, FUTILE_WAKEUP};
pub use trace::world::{GoStatus, Goroutine, MarkWorkerMode, Processor, World};
pub use trace::{STREAM_HEADER, StartError, TICK_DIV, Tracer, TracerBuilder};
