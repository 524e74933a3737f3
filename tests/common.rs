//! Shared harness: deterministic collaborators and a scripted runtime world.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use exectrace::{
    Clock, FrameInfo, GoStatus, Goroutine, Processor, Symbolizer, Tracer, Unwinder, World,
};

/// Deterministic clock. Ticks advance on every read so events stay strictly
/// ordered; nanos advance by 1µs per read unless frozen.
pub struct FakeClock {
    tick: AtomicU64,
    nano: AtomicU64,
    nano_freeze: AtomicU64,
}

impl FakeClock {
    pub fn new() -> Arc<FakeClock> {
        Arc::new(FakeClock {
            tick: AtomicU64::new(0),
            nano: AtomicU64::new(0),
            nano_freeze: AtomicU64::new(0),
        })
    }

    /// Make the next `calls` reads of `nanos` return the current value,
    /// imitating a coarse wall clock that has not ticked yet.
    pub fn freeze_nanos(&self, calls: u64) {
        self.nano_freeze.store(calls, Ordering::Relaxed);
    }
}

impl Clock for FakeClock {
    fn ticks(&self) -> u64 {
        self.tick.fetch_add(256, Ordering::Relaxed) + 256
    }

    fn nanos(&self) -> u64 {
        loop {
            let f = self.nano_freeze.load(Ordering::Relaxed);
            if f == 0 {
                break;
            }
            if self
                .nano_freeze
                .compare_exchange(f, f - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return self.nano.load(Ordering::Relaxed);
            }
        }
        self.nano.fetch_add(1_000, Ordering::Relaxed) + 1_000
    }
}

/// Unwinder that always reports the same frames, outermost last.
pub struct ScriptedUnwinder {
    pub frames: Vec<u64>,
}

impl ScriptedUnwinder {
    pub fn new(frames: Vec<u64>) -> Arc<ScriptedUnwinder> {
        Arc::new(ScriptedUnwinder { frames })
    }
}

impl Unwinder for ScriptedUnwinder {
    fn unwind(&self, _skip: usize, pcs: &mut [u64]) -> usize {
        let n = self.frames.len().min(pcs.len());
        pcs[..n].copy_from_slice(&self.frames[..n]);
        n
    }
}

/// Symbolizer producing distinct, recognizable names per PC.
pub struct TestSymbolizer;

impl Symbolizer for TestSymbolizer {
    fn symbolize(&self, pc: u64) -> FrameInfo {
        FrameInfo {
            function: format!("fn_{pc:#x}"),
            file: format!("src_{pc:#x}.rs"),
            line: pc & 0xff,
        }
    }
}

/// Owns the processors and goroutines a test runs against.
pub struct TestWorld {
    pub procs: Vec<Processor>,
    pub goroutines: Vec<Goroutine>,
}

impl TestWorld {
    /// `goroutines` are `(id, status)` pairs; start PCs are derived from the
    /// id. Goroutine 0 in the list drives start/stop.
    pub fn new(nprocs: usize, goroutines: &[(u64, GoStatus)]) -> TestWorld {
        TestWorld {
            procs: (0..nprocs).map(|i| Processor::new(i as i32)).collect(),
            goroutines: goroutines
                .iter()
                .map(|&(id, status)| Goroutine::new(id, 0x4000 + id, status))
                .collect(),
        }
    }

    pub fn view(&mut self) -> World<'_> {
        World {
            procs: &mut self.procs,
            goroutines: &mut self.goroutines,
            current_proc: 0,
            current_go: 0,
            current_thread: 7,
        }
    }
}

/// Drain the tracer from a dedicated thread until it reports end of stream.
pub fn spawn_reader(tracer: &Arc<Tracer>) -> JoinHandle<Vec<u8>> {
    let tracer = tracer.clone();
    std::thread::spawn(move || {
        let mut out = Vec::new();
        while let Some(chunk) = tracer.read() {
            out.extend(chunk);
        }
        out
    })
}
