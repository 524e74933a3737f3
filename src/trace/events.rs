//! Event types of the binary trace stream.
//!
//! One header byte packs the event type (low 6 bits) and the argument count
//! (high 2 bits), so type ids must stay below 64. Id 0 is reserved.

use serde::Serialize;

/// Shift of the argument count within the header byte.
pub(crate) const ARG_COUNT_SHIFT: u32 = 6;

/// Flag passed to [`crate::Tracer::go_park`] to mark the previous wakeup of
/// the parking goroutine as futile: it was unblocked, but another goroutine
/// got to the resource first and it has to block again.
pub const FUTILE_WAKEUP: u8 = 0x80;

/// Closed set of trace event kinds. Arguments in brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum EventKind {
    /// Start of a per-processor buffer [processor id, opening tick].
    Batch = 1,
    /// Tracer timer frequency footer [ticks per second].
    Frequency = 2,
    /// Interned stack [stack id, frame count, {pc, func str id, file str id, line}...].
    Stack = 3,
    /// Processor-count change [timestamp, count, stack id].
    Gomaxprocs = 4,
    /// Processor starts running [timestamp, thread id].
    ProcStart = 5,
    /// Processor stops [timestamp].
    ProcStop = 6,
    /// GC cycle start [timestamp, seq, stack id].
    GCStart = 7,
    /// GC cycle done [timestamp].
    GCDone = 8,
    /// GC stop-the-world start [timestamp, kind].
    GCSTWStart = 9,
    /// GC stop-the-world done [timestamp].
    GCSTWDone = 10,
    /// GC sweep start [timestamp, stack id].
    GCSweepStart = 11,
    /// GC sweep done [timestamp, swept bytes, reclaimed bytes].
    GCSweepDone = 12,
    /// Goroutine creation [timestamp, new goroutine id, start stack id, stack id].
    GoCreate = 13,
    /// Goroutine starts running [timestamp, goroutine id, seq].
    GoStart = 14,
    /// Goroutine ends [timestamp].
    GoEnd = 15,
    /// Goroutine stops forever [timestamp, stack id].
    GoStop = 16,
    /// Goroutine yields [timestamp, stack id].
    GoSched = 17,
    /// Goroutine is preempted [timestamp, stack id].
    GoPreempt = 18,
    /// Goroutine sleeps [timestamp, stack id].
    GoSleep = 19,
    /// Goroutine blocks [timestamp, stack id].
    GoBlock = 20,
    /// Goroutine is unblocked [timestamp, goroutine id, seq, stack id].
    GoUnblock = 21,
    /// Blocked on channel send [timestamp, stack id].
    GoBlockSend = 22,
    /// Blocked on channel receive [timestamp, stack id].
    GoBlockRecv = 23,
    /// Blocked on select [timestamp, stack id].
    GoBlockSelect = 24,
    /// Blocked on a mutex [timestamp, stack id].
    GoBlockSync = 25,
    /// Blocked on a condition variable [timestamp, stack id].
    GoBlockCond = 26,
    /// Blocked on network I/O [timestamp, stack id].
    GoBlockNet = 27,
    /// Syscall enter [timestamp, stack id].
    GoSysCall = 28,
    /// Syscall exit [timestamp, goroutine id, seq, real timestamp].
    GoSysExit = 29,
    /// Syscall blocks [timestamp].
    GoSysBlock = 30,
    /// Goroutine was blocked when tracing started [timestamp, goroutine id].
    GoWaiting = 31,
    /// Goroutine was in a syscall when tracing started [timestamp, goroutine id].
    GoInSyscall = 32,
    /// Live heap size change [timestamp, heap live bytes].
    HeapAlloc = 33,
    /// Heap goal change [timestamp, goal bytes].
    HeapGoal = 34,
    /// Reserved; no longer emitted.
    TimerGoroutine = 35,
    /// The previous wakeup of this goroutine was futile [timestamp].
    FutileWakeup = 36,
    /// String dictionary entry [id, length, bytes].
    String = 37,
    /// Goroutine starts on the same processor as its last event [timestamp, goroutine id].
    GoStartLocal = 38,
    /// Goroutine unblocked on the same processor [timestamp, goroutine id, stack id].
    GoUnblockLocal = 39,
    /// Syscall exit on the same processor [timestamp, goroutine id, real timestamp].
    GoSysExitLocal = 40,
    /// Goroutine starts with a worker label [timestamp, goroutine id, seq, label str id].
    GoStartLabel = 41,
    /// Blocked on GC assist [timestamp, stack id].
    GoBlockGC = 42,
    /// GC mark assist start [timestamp, stack id].
    GCMarkAssistStart = 43,
    /// GC mark assist done [timestamp].
    GCMarkAssistDone = 44,
    /// User task creation [timestamp, task id, parent id, type str id, stack id].
    UserTaskCreate = 45,
    /// User task end [timestamp, task id, stack id].
    UserTaskEnd = 46,
    /// User region [timestamp, task id, mode, name str id, stack id].
    UserRegion = 47,
    /// User log [timestamp, task id, key str id, stack id], then the value string.
    UserLog = 48,
    /// CPU profiling sample [timestamp, real timestamp, real processor id, goroutine id, stack id].
    CPUSample = 49,
}

impl EventKind {
    pub fn from_u8(v: u8) -> Option<EventKind> {
        use EventKind::*;
        Some(match v {
            1 => Batch,
            2 => Frequency,
            3 => Stack,
            4 => Gomaxprocs,
            5 => ProcStart,
            6 => ProcStop,
            7 => GCStart,
            8 => GCDone,
            9 => GCSTWStart,
            10 => GCSTWDone,
            11 => GCSweepStart,
            12 => GCSweepDone,
            13 => GoCreate,
            14 => GoStart,
            15 => GoEnd,
            16 => GoStop,
            17 => GoSched,
            18 => GoPreempt,
            19 => GoSleep,
            20 => GoBlock,
            21 => GoUnblock,
            22 => GoBlockSend,
            23 => GoBlockRecv,
            24 => GoBlockSelect,
            25 => GoBlockSync,
            26 => GoBlockCond,
            27 => GoBlockNet,
            28 => GoSysCall,
            29 => GoSysExit,
            30 => GoSysBlock,
            31 => GoWaiting,
            32 => GoInSyscall,
            33 => HeapAlloc,
            34 => HeapGoal,
            35 => TimerGoroutine,
            36 => FutileWakeup,
            37 => String,
            38 => GoStartLocal,
            39 => GoUnblockLocal,
            40 => GoSysExitLocal,
            41 => GoStartLabel,
            42 => GoBlockGC,
            43 => GCMarkAssistStart,
            44 => GCMarkAssistDone,
            45 => UserTaskCreate,
            46 => UserTaskEnd,
            47 => UserRegion,
            48 => UserLog,
            49 => CPUSample,
            _ => return None,
        })
    }

    /// Whether events of this kind carry a trailing stack id.
    pub fn has_stack(self) -> bool {
        use EventKind::*;
        matches!(
            self,
            Gomaxprocs
                | GCStart
                | GCSweepStart
                | GoCreate
                | GoStop
                | GoSched
                | GoPreempt
                | GoSleep
                | GoBlock
                | GoUnblock
                | GoBlockSend
                | GoBlockRecv
                | GoBlockSelect
                | GoBlockSync
                | GoBlockCond
                | GoBlockNet
                | GoSysCall
                | GoUnblockLocal
                | GoBlockGC
                | GCMarkAssistStart
                | UserTaskCreate
                | UserTaskEnd
                | UserRegion
                | UserLog
                | CPUSample
        )
    }
}
