//! End-to-end scenarios over the hook surface.

mod common;

use std::sync::Arc;

use assert2::check;
use common::{FakeClock, ScriptedUnwinder, TestSymbolizer, TestWorld, spawn_reader};
use exectrace::decode;
use exectrace::{EventKind, FUTILE_WAKEUP, GoStatus, Tracer};

fn build_tracer(frames: Vec<u64>) -> Arc<Tracer> {
    Arc::new(
        Tracer::builder()
            .clock(FakeClock::new())
            .unwinder(ScriptedUnwinder::new(frames))
            .symbolizer(Arc::new(TestSymbolizer))
            .build(),
    )
}

#[test]
fn test_futile_wakeup_precedes_block_event() {
    let tracer = build_tracer(vec![0x100, 0x200, 0x300]);
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    tracer.go_park(
        Some(&mut world.procs[0]),
        EventKind::GoBlockSync as u8 | FUTILE_WAKEUP,
        1,
    );
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let batch = trace
        .batches
        .iter()
        .find(|b| b.events.iter().any(|e| e.kind == EventKind::FutileWakeup))
        .unwrap();
    let at = batch
        .events
        .iter()
        .position(|e| e.kind == EventKind::FutileWakeup)
        .unwrap();
    let block = &batch.events[at + 1];
    check!(block.kind == EventKind::GoBlockSync);
    let stack_id = block.stack_id.unwrap();
    check!(stack_id != 0);
    let pcs: Vec<u64> = trace.stack(stack_id).unwrap().frames.iter().map(|f| f.pc).collect();
    check!(pcs == vec![0x100, 0x200, 0x300]);
}

#[test]
fn test_small_buffers_rotate_into_multiple_batches() {
    let tracer = Arc::new(
        Tracer::builder()
            .clock(FakeClock::new())
            .buffer_bytes(256)
            .build(),
    );
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    for _ in 0..300 {
        tracer.go_end(Some(&mut world.procs[0]));
    }
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let proc_batches: Vec<_> = trace
        .batches
        .iter()
        .filter(|b| b.proc_id == 0 && !b.events.is_empty())
        .collect();
    check!(proc_batches.len() >= 3);
    // Each rotation opens at or past the previous buffer's last tick.
    for pair in proc_batches.windows(2) {
        let prev_max = pair[0].events.last().unwrap().tick;
        check!(pair[1].start_tick >= prev_max);
    }
    let total: usize = proc_batches
        .iter()
        .map(|b| b.events.iter().filter(|e| e.kind == EventKind::GoEnd).count())
        .sum();
    check!(total == 300);
}

#[test]
fn test_same_stack_from_two_processors_interns_once() {
    let tracer = build_tracer(vec![0x100, 0x200, 0x300]);
    let mut world = TestWorld::new(2, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    tracer.go_park(Some(&mut world.procs[0]), EventKind::GoBlock as u8, 1);
    tracer.go_park(Some(&mut world.procs[1]), EventKind::GoBlock as u8, 1);
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let ids: Vec<u64> = trace
        .events()
        .filter(|e| e.kind == EventKind::GoBlock)
        .map(|e| e.stack_id.unwrap())
        .collect();
    check!(ids.len() == 2);
    check!(ids[0] == ids[1]);
    let records = trace.stacks.iter().filter(|s| s.id == ids[0]).count();
    check!(records == 1);
}

#[test]
fn test_syscall_exit_tick_before_start_is_zeroed() {
    let tracer = build_tracer(vec![]);
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running), (2, GoStatus::Syscall)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    // An exit tick captured before tracing began; racing with start.
    let (procs, gos) = (&mut world.procs, &mut world.goroutines);
    tracer.go_sys_exit(Some(&mut procs[0]), &mut gos[1], 1);
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let exit = trace
        .events()
        .find(|e| e.kind == EventKind::GoSysExit)
        .unwrap();
    check!(exit.args[0] == 2);
    // seq 1 was consumed by the GoInSyscall snapshot.
    check!(exit.args[1] == 2);
    check!(exit.args[2] == 0);
}

#[test]
fn test_terminator_frames_are_trimmed() {
    const GOEXIT: u64 = 0xdead;
    let tracer = Arc::new(
        Tracer::builder()
            .clock(FakeClock::new())
            .unwinder(ScriptedUnwinder::new(vec![0x100, 0x200, GOEXIT]))
            .symbolizer(Arc::new(TestSymbolizer))
            .terminator_pcs(vec![GOEXIT])
            .build(),
    );
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    tracer.go_park(Some(&mut world.procs[0]), EventKind::GoBlock as u8, 1);
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let block = trace.events().find(|e| e.kind == EventKind::GoBlock).unwrap();
    let pcs: Vec<u64> = trace
        .stack(block.stack_id.unwrap())
        .unwrap()
        .frames
        .iter()
        .map(|f| f.pc)
        .collect();
    check!(pcs == vec![0x100, 0x200]);
}

#[test]
fn test_cpu_samples_are_merged_into_the_stream() {
    let tracer = build_tracer(vec![]);
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    tracer.cpu_sample(Some(0), 9, &[0x500, 0x600]);
    tracer.cpu_sample(None, 0, &[0x700]);
    tracer.stop(&mut world.view());
    // Samples after stop are discarded.
    tracer.cpu_sample(Some(0), 9, &[0x999]);
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let samples: Vec<_> = trace
        .events()
        .filter(|e| e.kind == EventKind::CPUSample)
        .collect();
    check!(samples.len() == 2);

    let on_proc = samples.iter().find(|e| e.args[2] == 9).unwrap();
    check!(on_proc.args[1] == 0);
    let pcs: Vec<u64> = trace
        .stack(on_proc.stack_id.unwrap())
        .unwrap()
        .frames
        .iter()
        .map(|f| f.pc)
        .collect();
    check!(pcs == vec![0x500, 0x600]);

    // Samples with no processor carry the max-u64 sentinel.
    let off_proc = samples.iter().find(|e| e.args[2] == 0).unwrap();
    check!(off_proc.args[1] == u64::MAX);
}

#[test]
fn test_sample_ring_overflow_drops_quietly() {
    let tracer = Arc::new(
        Tracer::builder()
            .clock(FakeClock::new())
            .ring_words(64)
            .build(),
    );
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    for i in 0..50u64 {
        tracer.cpu_sample(Some(0), i, &[0x10, 0x20, 0x30, 0x40]);
    }
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();
    let samples = trace
        .events()
        .filter(|e| e.kind == EventKind::CPUSample)
        .count();
    check!(samples > 0);
    check!(samples < 50);
}

#[test]
fn test_user_annotations_round_trip() {
    let tracer = build_tracer(vec![0x100]);
    let mut world = TestWorld::new(1, &[(1, GoStatus::Running)]);

    tracer.start(&mut world.view()).unwrap();
    let reader = spawn_reader(&tracer);
    let p = &mut world.procs[0];
    tracer.user_task_create(Some(&mut *p), 11, 0, "backup");
    tracer.user_region(Some(&mut *p), 11, 0, "copy");
    tracer.user_log(Some(&mut *p), 11, "files", "n=42");
    tracer.user_region(Some(&mut *p), 11, 1, "copy");
    tracer.user_task_end(Some(&mut *p), 11);
    tracer.stop(&mut world.view());
    let bytes = reader.join().unwrap();

    let trace = decode::parse(&bytes).unwrap();

    let create = trace
        .events()
        .find(|e| e.kind == EventKind::UserTaskCreate)
        .unwrap();
    check!(create.args[0] == 11);
    check!(create.args[1] == 0);
    check!(trace.string_text(create.args[2]).as_deref() == Some("backup"));

    let regions: Vec<_> = trace
        .events()
        .filter(|e| e.kind == EventKind::UserRegion)
        .collect();
    check!(regions.len() == 2);
    check!(regions[0].args[1] == 0);
    check!(regions[1].args[1] == 1);
    // Both regions reference one dictionary entry.
    check!(regions[0].args[2] == regions[1].args[2]);
    check!(trace.string_text(regions[0].args[2]).as_deref() == Some("copy"));

    let log = trace.events().find(|e| e.kind == EventKind::UserLog).unwrap();
    check!(trace.string_text(log.args[1]).as_deref() == Some("files"));
    check!(log.payload.as_deref() == Some(b"n=42".as_slice()));

    let end = trace
        .events()
        .find(|e| e.kind == EventKind::UserTaskEnd)
        .unwrap();
    check!(end.args[0] == 11);
}
