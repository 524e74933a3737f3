//! Overhead of the emit fast path, with a reader draining in the background.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use exectrace::{GoStatus, Goroutine, Processor, Tracer, World};

fn bench_emit(c: &mut Criterion) {
    let tracer = Arc::new(Tracer::builder().build());

    let mut procs = vec![Processor::new(0)];
    let mut goroutines = vec![Goroutine::new(1, 0x1000, GoStatus::Running)];
    {
        let mut world = World {
            procs: &mut procs,
            goroutines: &mut goroutines,
            current_proc: 0,
            current_go: 0,
            current_thread: 1,
        };
        tracer.start(&mut world).unwrap();
    }

    let reader = {
        let tracer = tracer.clone();
        std::thread::spawn(move || while tracer.read().is_some() {})
    };

    c.bench_function("emit_no_args", |b| {
        b.iter(|| tracer.go_end(Some(black_box(&mut procs[0]))));
    });

    c.bench_function("emit_two_args", |b| {
        b.iter(|| tracer.heap_alloc(Some(black_box(&mut procs[0])), black_box(1 << 20)));
    });

    c.bench_function("emit_disabled", |b| {
        let disabled = Tracer::builder().build();
        let mut p = Processor::new(1);
        b.iter(|| disabled.go_end(Some(black_box(&mut p))));
    });

    {
        let mut world = World {
            procs: &mut procs,
            goroutines: &mut goroutines,
            current_proc: 0,
            current_go: 0,
            current_thread: 1,
        };
        tracer.stop(&mut world);
    }
    reader.join().unwrap();
}

criterion_group!(benches, bench_emit);
criterion_main!(benches);
