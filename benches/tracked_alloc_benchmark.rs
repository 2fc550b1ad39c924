use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use std::alloc::{alloc, dealloc, Layout};
use tally::{site, AllocatorConfig, TrackedAllocator};

fn bench_alloc_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("Single Allocation");
    let tracked = TrackedAllocator::new();

    group.bench_function("std::alloc 64B", |b| {
        let layout = Layout::from_size_align(64, 16).unwrap();
        b.iter(|| unsafe {
            let ptr = alloc(layout);
            black_box(ptr);
            dealloc(ptr, layout);
        })
    });

    group.bench_function("TrackedAllocator 64B", |b| {
        b.iter(|| unsafe {
            let ptr = tracked.allocate(64, site!()).unwrap();
            tracked.deallocate(black_box(ptr).as_ptr(), site!());
        })
    });

    // The operation log grows without bound, so each batch gets a fresh allocator.
    group.bench_function("TrackedAllocator 64B + operation log", |b| {
        b.iter_batched(
            || TrackedAllocator::with_config(AllocatorConfig::default().with_operation_log(true)),
            |fresh| unsafe {
                let ptr = fresh.allocate(64, site!()).unwrap();
                fresh.deallocate(black_box(ptr).as_ptr(), site!());
                fresh
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_alloc_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("Batch Allocation 1000");
    const BATCH_SIZE: usize = 1000;

    group.bench_function("Box::new", |b| {
        b.iter(|| {
            let mut v = Vec::with_capacity(BATCH_SIZE);
            for i in 0..BATCH_SIZE {
                v.push(Box::new(i));
            }
            black_box(v);
        })
    });

    let tracked = TrackedAllocator::new();
    group.bench_function("construct_one/destroy", |b| {
        b.iter(|| {
            let mut v = Vec::with_capacity(BATCH_SIZE);
            for i in 0..BATCH_SIZE {
                v.push(tracked.construct_one(i).unwrap());
            }
            for ptr in v {
                unsafe { tracked.destroy(black_box(ptr).as_ptr()) };
            }
        })
    });

    group.finish();
}

fn bench_construct_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("Array Construction");
    let tracked = TrackedAllocator::new();

    for n in [16usize, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("vec![String; n]", n), &n, |b, &n| {
            b.iter(|| black_box(vec![String::from("element"); n]))
        });
        group.bench_with_input(BenchmarkId::new("construct_array<String>", n), &n, |b, &n| {
            b.iter(|| unsafe {
                let ptr = tracked.construct_array(n, String::from("element")).unwrap();
                tracked.destroy(black_box(ptr).as_ptr());
            })
        });
    }

    group.finish();
}

fn bench_realloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reallocation");
    let tracked = TrackedAllocator::new();

    group.bench_function("grow 16B -> 4KiB", |b| {
        b.iter(|| unsafe {
            let ptr = tracked.allocate(16, site!()).unwrap();
            let grown = tracked.reallocate(ptr.as_ptr(), 4096, site!()).unwrap();
            tracked.deallocate(black_box(grown).as_ptr(), site!());
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_single,
    bench_alloc_batch,
    bench_construct_array,
    bench_realloc
);
criterion_main!(benches);
