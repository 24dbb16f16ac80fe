//! Throughput benchmarks for query containers
//!
//! Compares row and columnar execution and the cost of checkpoints.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempo_processor::prelude::*;
use tempo_types::{row, StreamEvent};

fn events(count: i64) -> Vec<StreamEvent> {
    (0..count)
        .map(|i| StreamEvent::interval(i, i + 1 + i % 17, row![i % 64, i % 1000]))
        .collect()
}

fn windowed(config: ProcessorConfig) -> (QueryContainer, InputHandle, OutputHandle) {
    let mut container = QueryContainer::new(config).unwrap();
    let input = container.register_input("in", IngressPolicy::default()).unwrap();
    let sums = input
        .stream()
        .filter(Expr::field(1).gt(Expr::lit(100)))
        .unwrap()
        .window_aggregate(WindowSpec::hopping(1_000, 250), KeySelector::fields(&[0]), Aggregate::sum(Expr::field(1)))
        .unwrap();
    let output = container.register_output(&sums).unwrap();
    container.restore(None).unwrap();
    (container, input, output)
}

fn bench_execution_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("hopping_sum");
    for size in [10_000i64, 100_000] {
        let input_events = events(size);
        group.throughput(Throughput::Elements(size as u64));
        for (name, config) in [
            ("row", ProcessorConfig::default().with_force_row_based_execution(true)),
            ("columnar", ProcessorConfig::default()),
            ("columnar_sharded", ProcessorConfig::default().with_reduce_arity(4)),
        ] {
            group.bench_with_input(BenchmarkId::new(name, size), &input_events, |b, input_events| {
                b.iter(|| {
                    let (mut container, input, mut output) = windowed(config.clone());
                    container.on_next_batch(&input, input_events.iter().cloned()).unwrap();
                    container.on_completed(&input).unwrap();
                    black_box(output.drain().len());
                });
            });
        }
    }
    group.finish();
}

fn bench_anti_join(c: &mut Criterion) {
    let input_events = events(50_000);
    let mut group = c.benchmark_group("where_not_exists");
    group.throughput(Throughput::Elements(input_events.len() as u64));
    group.bench_function("self_empty_right", |b| {
        b.iter(|| {
            let mut container = QueryContainer::new(ProcessorConfig::default()).unwrap();
            let input = container.register_input("in", IngressPolicy::default()).unwrap();
            let a = input.stream();
            let survivors = a
                .where_not_exists(
                    &a.filter(Expr::lit(false)).unwrap(),
                    KeySelector::fields(&[0]),
                    KeySelector::fields(&[0]),
                )
                .unwrap();
            let mut output = container.register_output(&survivors).unwrap();
            container.restore(None).unwrap();
            for (i, event) in input_events.iter().enumerate() {
                container.on_next(&input, event.clone()).unwrap();
                if i % 5_000 == 4_999 {
                    container
                        .on_next(&input, StreamEvent::punctuation(event.sync_time))
                        .unwrap();
                }
            }
            container.on_completed(&input).unwrap();
            black_box(output.drain().len());
        });
    });
    group.finish();
}

fn bench_checkpoint(c: &mut Criterion) {
    let (mut container, input, _output) = windowed(ProcessorConfig::default());
    container.on_next_batch(&input, events(20_000)).unwrap();

    let mut group = c.benchmark_group("checkpoint");
    group.bench_function("take", |b| {
        b.iter(|| black_box(container.checkpoint().unwrap().len()));
    });
    let blob = container.checkpoint().unwrap();
    group.bench_function("restore", |b| {
        b.iter(|| {
            let mut fresh = QueryContainer::new(ProcessorConfig::default()).unwrap();
            let input = fresh.register_input("in", IngressPolicy::default()).unwrap();
            input
                .stream()
                .filter(Expr::field(1).gt(Expr::lit(100)))
                .unwrap()
                .window_aggregate(WindowSpec::hopping(1_000, 250), KeySelector::fields(&[0]), Aggregate::sum(Expr::field(1)))
                .unwrap();
            fresh.restore(Some(black_box(&blob))).unwrap();
        });
    });
    group.finish();
}

criterion_group!(benches, bench_execution_modes, bench_anti_join, bench_checkpoint);
criterion_main!(benches);
