//! 方式ごと・スレッド数ごとのターン制カウンタのスループット

use std::num::NonZeroUsize;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use lstest::{run, Strategy};

const TARGET: u64 = 10_000;

fn bench_turn_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("turn_contention");
    group.sample_size(10);

    let base = lstest::config::detect_threads().get();
    for strategy in Strategy::ALL {
        for threads in [base, base * 2] {
            let threads = NonZeroUsize::new(threads).unwrap();
            group.bench_with_input(
                BenchmarkId::new(strategy.label(), threads),
                &threads,
                |b, &threads| {
                    // カウンタは毎回新しく作る
                    b.iter(|| run(threads, TARGET, &strategy.counter()).unwrap());
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_turn_contention);
criterion_main!(benches);
