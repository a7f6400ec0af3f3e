use bloom::CountingBloomFilter;
use criterion::{criterion_group, criterion_main, Criterion};

const N_TOKENS: usize = 10_000;

fn tokens() -> Vec<Vec<u8>> {
    (0..N_TOKENS)
        .map(|i| format!("token{i}").into_bytes())
        .collect()
}

fn bloom_add_benchmark(c: &mut Criterion) {
    let tokens = tokens();
    c.bench_function("bloom_add_del_10k", |b| {
        let mut filter = CountingBloomFilter::with_default_hashes(1 << 20, 4);
        b.iter(|| {
            for t in &tokens {
                filter.add(t);
            }
            for t in &tokens {
                filter.del(t);
            }
        });
    });
}

fn bloom_check_benchmark(c: &mut Criterion) {
    let tokens = tokens();
    let mut filter = CountingBloomFilter::with_default_hashes(1 << 20, 4);
    for t in tokens.iter().step_by(2) {
        filter.add(t);
    }

    c.bench_function("bloom_check_10k", |b| {
        b.iter(|| tokens.iter().filter(|t| filter.check(t)).count());
    });
}

criterion_group!(benches, bloom_add_benchmark, bloom_check_benchmark);
criterion_main!(benches);
