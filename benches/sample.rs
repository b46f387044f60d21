use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use slice_nuts::test_logps::NormalLogp;
use slice_nuts::{new_chain, Chain, Model, NutsChain, NutsSettings};

fn make_chain(dim: usize, mu: f64) -> NutsChain<NormalLogp, rand_chacha::ChaCha8Rng> {
    let model = NormalLogp::new(dim, mu);
    let start = model.layout().filled(3.5);
    let settings = NutsSettings {
        seed: 42,
        ..Default::default()
    };
    let mut chain = new_chain(model, &settings, 0).unwrap();
    chain.set_position(&start).unwrap();
    chain
}

fn criterion_benchmark(c: &mut Criterion) {
    for dim in [10, 1000] {
        c.bench_function(&format!("make chain {}", dim), |b| {
            b.iter(|| make_chain(black_box(dim), black_box(3.)))
        });

        c.bench_function(&format!("draw normal {}", dim), |b| {
            b.iter_batched(
                || make_chain(dim, 3.),
                |mut chain| {
                    for _ in 0..10 {
                        black_box(chain.draw().unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
