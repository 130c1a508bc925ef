use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use prosper::{scope, ExperimentConfig, Pick, Registry, Symbol, Variant};

fn registry(symbols: &[Symbol]) -> Registry {
    let mut registry = Registry::new();
    for (i, symbol) in symbols.iter().enumerate() {
        let experiment = ExperimentConfig::new(format!("experiment-{i}"))
            .variant(Variant::new("control").with_pick(symbol, i as i64))
            .variant(Variant::new("b").with_pick(symbol, -(i as i64)))
            .enabled(true)
            .to_experiment()
            .unwrap();
        registry.add(experiment).unwrap();
    }
    registry
}

fn criterion_benchmark(c: &mut Criterion) {
    let symbols: Vec<Symbol> = (0..100).map(|i| Symbol::new(format!("pick-{i}"))).collect();
    let registry = Arc::new(registry(&symbols));
    let symbol = symbols[42].clone();

    {
        let mut group = c.benchmark_group("registry");
        group.throughput(Throughput::Elements(1));
        group.bench_function("resolve", |b| {
            b.iter(|| registry.resolve(black_box(&symbol)).unwrap())
        });
        group.bench_function("pick", |b| {
            b.iter(|| registry.pick::<i64>(black_box(&symbol)).unwrap())
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("accessor");
        group.throughput(Throughput::Elements(1));

        let fixed: Pick<i64> = Pick::from_registry(registry.clone(), symbol.clone());
        group.bench_function("from_registry", |b| b.iter(|| fixed.get().unwrap()));

        let scoped: Pick<i64> = prosper::pick(symbol.clone());
        let guard = scope::bind(registry.clone()).unwrap();
        group.bench_function("from_scope", |b| b.iter(|| scoped.get().unwrap()));
        guard.exit();

        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
