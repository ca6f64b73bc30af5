use criterion::{black_box, criterion_group, criterion_main, Criterion};
use napi_bridge::{
    Boundary, Env, Environment, HostConfig, Method, ModuleRecord, ModuleTable, Runtime, Value, register_exports,
    register_module,
};

fn bench_init(env: &mut dyn Boundary, exports: Value) -> Option<Value> {
    let table = ModuleTable::new()
        .method(Method::new("add", |(a, b): (f64, f64)| Ok(a + b)));
    register_exports(env, exports, table)
}

static BENCH: ModuleRecord = ModuleRecord::new("bench", bench_init);

fn bench_double_round_trip(c: &mut Criterion) {
    c.bench_function("double round trip 1k", |b| {
        b.iter(|| {
            let mut host = Environment::new(HostConfig::default());
            let mut env = Env::new(&mut host);
            let mut sum = 0.0;
            for i in 0..1000 {
                let value = env.to_host(&(i as f64)).unwrap();
                sum += env.from_host::<f64>(value).unwrap();
            }
            black_box(sum)
        })
    });
}

fn bench_string_round_trip(c: &mut Criterion) {
    let text = "the quick brown fox jumps over the lazy dog";

    c.bench_function("string round trip 1k", |b| {
        b.iter(|| {
            let mut host = Environment::new(HostConfig::default());
            let mut env = Env::new(&mut host);
            let mut buf = [0u8; 64];
            let mut total = 0;
            for _ in 0..1000 {
                let value = env.to_host(text).unwrap();
                total += env.copy_string_exact(value, &mut buf).unwrap();
            }
            black_box(total)
        })
    });
}

fn bench_array_build(c: &mut Criterion) {
    let items: Vec<f64> = (0..1000).map(|i| i as f64).collect();

    c.bench_function("array build 1k", |b| {
        b.iter(|| {
            let mut host = Environment::new(HostConfig::default());
            let mut env = Env::new(&mut host);
            let array = env.to_host(&items).unwrap();
            black_box(env.from_host::<Vec<f64>>(array).unwrap())
        })
    });
}

fn bench_method_call(c: &mut Criterion) {
    let _ = register_module(&BENCH);
    let mut runtime = Runtime::default();

    c.bench_function("method call 1k", |b| {
        b.iter(|| {
            let module = runtime.load("bench").unwrap();
            let (x, y) = {
                let mut env = module.env();
                (env.to_host(&1.5).unwrap(), env.to_host(&2.5).unwrap())
            };
            for _ in 0..1000 {
                black_box(module.call("add", &[x, y]).unwrap());
            }
            runtime.unload("bench");
        })
    });
}

criterion_group!(
    benches,
    bench_double_round_trip,
    bench_string_round_trip,
    bench_array_build,
    bench_method_call,
);

criterion_main!(benches);
