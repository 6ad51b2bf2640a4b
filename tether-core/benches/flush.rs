//! Benchmark: notification and flush throughput

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tether_core::dom::{Binder, Bindings, Document, ElementCache};
use tether_core::Runtime;

fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    for readers in [1usize, 10, 100] {
        let rt = Runtime::new();
        let state = rt.state(json!({"n": 0}));
        let effects: Vec<_> = (0..readers)
            .map(|_| {
                let source = state.clone();
                rt.effect(move || {
                    black_box(source.value("n"));
                })
            })
            .collect();

        let mut n = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, _| {
            b.iter(|| {
                n += 1;
                state.set("n", n);
            })
        });
        drop(effects);
    }
    group.finish();
}

fn benchmark_batched_writes(c: &mut Criterion) {
    let rt = Runtime::new();
    let state = rt.state(json!({"n": 0}));
    let source = state.clone();
    let _effect = rt.effect(move || {
        black_box(source.value("n"));
    });

    let mut n = 0i64;
    c.bench_function("batch_100_writes", |b| {
        b.iter(|| {
            rt.batch(|| {
                for _ in 0..100 {
                    n += 1;
                    state.set("n", n);
                }
            })
        })
    });
}

fn benchmark_array_push(c: &mut Criterion) {
    let rt = Runtime::new();
    let list = rt.collection(Vec::new());
    let source = list.clone();
    let _effect = rt.effect(move || {
        black_box(source.len());
    });

    c.bench_function("array_push", |b| b.iter(|| list.push(1)));
}

fn benchmark_binding_update(c: &mut Criterion) {
    let rt = Runtime::new();
    let doc = Document::new();
    let label = doc.create_element("span");
    label.set_id(Some("label"));
    doc.body().append_child(&label);

    let binder = Binder::new(&rt, Rc::new(ElementCache::new(&doc)), &doc);
    let state = rt.state(json!({"text": ""}));
    let source = state.clone();
    let _handle = binder.bind(Bindings::new().text("#label", move || source.value("text")));

    let mut n = 0u64;
    c.bench_function("binding_update", |b| {
        b.iter(|| {
            n += 1;
            state.set("text", n.to_string());
        })
    });
}

criterion_group!(
    benches,
    benchmark_fan_out,
    benchmark_batched_writes,
    benchmark_array_push,
    benchmark_binding_update
);
criterion_main!(benches);
