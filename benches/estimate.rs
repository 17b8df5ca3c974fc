use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::collections::HashMap;
use std::hint::black_box;
use stream_batcher::estimate_size;

struct Order {
    id: u64,
    customer: String,
    lines: Vec<(String, u32)>,
    attributes: HashMap<String, String>,
}

stream_batcher::impl_estimate_size!(Order { id, customer, lines, attributes });

fn benchmark_record_estimate(c: &mut Criterion) {
    let order = Order {
        id: 42,
        customer: "ada@example.com".to_string(),
        lines: (0..50).map(|i| (format!("sku-{i}"), i)).collect(),
        attributes: (0..20)
            .map(|i| (format!("key-{i}"), format!("value-{i}")))
            .collect(),
    };

    c.bench_function("estimate_record", |b| {
        b.iter(|| estimate_size(black_box(&order)));
    });
}

fn benchmark_json_estimate(c: &mut Criterion) {
    let doc = json!({
        "event": "checkout",
        "user": {"id": 7, "name": "ada", "tags": ["a", "b", "c"]},
        "items": (0..100).map(|i| json!({"sku": i, "qty": 1})).collect::<Vec<_>>(),
    });

    c.bench_function("estimate_json_document", |b| {
        b.iter(|| estimate_size(black_box(&doc)));
    });
}

criterion_group!(benches, benchmark_record_estimate, benchmark_json_estimate);
criterion_main!(benches);
