//! Byte-bounded event sink
//!
//! Batches JSON events by estimated size and reports simulated write failures
//! from the error stream.
//!
//! Usage: RUST_LOG=debug cargo run --example event_sink

use serde_json::{json, Value};
use std::thread;
use std::time::Duration;
use stream_batcher::{Batcher, BoxError};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut writes = 0usize;
    let batcher = Batcher::<Value>::builder()
        .name("events")
        .batch_size(500)
        .batch_size_bytes(16 * 1024)
        .batch_interval(Duration::from_millis(200))
        .processor(move |batch: Vec<Value>| -> Result<(), BoxError> {
            writes += 1;
            if writes % 7 == 0 {
                return Err(format!("write #{writes} rejected by sink").into());
            }
            println!("wrote {} events", batch.len());
            Ok(())
        })
        .build()?;

    let errors = batcher.errors();
    let reporter = thread::spawn(move || {
        for err in errors.iter() {
            eprintln!("sink error: {err}");
        }
    });

    for i in 0..2_000 {
        batcher.add(json!({
            "id": i,
            "kind": if i % 3 == 0 { "click" } else { "view" },
            "tags": ["web", "eu-west"],
        }));
        if i % 250 == 0 {
            thread::sleep(Duration::from_millis(50));
        }
    }

    batcher.close()?;
    reporter.join().expect("Reporter thread panicked");

    println!("\n{}", batcher.metrics().snapshot().format());
    Ok(())
}
