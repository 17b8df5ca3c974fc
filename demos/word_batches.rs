//! Word frequency counter over batched input lines
//!
//! Reads lines from stdin, batches them, and prints the running top words
//! after every batch.
//!
//! Usage: cargo run --example word_batches
//!        (Then type lines of text and press Ctrl-D to finish)

use std::collections::HashMap;
use std::io::{self, BufRead};
use std::time::Duration;
use stream_batcher::{Batcher, BoxError, Processor};

/// Processor that counts words across batches
struct WordCounter {
    counts: HashMap<String, usize>,
    lines_seen: usize,
}

impl WordCounter {
    fn new() -> Self {
        Self {
            counts: HashMap::new(),
            lines_seen: 0,
        }
    }

    fn top_n(&self, n: usize) -> Vec<(&str, usize)> {
        let mut items: Vec<_> = self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        items.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        items.into_iter().take(n).collect()
    }
}

impl Processor<String> for WordCounter {
    fn process(&mut self, batch: Vec<String>) -> Result<(), BoxError> {
        self.lines_seen += batch.len();
        for line in &batch {
            for word in line.split_whitespace() {
                let cleaned: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                if cleaned.len() > 2 {
                    *self.counts.entry(cleaned).or_insert(0) += 1;
                }
            }
        }

        println!("\n=== Top 10 Words (after {} lines) ===", self.lines_seen);
        for (i, (word, count)) in self.top_n(10).iter().enumerate() {
            println!("{:2}. {} ({})", i + 1, word, count);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "word_counter"
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Word Frequency Counter");
    println!("======================");
    println!("Enter lines of text (Ctrl-D to finish):");
    println!();

    let batcher = Batcher::<String>::builder()
        .name("words")
        .batch_size(100)
        .batch_interval(Duration::from_secs(2))
        .processor(WordCounter::new())
        .build()?;

    for line in io::stdin().lock().lines() {
        batcher.add(line?);
    }

    batcher.close()?;
    println!("\n\nProcessing complete!");
    Ok(())
}
