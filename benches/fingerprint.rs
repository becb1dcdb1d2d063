//! Benchmarks for fingerprint derivation performance
//!
//! This benchmark measures:
//! - Digest cost for small and large prompts
//! - Overhead of attached files and canonical option encoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ai_optimizer_rust::types::{AttachedFile, RequestOptions};
use ai_optimizer_rust::Fingerprinter;

fn bench_prompt_sizes(c: &mut Criterion) {
    let fingerprinter = Fingerprinter::new();
    let options = RequestOptions::new()
        .with_model("gpt-4o")
        .with_temperature(0.7)
        .with_max_tokens(512);

    let mut group = c.benchmark_group("fingerprint_prompt");
    for size in [64usize, 1024, 16 * 1024, 256 * 1024] {
        let prompt = "x".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &prompt, |b, prompt| {
            b.iter(|| fingerprinter.fingerprint(black_box(prompt), &[], black_box(&options)));
        });
    }
    group.finish();
}

fn bench_with_files(c: &mut Criterion) {
    let fingerprinter = Fingerprinter::new();
    let options = RequestOptions::new().with_model("gpt-4o");
    let files: Vec<AttachedFile> = (0..8)
        .map(|i| AttachedFile::new(format!("file{}.txt", i), "content ".repeat(512)))
        .collect();

    c.bench_function("fingerprint_with_files", |b| {
        b.iter(|| {
            fingerprinter.fingerprint(
                black_box("summarize these files"),
                black_box(&files),
                black_box(&options),
            )
        });
    });
}

criterion_group!(benches, bench_prompt_sizes, bench_with_files);
criterion_main!(benches);
