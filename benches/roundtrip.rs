//! Memory-to-memory compression benchmarks across codec stacks.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kanzi::{CompressedReader, CompressedWriter, CompressorConfig, DecompressorConfig};

fn sample_text(len: usize) -> Vec<u8> {
    b"It was the best of times, it was the worst of times, it was the age of wisdom, "
        .iter()
        .cycle()
        .take(len)
        .copied()
        .collect()
}

fn compress(cfg: &CompressorConfig, data: &[u8]) -> Vec<u8> {
    let mut writer = CompressedWriter::new(Vec::new(), cfg).unwrap();
    writer.write(data).unwrap();
    writer.into_inner().unwrap()
}

fn decompress(bytes: &[u8]) -> Vec<u8> {
    let cfg = DecompressorConfig {
        jobs: 2,
        ..DecompressorConfig::default()
    };
    let mut reader = CompressedReader::new(bytes, &cfg).unwrap();
    let mut out = Vec::new();
    std::io::Read::read_to_end(&mut reader, &mut out).unwrap();
    out
}

fn bench_stacks(c: &mut Criterion) {
    let data = sample_text(1 << 20);
    let stacks = [
        ("rlt-huffman", "RLT", "HUFFMAN"),
        ("mtft-zrlt-huffman", "MTFT+ZRLT", "HUFFMAN"),
        ("bwt-rank-zrlt-huffman", "BWT+RANK+ZRLT", "HUFFMAN"),
    ];

    let mut group = c.benchmark_group("compress");
    group.throughput(Throughput::Bytes(data.len() as u64));
    for (name, transform, entropy) in stacks {
        let cfg = CompressorConfig {
            transform: transform.to_string(),
            entropy: entropy.to_string(),
            block_size: 256 * 1024,
            jobs: 2,
            checksum: 32,
            ..CompressorConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(name), &cfg, |b, cfg| {
            b.iter(|| compress(cfg, &data));
        });
    }
    group.finish();

    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes(data.len() as u64));
    for (name, transform, entropy) in stacks {
        let cfg = CompressorConfig {
            transform: transform.to_string(),
            entropy: entropy.to_string(),
            block_size: 256 * 1024,
            jobs: 2,
            checksum: 32,
            ..CompressorConfig::default()
        };
        let compressed = compress(&cfg, &data);
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &compressed,
            |b, compressed| {
                b.iter(|| decompress(compressed));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_stacks);
criterion_main!(benches);
