//! File-backed round trips: the writer and reader over real file handles.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};

use tempfile::TempDir;

use kanzi::{CompressedReader, CompressedWriter, CompressorConfig, DecompressorConfig};

#[test]
fn file_to_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let src_path = dir.path().join("input.bin");
    let dst_path = dir.path().join("input.bin.knz");
    let out_path = dir.path().join("restored.bin");

    let original: Vec<u8> = b"files also deserve lossless round trips "
        .iter()
        .cycle()
        .take(300_000)
        .copied()
        .collect();
    std::fs::write(&src_path, &original).unwrap();

    let cfg = CompressorConfig {
        transform: "MTFT+ZRLT".to_string(),
        entropy: "HUFFMAN".to_string(),
        block_size: 64 * 1024,
        jobs: 3,
        checksum: 32,
        original_size: Some(original.len() as u64),
        ..CompressorConfig::default()
    };
    let sink = BufWriter::new(File::create(&dst_path).unwrap());
    let mut writer = CompressedWriter::new(sink, &cfg).unwrap();
    let mut source = File::open(&src_path).unwrap();
    std::io::copy(&mut source, &mut writer).unwrap();
    writer.close().unwrap();

    let compressed_len = std::fs::metadata(&dst_path).unwrap().len();
    assert!(compressed_len > 0);
    assert!(compressed_len < original.len() as u64);

    let dcfg = DecompressorConfig {
        jobs: 3,
        ..DecompressorConfig::default()
    };
    let source = BufReader::new(File::open(&dst_path).unwrap());
    let mut reader = CompressedReader::new(source, &dcfg).unwrap();
    let mut sink = BufWriter::new(File::create(&out_path).unwrap());
    let mut chunk = vec![0u8; 32 * 1024];
    loop {
        let n = reader.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        sink.write_all(&chunk[..n]).unwrap();
    }
    sink.flush().unwrap();
    drop(sink);

    let restored = std::fs::read(&out_path).unwrap();
    assert_eq!(restored, original);
}
