use std::time::Duration;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use video_hw_decode::{
    Codec, CompressedChunk, CountingAccelerator, DecodeError, DecodeSession, DecoderConfig,
    Dimensions,
};

/// Synthetic H.264 stream: parameter sets once, then `frames` access units
/// of an AUD and two slices each.
fn synthetic_h264(frames: usize, slice_bytes: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut push_nal = |nal: &[u8]| {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    };
    push_nal(&[0x67, 0x64, 0x00, 0x28]);
    push_nal(&[0x68, 0xEE, 0x3C, 0x80]);
    let mut first = vec![0x55; slice_bytes];
    first[..2].copy_from_slice(&[0x65, 0x88]);
    let mut second = vec![0x55; slice_bytes];
    second[..2].copy_from_slice(&[0x65, 0x40]);
    for _ in 0..frames {
        push_nal(&[0x09, 0xF0]);
        push_nal(&first);
        push_nal(&second);
    }
    out
}

fn run_decode(data: &[u8], chunk_bytes: usize) -> Result<usize, DecodeError> {
    let mut config = DecoderConfig::new(Codec::H264);
    config.picture_size = Dimensions::new(1920, 1080);
    let mut session = DecodeSession::annexb(config, Box::new(CountingAccelerator::new()))?;

    let mut decoded = 0;
    let mut pull = |session: &mut DecodeSession| -> Result<(), DecodeError> {
        loop {
            match session.pull_frame() {
                Ok(_) => decoded += 1,
                Err(DecodeError::NeedMoreInput) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    };
    for chunk in data.chunks(chunk_bytes.max(1)) {
        session.submit(CompressedChunk::new(chunk.to_vec(), None));
        pull(&mut session)?;
    }
    session.submit_eos();
    pull(&mut session)?;
    Ok(decoded)
}

fn decode_benchmark(c: &mut Criterion) {
    let data = synthetic_h264(300, 2048);

    let mut group = c.benchmark_group("decode_annexb");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(2));
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_bytes in [188usize, 4096, 1024 * 1024] {
        group.bench_with_input(
            BenchmarkId::new("h264/synthetic", format!("chunk_{chunk_bytes}")),
            &chunk_bytes,
            |b, &chunk| {
                b.iter(|| {
                    let decoded =
                        run_decode(&data, chunk).expect("decode should succeed in benchmark");
                    assert_eq!(decoded, 300);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, decode_benchmark);
criterion_main!(benches);
