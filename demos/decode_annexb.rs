use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use video_hw_decode::{
    Codec, CompressedChunk, CountingAccelerator, DecodeError, DecodeSession, DecoderConfig,
    Dimensions, Fraction,
};

#[derive(Parser, Debug)]
#[command(about = "Reassemble and decode an Annex-B stream")]
struct Args {
    #[arg(long, default_value = "h264")]
    codec: String,
    #[arg(long)]
    input: Option<PathBuf>,
    #[arg(long, default_value_t = 65536)]
    chunk_bytes: usize,
    #[arg(long, default_value_t = DecoderConfig::DEFAULT_SURFACE_COUNT)]
    surfaces: usize,
    #[arg(long, default_value_t = 1920)]
    width: u32,
    #[arg(long, default_value_t = 1080)]
    height: u32,
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let codec = parse_codec(&args.codec)?;
    let input_path = args.input.unwrap_or_else(|| default_decode_input(codec));

    let mut config = DecoderConfig::new(codec);
    config.surface_count = args.surfaces;
    config.picture_size = Some(
        Dimensions::new(args.width, args.height).context("picture size must be non-zero")?,
    );
    config.framerate = Fraction::new(args.fps, 1);

    let device = CountingAccelerator::new();
    let probe = device.probe();
    let mut session = DecodeSession::annexb(config, Box::new(device))
        .context("failed to create decode session")?;

    let data = fs::read(&input_path)
        .with_context(|| format!("failed to read input stream: {}", input_path.display()))?;
    let step = args.chunk_bytes.max(1);

    let mut total_decoded = 0usize;
    // Raw elementary streams carry no timestamps.
    for chunk in data.chunks(step) {
        session.submit(CompressedChunk::new(chunk.to_vec(), None));
        total_decoded += drain(&mut session).context("decode failed")?;
    }
    session.submit_eos();
    total_decoded += drain(&mut session).context("flush failed")?;

    let summary = session.summary();
    let stats = probe.snapshot();
    println!(
        "decoded_frames={}, dropped_frames={}, units={}, bytes={}, width={:?}, height={:?}, slices={}, parameter_sets={}, input={}, chunk_bytes={}",
        total_decoded,
        summary.dropped_frames,
        summary.parsed_units,
        summary.consumed_bytes,
        summary.width,
        summary.height,
        stats.slices_submitted,
        stats.parameter_set_submissions,
        input_path.display(),
        step
    );

    Ok(())
}

/// Pulls every frame the session can produce right now. Frames are dropped
/// immediately, which hands their surfaces back to the pool.
fn drain(session: &mut DecodeSession) -> Result<usize, DecodeError> {
    let mut decoded = 0;
    loop {
        match session.pull_frame() {
            Ok(_frame) => decoded += 1,
            Err(DecodeError::NeedMoreInput) => return Ok(decoded),
            Err(err) => return Err(err),
        }
    }
}

fn parse_codec(raw: &str) -> Result<Codec> {
    match raw.to_ascii_lowercase().as_str() {
        "h264" => Ok(Codec::H264),
        "hevc" | "h265" => Ok(Codec::Hevc),
        other => anyhow::bail!("unsupported codec: {other}"),
    }
}

fn default_decode_input(codec: Codec) -> PathBuf {
    match codec {
        Codec::H264 => PathBuf::from("sample-videos/sample-10s.h264"),
        Codec::Hevc => PathBuf::from("sample-videos/sample-10s.h265"),
    }
}
