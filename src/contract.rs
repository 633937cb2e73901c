use std::num::NonZeroU32;
use std::{fmt, fmt::Display};

use bytes::Bytes;

use crate::binding::HwBinding;
use crate::context::{ContextInfo, SurfaceId};
use crate::parser::ParseInput;
use crate::unit::CodedUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    H264,
    Hevc,
}

impl Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
            Self::Hevc => f.write_str("hevc"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    H264Baseline,
    H264Main,
    H264High,
    HevcMain,
    HevcMain10,
}

impl Profile {
    #[must_use]
    pub fn codec(self) -> Codec {
        match self {
            Self::H264Baseline | Self::H264Main | Self::H264High => Codec::H264,
            Self::HevcMain | Self::HevcMain10 => Codec::Hevc,
        }
    }

    /// Profile assumed until a sequence parameter set says otherwise.
    #[must_use]
    pub fn default_for(codec: Codec) -> Self {
        match codec {
            Codec::H264 => Self::H264High,
            Codec::Hevc => Self::HevcMain,
        }
    }
}

impl Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264Baseline => f.write_str("h264-baseline"),
            Self::H264Main => f.write_str("h264-main"),
            Self::H264High => f.write_str("h264-high"),
            Self::HevcMain => f.write_str("hevc-main"),
            Self::HevcMain10 => f.write_str("hevc-main10"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Dimensions {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp90k(pub i64);

impl Display for Timestamp90k {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@90k", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fraction {
    pub num: u32,
    pub den: u32,
}

impl Fraction {
    /// Returns `None` when either term is zero.
    #[must_use]
    pub fn new(num: u32, den: u32) -> Option<Self> {
        (num != 0 && den != 0).then_some(Self { num, den })
    }
}

impl Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterlaceMode {
    #[default]
    Progressive,
    Interleaved,
    Mixed,
}

impl Display for InterlaceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progressive => f.write_str("progressive"),
            Self::Interleaved => f.write_str("interleaved"),
            Self::Mixed => f.write_str("mixed"),
        }
    }
}

/// One chunk of compressed elementary stream as delivered by the producer.
///
/// Chunk boundaries carry no meaning: a coded unit may start, end or be
/// split anywhere inside a chunk. The end-of-stream sentinel carries no
/// payload and is never buffered.
#[derive(Debug, Clone)]
pub struct CompressedChunk {
    pub data: Bytes,
    pub pts_90k: Option<Timestamp90k>,
    eos: bool,
}

impl CompressedChunk {
    pub fn new(data: impl Into<Bytes>, pts_90k: Option<Timestamp90k>) -> Self {
        Self {
            data: data.into(),
            pts_90k,
            eos: false,
        }
    }

    #[must_use]
    pub fn eos() -> Self {
        Self {
            data: Bytes::new(),
            pts_90k: None,
            eos: true,
        }
    }

    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub codec: Codec,
    pub surface_count: usize,
    pub picture_size: Option<Dimensions>,
    pub framerate: Option<Fraction>,
}

impl DecoderConfig {
    pub const DEFAULT_SURFACE_COUNT: usize = 8;

    #[must_use]
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            surface_count: Self::DEFAULT_SURFACE_COUNT,
            picture_size: None,
            framerate: None,
        }
    }
}

impl Display for DecoderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecoderConfig(codec={}, surface_count={}, picture_size={:?}, framerate={:?})",
            self.codec, self.surface_count, self.picture_size, self.framerate
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    pub decoded_frames: usize,
    pub dropped_frames: usize,
    pub parsed_units: usize,
    pub consumed_bytes: u64,
    pub width: Option<usize>,
    pub height: Option<usize>,
}

impl Display for DecodeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecodeSummary(decoded_frames={}, dropped_frames={}, parsed_units={}, consumed_bytes={}, width={:?}, height={:?})",
            self.decoded_frames,
            self.dropped_frames,
            self.parsed_units,
            self.consumed_bytes,
            self.width,
            self.height
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("need more input")]
    NeedMoreInput,
    #[error("no free decode surface")]
    NoSurface,
    #[error("allocation failed")]
    AllocationFailed,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("decode context error: {0}")]
    Context(String),
    #[error("unsupported codec: {0:?}")]
    UnsupportedCodec(Codec),
    #[error("stream must be reset after a previous error")]
    ResetRequired,
}

impl DecodeError {
    /// `NeedMoreInput` and `NoSurface` are suspension points, not failures:
    /// the caller retries once input arrives or a surface is released.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NeedMoreInput | Self::NoSurface)
    }
}

/// Codec-specific hook table driven by the decode engine.
///
/// `parse` inspects the buffered input and describes the next coded unit,
/// which always starts at the first unconsumed byte. It must not assume the
/// bytes stay buffered after it returns. The dispatch hooks run once per
/// completed frame, in stream order, against the hardware binding.
pub trait CodecHooks {
    fn codec(&self) -> Codec;

    fn parse(&mut self, input: &mut ParseInput<'_>) -> Result<CodedUnit, DecodeError>;

    fn start_frame(
        &mut self,
        _binding: &mut HwBinding,
        _unit: &CodedUnit,
        _data: &[u8],
    ) -> Result<(), DecodeError> {
        Ok(())
    }

    fn decode(
        &mut self,
        binding: &mut HwBinding,
        unit: &CodedUnit,
        data: &[u8],
    ) -> Result<(), DecodeError>;

    fn end_frame(&mut self, _binding: &mut HwBinding) -> Result<(), DecodeError> {
        Ok(())
    }
}

/// Hardware decode device a session renders into.
pub trait Accelerator {
    fn create_context(&mut self, info: &ContextInfo) -> Result<(), DecodeError>;

    fn reset_context(&mut self, info: &ContextInfo) -> Result<(), DecodeError> {
        self.create_context(info)
    }

    fn submit_parameter_sets(&mut self, sets: &[Vec<u8>]) -> Result<(), DecodeError>;

    fn begin_picture(&mut self, surface: SurfaceId) -> Result<(), DecodeError>;

    fn submit_slice(&mut self, surface: SurfaceId, data: &[u8]) -> Result<(), DecodeError>;

    fn end_picture(&mut self, surface: SurfaceId) -> Result<(), DecodeError>;
}
