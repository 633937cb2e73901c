mod accel;
mod accumulator;
mod binding;
mod bitstream;
mod context;
mod contract;
mod dispatch;
mod parser;
mod queue;
mod unit;

use log::{debug, info, trace, warn};

pub use accel::{AcceleratorProbe, AcceleratorStats, CountingAccelerator, PictureRecord};
pub use accumulator::{AccumulatorId, ByteAccumulator, TakenBytes};
pub use binding::{CodecState, HwBinding};
pub use bitstream::{AnnexBCodec, ParameterSetCache};
pub use context::{ContextInfo, HwContext, SurfaceId, SurfaceProxy};
pub use contract::{
    Accelerator, Codec, CodecHooks, CompressedChunk, DecodeError, DecodeSummary, DecoderConfig,
    Dimensions, Fraction, InterlaceMode, Profile, Timestamp90k,
};
pub use dispatch::DecodedFrame;
pub use parser::{FrameAssembly, ParseInput, ParseOutcome};
pub use queue::{FifoQueue, QueueStats};
pub use unit::{CodedUnit, UnitFlags};

use parser::ParserState;

fn should_report_metrics() -> bool {
    std::env::var("VIDEO_HW_DECODE_METRICS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Pull-driven decode session.
///
/// The producer queues compressed chunks with [`submit`](Self::submit); the
/// consumer calls [`pull_frame`](Self::pull_frame), which parses buffered
/// input into frames and dispatches them to the accelerator until a decoded
/// frame is available or the session has to yield. `NeedMoreInput` and
/// `NoSurface` are yields; any other error leaves the session failed until
/// [`reset`](Self::reset).
pub struct DecodeSession {
    hooks: Box<dyn CodecHooks>,
    binding: HwBinding,
    parser: ParserState,
    input: ByteAccumulator,
    output: ByteAccumulator,
    chunks: FifoQueue<CompressedChunk>,
    at_eos: bool,
    resume: bool,
    failed: bool,
    parsed_units: usize,
    consumed_bytes: u64,
    report_metrics: bool,
}

impl DecodeSession {
    pub fn new(
        config: DecoderConfig,
        hooks: Box<dyn CodecHooks>,
        device: Box<dyn Accelerator>,
    ) -> Result<Self, DecodeError> {
        if hooks.codec() != config.codec {
            return Err(DecodeError::UnsupportedCodec(config.codec));
        }
        if config.surface_count == 0 {
            return Err(DecodeError::InvalidParameter(
                "surface_count must be greater than zero".to_string(),
            ));
        }

        let mut binding = HwBinding::new(config.codec, config.surface_count, device);
        if let Some(size) = config.picture_size {
            binding.set_picture_size(size);
        }
        if let Some(framerate) = config.framerate {
            binding.set_framerate(framerate);
        }
        debug!("created decode session: {config}");

        Ok(Self {
            hooks,
            binding,
            parser: ParserState::default(),
            input: ByteAccumulator::new(),
            output: ByteAccumulator::new(),
            chunks: FifoQueue::new(),
            at_eos: false,
            resume: false,
            failed: false,
            parsed_units: 0,
            consumed_bytes: 0,
            report_metrics: should_report_metrics(),
        })
    }

    pub fn annexb(config: DecoderConfig, device: Box<dyn Accelerator>) -> Result<Self, DecodeError> {
        let hooks = Box::new(AnnexBCodec::new(config.codec));
        Self::new(config, hooks, device)
    }

    pub fn codec(&self) -> Codec {
        self.hooks.codec()
    }

    pub fn codec_state(&self) -> &CodecState {
        self.binding.codec_state()
    }

    pub fn context(&self) -> Option<&HwContext> {
        self.binding.context()
    }

    pub fn ensure_context(&mut self, info: &ContextInfo) -> Result<&HwContext, DecodeError> {
        self.binding.ensure_context(info)
    }

    pub fn set_picture_size(&mut self, size: Dimensions) -> bool {
        self.binding.set_picture_size(size)
    }

    pub fn set_framerate(&mut self, framerate: Fraction) -> bool {
        self.binding.set_framerate(framerate)
    }

    pub fn set_pixel_aspect_ratio(&mut self, ratio: Fraction) -> bool {
        self.binding.set_pixel_aspect_ratio(ratio)
    }

    pub fn set_interlace_mode(&mut self, mode: InterlaceMode) -> bool {
        self.binding.set_interlace_mode(mode)
    }

    pub fn set_interlaced(&mut self, interlaced: bool) -> bool {
        self.binding.set_interlaced(interlaced)
    }

    /// Free surfaces in the current context, `None` before one exists.
    pub fn free_surfaces(&self) -> Option<usize> {
        self.binding.context().map(HwContext::free_surfaces)
    }

    pub fn queued_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn input_stats(&self) -> QueueStats {
        self.chunks.stats()
    }

    pub fn output_stats(&self) -> QueueStats {
        self.binding.output_stats()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn summary(&self) -> DecodeSummary {
        let size = self.binding.codec_state().picture_size();
        DecodeSummary {
            decoded_frames: self.binding.decoded_frames(),
            dropped_frames: self.binding.dropped_frames(),
            parsed_units: self.parsed_units,
            consumed_bytes: self.consumed_bytes,
            width: size.map(|d| d.width.get() as usize),
            height: size.map(|d| d.height.get() as usize),
        }
    }

    /// Queues a chunk for parsing. Empty chunks other than the end-of-stream
    /// marker are ignored.
    pub fn submit(&mut self, chunk: CompressedChunk) {
        if chunk.is_empty() && !chunk.is_eos() {
            trace!("ignoring empty chunk");
            return;
        }
        debug!(
            "queued chunk: {} bytes, pts={:?}, eos={}",
            chunk.len(),
            chunk.pts_90k,
            chunk.is_eos()
        );
        self.chunks.push(chunk);
    }

    pub fn submit_eos(&mut self) {
        self.submit(CompressedChunk::eos());
    }

    pub fn pull_frame(&mut self) -> Result<DecodedFrame, DecodeError> {
        loop {
            if let Some(frame) = self.binding.pop_frame() {
                return Ok(frame);
            }
            if self.failed {
                return Err(DecodeError::ResetRequired);
            }
            match self.decode_step() {
                Ok(()) => {}
                Err(err) if err.is_transient() => {
                    if let Some(frame) = self.binding.pop_frame() {
                        return Ok(frame);
                    }
                    if matches!(err, DecodeError::NeedMoreInput) {
                        trace!("decode step needs more input");
                    } else {
                        debug!("decode step suspended: {err}");
                    }
                    return Err(err);
                }
                Err(err) => {
                    warn!("decode failed, session requires reset: {err}");
                    self.failed = true;
                    return Err(err);
                }
            }
        }
    }

    pub fn pull_surface(&mut self) -> Result<SurfaceProxy, DecodeError> {
        self.pull_frame().map(DecodedFrame::into_surface)
    }

    /// Drops queued input, the partial frame and the parser's look-ahead and
    /// clears the failed state. Decoded frames and the context are kept.
    pub fn reset(&mut self) {
        let dropped = self.chunks.clear();
        self.parser.reset();
        self.input.clear();
        self.output.clear();
        drop(self.binding.take_bound_surface());
        self.at_eos = false;
        self.resume = false;
        self.failed = false;
        debug!("session reset, discarded {dropped} queued chunks");
    }

    /// Runs one parse step against a caller-owned frame and accumulator.
    ///
    /// Shares look-ahead state with the session's own parser, so it must not
    /// be interleaved with [`pull_frame`](Self::pull_frame).
    pub fn parse(
        &mut self,
        frame: &mut FrameAssembly,
        input: &ByteAccumulator,
        at_eos: bool,
    ) -> Result<ParseOutcome, DecodeError> {
        parser::do_parse(
            self.hooks.as_mut(),
            self.parser.continuity_mut(),
            frame,
            input,
            at_eos,
        )
    }

    /// Dispatches a completed frame whose payload the caller has attached.
    /// The decoded result is delivered through [`pull_frame`](Self::pull_frame).
    pub fn decode(&mut self, frame: FrameAssembly) -> Result<(), DecodeError> {
        if !frame.is_complete() {
            return Err(DecodeError::InvalidParameter(
                "frame assembly is not complete".to_string(),
            ));
        }
        self.binding.check_status()?;
        dispatch::dispatch_frame(self.hooks.as_mut(), &mut self.binding, frame)?;
        Ok(())
    }

    fn decode_step(&mut self) -> Result<(), DecodeError> {
        self.binding.check_status()?;
        if std::mem::take(&mut self.resume) {
            match self.step_buffered() {
                Err(DecodeError::NeedMoreInput) => {}
                other => return other,
            }
        }
        loop {
            let Some(chunk) = self.chunks.pop() else {
                return Err(DecodeError::NeedMoreInput);
            };
            self.at_eos = chunk.is_eos();
            if !chunk.is_eos() {
                debug!("dequeued chunk: {} bytes", chunk.len());
                self.input.push(&chunk.data, chunk.pts_90k)?;
            }
            match self.step_buffered() {
                Err(DecodeError::NeedMoreInput) => continue,
                other => return other,
            }
        }
    }

    fn step_buffered(&mut self) -> Result<(), DecodeError> {
        loop {
            if let Err(err) = self.binding.check_status() {
                self.resume = true;
                return Err(err);
            }
            let outcome =
                match self
                    .parser
                    .parse_current(self.hooks.as_mut(), &self.input, self.at_eos)
                {
                    Ok(outcome) => outcome,
                    Err(DecodeError::NeedMoreInput) if self.at_eos => return self.flush_at_eos(),
                    Err(err) => return Err(err),
                };
            if outcome.unit_size > 0 {
                self.migrate_unit(outcome.unit_size)?;
            }
            if outcome.got_frame {
                self.finish_frame()?;
            }
            if self.input.is_empty() && !self.parser.has_pending() && !self.at_eos {
                return Ok(());
            }
        }
    }

    fn migrate_unit(&mut self, size: usize) -> Result<(), DecodeError> {
        let latch_pts = self.output.is_empty();
        let (unit, pts) = self.input.take_mut(size)?;
        if latch_pts {
            if let Some(frame) = self.parser.current_frame_mut() {
                frame.set_pts(pts);
            }
        }
        self.output.append(unit, pts)?;
        self.parsed_units += 1;
        self.consumed_bytes += size as u64;
        trace!("migrated {size}-byte unit, pts={pts:?}");
        Ok(())
    }

    fn flush_at_eos(&mut self) -> Result<(), DecodeError> {
        if !self.input.is_empty() {
            warn!(
                "discarding {} unparsed bytes at end of stream",
                self.input.available()
            );
            self.input.clear();
        }
        let has_units = self
            .parser
            .current_frame()
            .is_some_and(|frame| !frame.is_empty());
        if !has_units {
            self.parser.take_current_frame();
            self.output.clear();
            return Err(DecodeError::NeedMoreInput);
        }
        if let Some(frame) = self.parser.current_frame_mut() {
            debug!("flushing final frame of {} units", frame.units().len());
            frame.mark_complete();
        }
        self.finish_frame()
    }

    fn finish_frame(&mut self) -> Result<(), DecodeError> {
        let Some(mut frame) = self.parser.take_current_frame() else {
            return Ok(());
        };
        let payload = self.output.take_all()?;
        frame.set_payload(payload.data);
        let units = frame.units().len();
        let queued = dispatch::dispatch_frame(self.hooks.as_mut(), &mut self.binding, frame)?;
        debug!("dispatched frame of {units} units, queued={queued}");
        if self.report_metrics {
            let summary = self.summary();
            info!(
                "decode metrics: decoded={} dropped={} units={} bytes={} chunks_pending={} frames_pending={}",
                summary.decoded_frames,
                summary.dropped_frames,
                summary.parsed_units,
                summary.consumed_bytes,
                self.chunks.len(),
                self.binding.output_stats().depth
            );
        }
        Ok(())
    }
}
