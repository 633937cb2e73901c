use log::debug;

use crate::context::{ContextInfo, ContextManager, HwContext, SurfaceId, SurfaceProxy};
use crate::dispatch::DecodedFrame;
use crate::queue::{FifoQueue, QueueStats};
use crate::{Accelerator, Codec, DecodeError, Dimensions, Fraction, InterlaceMode};

const SQUARE_PIXELS: Fraction = Fraction { num: 1, den: 1 };

/// Stream properties shared between the codec and the session.
///
/// Every effective change bumps `generation`, so consumers can detect a
/// change without being notified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecState {
    codec: Codec,
    picture_size: Option<Dimensions>,
    framerate: Option<Fraction>,
    pixel_aspect_ratio: Fraction,
    interlace_mode: InterlaceMode,
    generation: u64,
}

impl CodecState {
    fn new(codec: Codec) -> Self {
        Self {
            codec,
            picture_size: None,
            framerate: None,
            pixel_aspect_ratio: SQUARE_PIXELS,
            interlace_mode: InterlaceMode::default(),
            generation: 0,
        }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn picture_size(&self) -> Option<Dimensions> {
        self.picture_size
    }

    pub fn framerate(&self) -> Option<Fraction> {
        self.framerate
    }

    pub fn pixel_aspect_ratio(&self) -> Fraction {
        self.pixel_aspect_ratio
    }

    pub fn interlace_mode(&self) -> InterlaceMode {
        self.interlace_mode
    }

    pub fn is_interlaced(&self) -> bool {
        self.interlace_mode != InterlaceMode::Progressive
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn changed(&mut self, what: &str) -> bool {
        self.generation += 1;
        debug!("codec state {what} changed (generation {})", self.generation);
        true
    }
}

/// Decoder-owned state a codec drives during frame dispatch: the codec-state
/// descriptor, the hardware context and the surface bound to the frame being
/// decoded.
pub struct HwBinding {
    contexts: ContextManager,
    codec_state: CodecState,
    bound_surface: Option<SurfaceProxy>,
    frames: FifoQueue<DecodedFrame>,
    surface_count: usize,
    applied_generation: Option<u64>,
    decoded_frames: usize,
    dropped_frames: usize,
}

impl HwBinding {
    pub fn new(codec: Codec, surface_count: usize, device: Box<dyn Accelerator>) -> Self {
        Self {
            contexts: ContextManager::new(device),
            codec_state: CodecState::new(codec),
            bound_surface: None,
            frames: FifoQueue::new(),
            surface_count,
            applied_generation: None,
            decoded_frames: 0,
            dropped_frames: 0,
        }
    }

    pub fn codec_state(&self) -> &CodecState {
        &self.codec_state
    }

    pub fn context(&self) -> Option<&HwContext> {
        self.contexts.context()
    }

    pub fn surface_count(&self) -> usize {
        self.surface_count
    }

    pub fn set_picture_size(&mut self, size: Dimensions) -> bool {
        if self.codec_state.picture_size == Some(size) {
            return false;
        }
        self.codec_state.picture_size = Some(size);
        debug!("picture size set to {size}");
        self.codec_state.changed("picture size")
    }

    pub fn set_framerate(&mut self, framerate: Fraction) -> bool {
        if framerate.num == 0 || framerate.den == 0 {
            return false;
        }
        if self.codec_state.framerate == Some(framerate) {
            return false;
        }
        self.codec_state.framerate = Some(framerate);
        self.codec_state.changed("framerate")
    }

    pub fn set_pixel_aspect_ratio(&mut self, ratio: Fraction) -> bool {
        if ratio.num == 0 || ratio.den == 0 || self.codec_state.pixel_aspect_ratio == ratio {
            return false;
        }
        self.codec_state.pixel_aspect_ratio = ratio;
        self.codec_state.changed("pixel aspect ratio")
    }

    pub fn set_interlace_mode(&mut self, mode: InterlaceMode) -> bool {
        if self.codec_state.interlace_mode == mode {
            return false;
        }
        self.codec_state.interlace_mode = mode;
        self.codec_state.changed("interlace mode")
    }

    pub fn set_interlaced(&mut self, interlaced: bool) -> bool {
        let mode = if interlaced {
            InterlaceMode::Interleaved
        } else {
            InterlaceMode::Progressive
        };
        self.set_interlace_mode(mode)
    }

    /// Records the picture size and makes sure a context matching `info`
    /// exists, resetting the current one if it differs.
    pub fn ensure_context(&mut self, info: &ContextInfo) -> Result<&HwContext, DecodeError> {
        if let Some(size) = Dimensions::new(info.width, info.height) {
            self.set_picture_size(size);
        }
        self.contexts.ensure_context(info)?;
        self.applied_generation = Some(self.codec_state.generation);
        self.contexts
            .context()
            .ok_or_else(|| DecodeError::Context("decode context is missing".to_string()))
    }

    /// True when no context exists, `info` differs from the active one, or
    /// the codec state changed since the context was last ensured.
    pub fn needs_context(&self, info: &ContextInfo) -> bool {
        match self.contexts.context() {
            None => true,
            Some(context) => {
                context.info() != info
                    || self.applied_generation != Some(self.codec_state.generation)
            }
        }
    }

    /// Binds a free surface to the frame being decoded and opens a picture
    /// on it. Calling it again for the same frame is a no-op.
    pub fn begin_picture(&mut self) -> Result<SurfaceId, DecodeError> {
        if let Some(surface) = &self.bound_surface {
            return Ok(surface.id());
        }
        let proxy = self
            .contexts
            .context()
            .ok_or_else(|| DecodeError::Context("no decode context to render into".to_string()))?
            .acquire_surface()?;
        let id = proxy.id();
        self.contexts.device_mut().begin_picture(id)?;
        self.bound_surface = Some(proxy);
        Ok(id)
    }

    pub fn submit_parameter_sets(&mut self, sets: &[Vec<u8>]) -> Result<(), DecodeError> {
        if self.contexts.context().is_none() {
            return Err(DecodeError::Context(
                "parameter sets submitted before a context exists".to_string(),
            ));
        }
        self.contexts.device_mut().submit_parameter_sets(sets)
    }

    pub fn submit_slice(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let id = self
            .bound_surface()
            .ok_or_else(|| DecodeError::Decode("slice submitted without a picture".to_string()))?;
        self.contexts.device_mut().submit_slice(id, data)
    }

    pub fn end_picture(&mut self) -> Result<(), DecodeError> {
        let id = self
            .bound_surface()
            .ok_or_else(|| DecodeError::Decode("no picture to finish".to_string()))?;
        self.contexts.device_mut().end_picture(id)
    }

    pub fn bound_surface(&self) -> Option<SurfaceId> {
        self.bound_surface.as_ref().map(SurfaceProxy::id)
    }

    pub(crate) fn take_bound_surface(&mut self) -> Option<SurfaceProxy> {
        self.bound_surface.take()
    }

    pub(crate) fn check_status(&self) -> Result<(), DecodeError> {
        self.contexts.check_status()
    }

    pub(crate) fn push_frame(&mut self, frame: DecodedFrame) {
        debug!(
            "queued decoded {} (pts={:?})",
            frame.surface_id(),
            frame.pts_90k()
        );
        self.decoded_frames += 1;
        self.frames.push(frame);
    }

    pub(crate) fn pop_frame(&mut self) -> Option<DecodedFrame> {
        let frame = self.frames.pop()?;
        debug!("dequeued decoded {}", frame.surface_id());
        Some(frame)
    }

    pub(crate) fn count_dropped(&mut self) {
        self.dropped_frames += 1;
    }

    pub(crate) fn decoded_frames(&self) -> usize {
        self.decoded_frames
    }

    pub(crate) fn dropped_frames(&self) -> usize {
        self.dropped_frames
    }

    pub(crate) fn output_stats(&self) -> QueueStats {
        self.frames.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::CountingAccelerator;
    use crate::Profile;

    fn binding(surfaces: usize) -> HwBinding {
        HwBinding::new(Codec::H264, surfaces, Box::new(CountingAccelerator::new()))
    }

    fn info(width: u32, height: u32) -> ContextInfo {
        ContextInfo {
            profile: Profile::H264Main,
            width,
            height,
            surface_count: 2,
        }
    }

    #[test]
    fn setters_report_changes_and_bump_generation() {
        let mut binding = binding(2);
        let size = Dimensions::new(640, 480).unwrap();
        assert!(binding.set_picture_size(size));
        assert!(!binding.set_picture_size(size));
        assert_eq!(binding.codec_state().generation(), 1);

        assert!(!binding.set_framerate(Fraction { num: 0, den: 1 }));
        assert!(binding.set_framerate(Fraction { num: 30, den: 1 }));
        assert!(!binding.set_pixel_aspect_ratio(SQUARE_PIXELS));
        assert!(binding.set_pixel_aspect_ratio(Fraction { num: 4, den: 3 }));
        assert!(binding.set_interlaced(true));
        assert!(!binding.set_interlace_mode(InterlaceMode::Interleaved));
        assert!(binding.codec_state().is_interlaced());
        assert_eq!(binding.codec_state().generation(), 4);
    }

    #[test]
    fn ensure_context_records_picture_size() {
        let mut binding = binding(2);
        assert!(binding.needs_context(&info(320, 240)));
        binding.ensure_context(&info(320, 240)).unwrap();
        assert_eq!(
            binding.codec_state().picture_size(),
            Dimensions::new(320, 240)
        );
        assert!(!binding.needs_context(&info(320, 240)));
        assert!(binding.needs_context(&info(640, 240)));

        binding.set_framerate(Fraction { num: 25, den: 1 });
        assert!(binding.needs_context(&info(320, 240)));
    }

    #[test]
    fn picture_lifecycle_binds_one_surface() {
        let mut binding = binding(2);
        assert!(matches!(
            binding.begin_picture(),
            Err(DecodeError::Context(_))
        ));
        binding.ensure_context(&info(64, 64)).unwrap();

        let id = binding.begin_picture().unwrap();
        assert_eq!(binding.begin_picture().unwrap(), id);
        binding.submit_slice(&[0x65, 0x88]).unwrap();
        binding.end_picture().unwrap();
        assert_eq!(binding.context().unwrap().free_surfaces(), 1);

        drop(binding.take_bound_surface());
        assert_eq!(binding.context().unwrap().free_surfaces(), 2);
        assert!(binding.submit_slice(&[1]).is_err());
    }

    #[test]
    fn parameter_sets_need_a_context() {
        let mut binding = binding(2);
        let sets = [vec![0x67, 0x4D], vec![0x68, 0xCE]];
        assert!(matches!(
            binding.submit_parameter_sets(&sets),
            Err(DecodeError::Context(_))
        ));
        binding.ensure_context(&info(320, 240)).unwrap();
        binding.submit_parameter_sets(&sets).unwrap();
    }
}
