use bytes::Bytes;
use log::{trace, warn};

use crate::binding::HwBinding;
use crate::context::{SurfaceId, SurfaceProxy};
use crate::parser::FrameAssembly;
use crate::unit::CodedUnit;
use crate::{CodecHooks, DecodeError, Dimensions, Timestamp90k};

/// A fully dispatched frame together with the surface it was decoded into.
#[derive(Debug)]
pub struct DecodedFrame {
    pts_90k: Option<Timestamp90k>,
    units: Vec<CodedUnit>,
    payload: Bytes,
    surface: SurfaceProxy,
    dimensions: Option<Dimensions>,
}

impl DecodedFrame {
    pub fn pts_90k(&self) -> Option<Timestamp90k> {
        self.pts_90k
    }

    pub fn units(&self) -> &[CodedUnit] {
        &self.units
    }

    /// The exact coded bytes of the frame, units back to back.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn surface(&self) -> &SurfaceProxy {
        &self.surface
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.surface.id()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dimensions
    }

    pub fn into_surface(self) -> SurfaceProxy {
        self.surface
    }
}

fn unit_bytes<'a>(frame: &'a FrameAssembly, unit: &CodedUnit) -> Result<&'a [u8], DecodeError> {
    frame.unit_data(unit).ok_or_else(|| {
        DecodeError::InvalidParameter(format!(
            "unit at {}+{} lies outside the {}-byte payload",
            unit.offset(),
            unit.size(),
            frame.payload().len()
        ))
    })
}

pub(crate) fn do_decode(
    hooks: &mut dyn CodecHooks,
    binding: &mut HwBinding,
    frame: &FrameAssembly,
) -> Result<(), DecodeError> {
    if let Some(first_slice) = frame.units().iter().find(|unit| unit.is_slice()) {
        hooks.start_frame(binding, first_slice, unit_bytes(frame, first_slice)?)?;
    }
    for unit in frame.units() {
        if unit.is_skipped() {
            trace!("skipping unit at offset {}", unit.offset());
            continue;
        }
        hooks.decode(binding, unit, unit_bytes(frame, unit)?)?;
    }
    hooks.end_frame(binding)
}

/// Dispatches `frame` and queues the result when a surface was bound to it.
///
/// Returns whether a decoded frame was queued.
pub(crate) fn dispatch_frame(
    hooks: &mut dyn CodecHooks,
    binding: &mut HwBinding,
    frame: FrameAssembly,
) -> Result<bool, DecodeError> {
    if let Err(err) = do_decode(hooks, binding, &frame) {
        drop(binding.take_bound_surface());
        return Err(err);
    }

    let Some(surface) = binding.take_bound_surface() else {
        warn!(
            "frame with {} units bound no surface, dropping it",
            frame.units().len()
        );
        binding.count_dropped();
        return Ok(false);
    };
    let dimensions = binding.codec_state().picture_size();
    let (units, payload, pts_90k) = frame.into_parts();
    binding.push_frame(DecodedFrame {
        pts_90k,
        units,
        payload,
        surface,
        dimensions,
    });
    Ok(true)
}
