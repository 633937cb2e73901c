use log::{debug, trace};

use crate::binding::HwBinding;
use crate::context::ContextInfo;
use crate::parser::ParseInput;
use crate::unit::{CodedUnit, UnitFlags};
use crate::{Codec, CodecHooks, DecodeError, Profile};

#[derive(Debug, Clone, Default)]
pub struct ParameterSetCache {
    h264_sps: Option<Vec<u8>>,
    h264_pps: Option<Vec<u8>>,
    hevc_vps: Option<Vec<u8>>,
    hevc_sps: Option<Vec<u8>>,
    hevc_pps: Option<Vec<u8>>,
}

impl ParameterSetCache {
    /// The parameter sets a decoder needs before the first slice, in
    /// submission order, or `None` while any of them is still missing.
    pub fn required_for_codec(&self, codec: Codec) -> Option<Vec<Vec<u8>>> {
        match codec {
            Codec::H264 => Some(vec![self.h264_sps.clone()?, self.h264_pps.clone()?]),
            Codec::Hevc => Some(vec![
                self.hevc_vps.clone()?,
                self.hevc_sps.clone()?,
                self.hevc_pps.clone()?,
            ]),
        }
    }

    fn observe(&mut self, codec: Codec, nal: &[u8]) -> bool {
        let Some(&header) = nal.first() else {
            return false;
        };
        let slot = match codec {
            Codec::H264 => match header & 0x1f {
                7 => &mut self.h264_sps,
                8 => &mut self.h264_pps,
                _ => return false,
            },
            Codec::Hevc => match (header >> 1) & 0x3f {
                32 => &mut self.hevc_vps,
                33 => &mut self.hevc_sps,
                34 => &mut self.hevc_pps,
                _ => return false,
            },
        };
        if slot.as_deref() == Some(nal) {
            return false;
        }
        *slot = Some(nal.to_vec());
        true
    }
}

/// Start-code framed H.264 / HEVC elementary stream codec.
///
/// Each coded unit is one NAL unit including its leading start code. Frame
/// boundaries come from NAL unit types alone; slice headers are only read as
/// far as the first-slice-of-picture bit.
#[derive(Debug, Clone)]
pub struct AnnexBCodec {
    codec: Codec,
    parameter_sets: ParameterSetCache,
    parameter_sets_pending: bool,
    profile: Profile,
}

impl AnnexBCodec {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            parameter_sets: ParameterSetCache::default(),
            parameter_sets_pending: false,
            profile: Profile::default_for(codec),
        }
    }

    pub fn parameter_sets(&self) -> &ParameterSetCache {
        &self.parameter_sets
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    fn observe(&mut self, nal: &[u8]) {
        if self.parameter_sets.observe(self.codec, nal) {
            self.parameter_sets_pending = true;
        }
        if let Some(profile) = sps_profile(self.codec, nal) {
            if profile != self.profile {
                debug!("sequence parameter set selects {profile}");
                self.profile = profile;
            }
        }
    }
}

impl CodecHooks for AnnexBCodec {
    fn codec(&self) -> Codec {
        self.codec
    }

    fn parse(&mut self, input: &mut ParseInput<'_>) -> Result<CodedUnit, DecodeError> {
        let data = input.data();
        let Some((start, prefix_len)) = find_start_code(data, 0) else {
            if input.at_eos() {
                return Ok(CodedUnit::new(data.len(), UnitFlags::SKIP));
            }
            // The last three bytes may still turn into a start code.
            return match data.len().checked_sub(3) {
                Some(garbage) if garbage > 0 => Ok(CodedUnit::new(garbage, UnitFlags::SKIP)),
                _ => Err(DecodeError::NeedMoreInput),
            };
        };
        if start > 0 {
            trace!("skipping {start} bytes before the first start code");
            return Ok(CodedUnit::new(start, UnitFlags::SKIP));
        }

        let nal_start = prefix_len;
        let end = match find_start_code(data, input.scan_offset().max(nal_start)) {
            Some((next, _)) => next,
            None if input.at_eos() => data.len(),
            None => {
                input.set_scan_offset(data.len().saturating_sub(3).max(nal_start));
                return Err(DecodeError::NeedMoreInput);
            }
        };

        let nal = &data[nal_start..end];
        let flags = classify_nal(self.codec, nal);
        trace!("nal {:02x?} ({} bytes) -> {flags:?}", nal.first(), nal.len());
        self.observe(nal);
        Ok(CodedUnit::new(end, flags))
    }

    fn start_frame(
        &mut self,
        binding: &mut HwBinding,
        _unit: &CodedUnit,
        _data: &[u8],
    ) -> Result<(), DecodeError> {
        let size = binding.codec_state().picture_size().ok_or_else(|| {
            DecodeError::Context("picture size must be set before the first slice".to_string())
        })?;
        let info = ContextInfo {
            profile: self.profile,
            width: size.width.get(),
            height: size.height.get(),
            surface_count: binding.surface_count(),
        };
        if binding.needs_context(&info) {
            binding.ensure_context(&info)?;
            self.parameter_sets_pending = true;
        }
        if self.parameter_sets_pending {
            match self.parameter_sets.required_for_codec(self.codec) {
                Some(sets) => {
                    debug!("submitting {} parameter sets", sets.len());
                    binding.submit_parameter_sets(&sets)?;
                    self.parameter_sets_pending = false;
                }
                None => trace!("parameter sets incomplete, slices go out without them"),
            }
        }
        binding.begin_picture()?;
        Ok(())
    }

    fn decode(
        &mut self,
        binding: &mut HwBinding,
        unit: &CodedUnit,
        data: &[u8],
    ) -> Result<(), DecodeError> {
        if !unit.is_slice() {
            return Ok(());
        }
        let nal = find_start_code(data, 0)
            .filter(|&(start, _)| start == 0)
            .map_or(data, |(_, prefix_len)| &data[prefix_len..]);
        binding.submit_slice(nal)
    }

    fn end_frame(&mut self, binding: &mut HwBinding) -> Result<(), DecodeError> {
        if binding.bound_surface().is_none() {
            return Ok(());
        }
        binding.end_picture()
    }
}

fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i..].starts_with(&[0, 0, 0, 1]) {
            return Some((i, 4));
        }
        if data[i..].starts_with(&[0, 0, 1]) {
            return Some((i, 3));
        }
        i += 1;
    }
    None
}

fn classify_nal(codec: Codec, nal: &[u8]) -> UnitFlags {
    let Some(&header) = nal.first() else {
        return UnitFlags::SKIP;
    };
    match codec {
        Codec::H264 => match header & 0x1f {
            // first_mb_in_slice == 0 codes as a single set bit.
            1 | 2 | 5 => slice_flags(nal.get(1)),
            3 | 4 => UnitFlags::SLICE,
            6..=9 | 14..=18 => UnitFlags::FRAME_START,
            10 | 11 => UnitFlags::FRAME_END,
            _ => UnitFlags::SKIP,
        },
        Codec::Hevc => match (header >> 1) & 0x3f {
            // first_slice_segment_in_pic_flag follows the two-byte header.
            0..=9 | 16..=21 => slice_flags(nal.get(2)),
            32..=35 | 39 | 41..=44 => UnitFlags::FRAME_START,
            36 | 37 => UnitFlags::FRAME_END,
            40 => UnitFlags::NONE,
            _ => UnitFlags::SKIP,
        },
    }
}

fn slice_flags(first_header_byte: Option<&u8>) -> UnitFlags {
    match first_header_byte {
        Some(byte) if byte & 0x80 != 0 => UnitFlags::SLICE | UnitFlags::FRAME_START,
        _ => UnitFlags::SLICE,
    }
}

fn sps_profile(codec: Codec, nal: &[u8]) -> Option<Profile> {
    match codec {
        Codec::H264 if nal.first()? & 0x1f == 7 => Some(match *nal.get(1)? {
            66 => Profile::H264Baseline,
            77 => Profile::H264Main,
            _ => Profile::H264High,
        }),
        Codec::Hevc if (nal.first()? >> 1) & 0x3f == 33 => Some(match nal.get(3)? & 0x1f {
            2 => Profile::HevcMain10,
            _ => Profile::HevcMain,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::ByteAccumulator;

    fn h264_sample_annexb() -> Vec<u8> {
        let mut out = Vec::new();
        let mut push_nal = |nal: &[u8]| {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        };

        push_nal(&[0x09, 0xF0]);
        push_nal(&[0x67, 0x4D, 0x00, 0x1E]);
        push_nal(&[0x68, 0xCE, 0x06, 0xE2]);
        push_nal(&[0x65, 0x88, 0x84, 0x21]);
        push_nal(&[0x09, 0xF0]);
        push_nal(&[0x41, 0x9A, 0x22, 0x11]);

        out
    }

    /// Parses `data` unit by unit the way the session consumes it, feeding
    /// `chunk` bytes at a time.
    fn parse_all(codec: &mut AnnexBCodec, data: &[u8], chunk: usize) -> Vec<(usize, UnitFlags)> {
        let mut acc = ByteAccumulator::new();
        let mut scan_offset = 0;
        let mut units = Vec::new();
        let mut chunks = data.chunks(chunk);
        let mut at_eos = false;
        loop {
            let result = {
                let mut input = ParseInput::new(&acc, at_eos, &mut scan_offset);
                if input.available() == 0 {
                    Err(DecodeError::NeedMoreInput)
                } else {
                    codec.parse(&mut input)
                }
            };
            match result {
                Ok(unit) => {
                    acc.take(unit.size()).unwrap();
                    scan_offset = 0;
                    units.push((unit.size(), unit.flags()));
                }
                Err(DecodeError::NeedMoreInput) => match chunks.next() {
                    Some(bytes) => acc.push(bytes, None).unwrap(),
                    None if !at_eos => at_eos = true,
                    None => return units,
                },
                Err(err) => panic!("unexpected {err}"),
            }
        }
    }

    #[test]
    fn chunked_parse_converges() {
        let data = h264_sample_annexb();
        let whole = parse_all(&mut AnnexBCodec::new(Codec::H264), &data, data.len());
        assert_eq!(whole.len(), 6);
        for chunk in [1, 2, 3, 5] {
            let chunked = parse_all(&mut AnnexBCodec::new(Codec::H264), &data, chunk);
            assert_eq!(chunked, whole, "chunk size {chunk}");
        }

        let flags: Vec<_> = whole.iter().map(|&(_, flags)| flags).collect();
        assert_eq!(
            flags,
            vec![
                UnitFlags::FRAME_START,
                UnitFlags::FRAME_START,
                UnitFlags::FRAME_START,
                UnitFlags::SLICE | UnitFlags::FRAME_START,
                UnitFlags::FRAME_START,
                UnitFlags::SLICE | UnitFlags::FRAME_START,
            ]
        );
    }

    #[test]
    fn extracts_required_parameter_sets() {
        let data = h264_sample_annexb();
        let mut codec = AnnexBCodec::new(Codec::H264);
        parse_all(&mut codec, &data, 7);

        let params = codec.parameter_sets().required_for_codec(Codec::H264).unwrap();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0][0], 0x67);
        assert_eq!(codec.profile(), Profile::H264Main);
        assert!(codec.parameter_sets().required_for_codec(Codec::Hevc).is_none());
    }

    #[test]
    fn repeated_parameter_sets_do_not_mark_the_cache_changed() {
        let mut cache = ParameterSetCache::default();
        assert!(cache.observe(Codec::H264, &[0x67, 0x4D, 0x00]));
        assert!(!cache.observe(Codec::H264, &[0x67, 0x4D, 0x00]));
        assert!(cache.observe(Codec::H264, &[0x67, 0x42, 0x00]));
        assert!(!cache.observe(Codec::H264, &[0x65, 0x88]));
        assert!(cache.required_for_codec(Codec::H264).is_none());
        assert!(cache.observe(Codec::H264, &[0x68, 0xCE]));
        assert_eq!(
            cache.required_for_codec(Codec::H264),
            Some(vec![vec![0x67, 0x42, 0x00], vec![0x68, 0xCE]])
        );
    }

    #[test]
    fn leading_garbage_and_empty_nals_are_skipped() {
        let data = [0xAB, 0xCD, 0, 0, 1, 0, 0, 1, 0x65, 0x88];
        let units = parse_all(&mut AnnexBCodec::new(Codec::H264), &data, data.len());
        assert_eq!(
            units,
            vec![
                (2, UnitFlags::SKIP),
                (3, UnitFlags::SKIP),
                (5, UnitFlags::SLICE | UnitFlags::FRAME_START),
            ]
        );
    }

    #[test]
    fn hevc_types_are_classified() {
        assert_eq!(classify_nal(Codec::Hevc, &[0x40, 0x01]), UnitFlags::FRAME_START);
        assert_eq!(classify_nal(Codec::Hevc, &[0x46, 0x01]), UnitFlags::FRAME_START);
        assert_eq!(
            classify_nal(Codec::Hevc, &[0x26, 0x01, 0xAF]),
            UnitFlags::SLICE | UnitFlags::FRAME_START
        );
        assert_eq!(classify_nal(Codec::Hevc, &[0x02, 0x01, 0x20]), UnitFlags::SLICE);
        assert_eq!(classify_nal(Codec::Hevc, &[0x4A, 0x01]), UnitFlags::FRAME_END);
        assert_eq!(classify_nal(Codec::Hevc, &[0x50, 0x01]), UnitFlags::NONE);
        assert_eq!(classify_nal(Codec::Hevc, &[0x4C, 0x01]), UnitFlags::SKIP);
        assert_eq!(classify_nal(Codec::Hevc, &[]), UnitFlags::SKIP);
    }

    #[test]
    fn hevc_main10_profile_is_detected() {
        let sps = [0x42, 0x01, 0x01, 0x02, 0x20];
        assert_eq!(sps_profile(Codec::Hevc, &sps), Some(Profile::HevcMain10));
        assert_eq!(sps_profile(Codec::Hevc, &[0x42, 0x01, 0x01, 0x01]), Some(Profile::HevcMain));
        assert_eq!(sps_profile(Codec::H264, &[0x67, 0x42]), Some(Profile::H264Baseline));
        assert_eq!(sps_profile(Codec::H264, &[0x68, 0x42]), None);
    }
}
