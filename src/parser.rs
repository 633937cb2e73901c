use bytes::Bytes;
use log::trace;

use crate::accumulator::{AccumulatorId, ByteAccumulator};
use crate::unit::CodedUnit;
use crate::{CodecHooks, DecodeError, Timestamp90k};

/// View of the input accumulator handed to `CodecHooks::parse`.
///
/// The scan offset lets a codec resume a boundary search where the previous
/// call stopped instead of rescanning bytes it has already examined. It is
/// reset whenever a unit is consumed or the accumulator changes.
pub struct ParseInput<'a> {
    accumulator: &'a ByteAccumulator,
    at_eos: bool,
    scan_offset: &'a mut usize,
}

impl<'a> ParseInput<'a> {
    pub fn new(accumulator: &'a ByteAccumulator, at_eos: bool, scan_offset: &'a mut usize) -> Self {
        Self {
            accumulator,
            at_eos,
            scan_offset,
        }
    }

    pub fn data(&self) -> &'a [u8] {
        self.accumulator.as_slice()
    }

    pub fn available(&self) -> usize {
        self.accumulator.available()
    }

    pub fn at_eos(&self) -> bool {
        self.at_eos
    }

    pub fn scan_offset(&self) -> usize {
        (*self.scan_offset).min(self.available())
    }

    pub fn set_scan_offset(&mut self, offset: usize) {
        *self.scan_offset = offset;
    }
}

#[derive(Debug, Default)]
pub struct FrameAssembly {
    units: Vec<CodedUnit>,
    output_offset: usize,
    last_slice: Option<usize>,
    payload: Bytes,
    pts: Option<Timestamp90k>,
    complete: bool,
}

impl FrameAssembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[CodedUnit] {
        &self.units
    }

    pub fn output_offset(&self) -> usize {
        self.output_offset
    }

    pub fn last_slice(&self) -> Option<&CodedUnit> {
        self.last_slice.map(|index| &self.units[index])
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = payload;
    }

    pub fn pts(&self) -> Option<Timestamp90k> {
        self.pts
    }

    pub fn set_pts(&mut self, pts: Option<Timestamp90k>) {
        self.pts = pts;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit_data(&self, unit: &CodedUnit) -> Option<&[u8]> {
        let end = unit.offset().checked_add(unit.size())?;
        self.payload.get(unit.offset()..end)
    }

    pub(crate) fn append(&mut self, mut unit: CodedUnit) {
        unit.set_offset(self.output_offset);
        self.output_offset += unit.size();
        if unit.is_slice() {
            self.last_slice = Some(self.units.len());
        }
        self.units.push(unit);
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    pub(crate) fn into_parts(self) -> (Vec<CodedUnit>, Bytes, Option<Timestamp90k>) {
        (self.units, self.payload, self.pts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOutcome {
    pub unit_size: usize,
    pub got_frame: bool,
}

/// State that must survive across calls ending in `NeedMoreInput`.
#[derive(Debug, Default)]
pub(crate) struct ParseContinuity {
    pending_unit: Option<CodedUnit>,
    accumulator: Option<AccumulatorId>,
    scan_offset: usize,
}

impl ParseContinuity {
    fn prepare(&mut self, accumulator: AccumulatorId) {
        if self.accumulator != Some(accumulator) {
            trace!("parser switched to accumulator {accumulator:?}, resetting scan state");
            self.accumulator = Some(accumulator);
            self.scan_offset = 0;
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ParserState {
    continuity: ParseContinuity,
    current_frame: Option<FrameAssembly>,
}

impl ParserState {
    pub fn has_pending(&self) -> bool {
        self.continuity.pending_unit.is_some()
    }

    pub fn continuity_mut(&mut self) -> &mut ParseContinuity {
        &mut self.continuity
    }

    pub fn current_frame(&self) -> Option<&FrameAssembly> {
        self.current_frame.as_ref()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut FrameAssembly> {
        self.current_frame.as_mut()
    }

    pub fn take_current_frame(&mut self) -> Option<FrameAssembly> {
        self.current_frame.take()
    }

    pub fn parse_current(
        &mut self,
        hooks: &mut dyn CodecHooks,
        input: &ByteAccumulator,
        at_eos: bool,
    ) -> Result<ParseOutcome, DecodeError> {
        let frame = self.current_frame.get_or_insert_with(FrameAssembly::new);
        let result = do_parse(hooks, &mut self.continuity, frame, input, at_eos);
        // No frame exists until a unit arrives.
        if result.is_err() && self.current_frame.as_ref().is_some_and(FrameAssembly::is_empty) {
            self.current_frame = None;
        }
        result
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub(crate) fn do_parse(
    hooks: &mut dyn CodecHooks,
    continuity: &mut ParseContinuity,
    frame: &mut FrameAssembly,
    input: &ByteAccumulator,
    at_eos: bool,
) -> Result<ParseOutcome, DecodeError> {
    continuity.prepare(input.id());

    let unit = match continuity.pending_unit.take() {
        Some(unit) => {
            trace!("consuming pending unit ({} bytes)", unit.size());
            unit
        }
        None => {
            if input.is_empty() {
                return Err(DecodeError::NeedMoreInput);
            }
            let mut parse_input = ParseInput::new(input, at_eos, &mut continuity.scan_offset);
            let unit = hooks.parse(&mut parse_input)?;
            if unit.size() == 0 {
                return Err(DecodeError::Parse(
                    "codec produced an empty coded unit".to_string(),
                ));
            }
            if unit.size() > input.available() {
                return Err(DecodeError::Parse(format!(
                    "coded unit of {} bytes exceeds {} buffered bytes",
                    unit.size(),
                    input.available()
                )));
            }
            if unit.is_frame_start() && frame.last_slice().is_some() {
                trace!("frame boundary found at next frame start, deferring unit");
                continuity.pending_unit = Some(unit);
                frame.mark_complete();
                return Ok(ParseOutcome {
                    unit_size: 0,
                    got_frame: true,
                });
            }
            unit
        }
    };

    continuity.scan_offset = 0;
    let unit_size = unit.size();
    let got_frame = unit.is_frame_end();
    frame.append(unit);
    if got_frame {
        frame.mark_complete();
    }
    Ok(ParseOutcome {
        unit_size,
        got_frame,
    })
}
