use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

use crate::{DecodeError, Timestamp90k};

static NEXT_ACCUMULATOR_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccumulatorId(u64);

#[derive(Debug, Clone, Copy)]
struct TimestampMark {
    offset: u64,
    pts: Timestamp90k,
}

#[derive(Debug, Clone)]
pub struct TakenBytes {
    pub data: Bytes,
    pub pts: Option<Timestamp90k>,
}

/// Append/consume byte buffer that remembers where each pushed chunk began.
///
/// Timestamp marks use absolute stream offsets, counted from the first byte
/// ever pushed, so they stay valid as the front of the buffer is split off.
#[derive(Debug)]
pub struct ByteAccumulator {
    id: AccumulatorId,
    data: BytesMut,
    consumed: u64,
    marks: VecDeque<TimestampMark>,
    prev_pts: Option<Timestamp90k>,
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteAccumulator {
    pub fn new() -> Self {
        Self {
            id: AccumulatorId(NEXT_ACCUMULATOR_ID.fetch_add(1, Ordering::Relaxed)),
            data: BytesMut::new(),
            consumed: 0,
            marks: VecDeque::new(),
            prev_pts: None,
        }
    }

    pub fn id(&self) -> AccumulatorId {
        self.id
    }

    pub fn available(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn push(&mut self, bytes: &[u8], pts: Option<Timestamp90k>) -> Result<(), DecodeError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_capacity(bytes.len())?;
        self.mark(pts);
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Appends bytes split off another accumulator. Bytes that directly
    /// follow the buffered ones in memory are joined without copying.
    pub fn append(&mut self, bytes: BytesMut, pts: Option<Timestamp90k>) -> Result<(), DecodeError> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.check_capacity(bytes.len())?;
        self.mark(pts);
        self.data.unsplit(bytes);
        Ok(())
    }

    /// Timestamp of the chunk holding the next unconsumed byte, falling back
    /// to the closest earlier chunk that carried one.
    pub fn prev_timestamp(&self) -> Option<Timestamp90k> {
        self.marks
            .iter()
            .take_while(|mark| mark.offset <= self.consumed)
            .last()
            .map(|mark| mark.pts)
            .or(self.prev_pts)
    }

    pub fn take(&mut self, n: usize) -> Result<TakenBytes, DecodeError> {
        let (data, pts) = self.take_mut(n)?;
        Ok(TakenBytes {
            data: data.freeze(),
            pts,
        })
    }

    pub fn take_mut(&mut self, n: usize) -> Result<(BytesMut, Option<Timestamp90k>), DecodeError> {
        let available = self.available();
        if n > available {
            return Err(DecodeError::InvalidParameter(format!(
                "cannot take {n} bytes, only {available} buffered"
            )));
        }
        self.advance_marks();
        let data = self.data.split_to(n);
        self.consumed += n as u64;
        Ok((data, self.prev_pts))
    }

    pub fn take_all(&mut self) -> Result<TakenBytes, DecodeError> {
        self.take(self.available())
    }

    pub fn clear(&mut self) {
        self.consumed += self.data.len() as u64;
        self.data.clear();
        self.marks.clear();
        self.prev_pts = None;
    }

    fn check_capacity(&self, additional: usize) -> Result<(), DecodeError> {
        match self.data.len().checked_add(additional) {
            Some(total) if total <= isize::MAX as usize => Ok(()),
            _ => Err(DecodeError::AllocationFailed),
        }
    }

    fn mark(&mut self, pts: Option<Timestamp90k>) {
        if let Some(pts) = pts {
            self.marks.push_back(TimestampMark {
                offset: self.consumed + self.data.len() as u64,
                pts,
            });
        }
    }

    fn advance_marks(&mut self) {
        while let Some(mark) = self.marks.front().copied() {
            if mark.offset > self.consumed {
                break;
            }
            self.prev_pts = Some(mark.pts);
            self.marks.pop_front();
        }
    }
}
