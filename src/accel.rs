use std::sync::{Arc, Mutex, PoisonError};

use crate::context::{ContextInfo, SurfaceId};
use crate::{Accelerator, DecodeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureRecord {
    pub surface: SurfaceId,
    pub slices: usize,
    pub slice_bytes: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AcceleratorStats {
    pub contexts_created: usize,
    pub contexts_reset: usize,
    pub last_context: Option<ContextInfo>,
    pub parameter_set_submissions: usize,
    pub parameter_sets: Vec<Vec<u8>>,
    pub pictures_completed: usize,
    pub last_picture: Option<PictureRecord>,
    pub abandoned_pictures: usize,
    pub slices_submitted: usize,
    pub slice_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct AcceleratorProbe {
    stats: Arc<Mutex<AcceleratorStats>>,
}

impl AcceleratorProbe {
    pub fn snapshot(&self) -> AcceleratorStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

/// In-process accelerator that validates the call sequence and records what
/// it was asked to render. It performs no pixel work.
#[derive(Debug, Clone, Default)]
pub struct CountingAccelerator {
    stats: Arc<Mutex<AcceleratorStats>>,
    max_surfaces: Option<usize>,
    open_picture: Option<PictureRecord>,
}

impl CountingAccelerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses contexts asking for more than `max` surfaces.
    #[must_use]
    pub fn with_max_surfaces(mut self, max: usize) -> Self {
        self.max_surfaces = Some(max);
        self
    }

    pub fn probe(&self) -> AcceleratorProbe {
        AcceleratorProbe {
            stats: Arc::clone(&self.stats),
        }
    }

    fn update(&self, f: impl FnOnce(&mut AcceleratorStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    fn check_limits(&self, info: &ContextInfo) -> Result<(), DecodeError> {
        match self.max_surfaces {
            Some(max) if info.surface_count > max => Err(DecodeError::Context(format!(
                "{} surfaces requested, device supports {max}",
                info.surface_count
            ))),
            _ => Ok(()),
        }
    }

    fn picture_on(&mut self, surface: SurfaceId) -> Result<&mut PictureRecord, DecodeError> {
        match self.open_picture.as_mut() {
            Some(picture) if picture.surface == surface => Ok(picture),
            Some(picture) => Err(DecodeError::Decode(format!(
                "{surface} used while {} is being decoded",
                picture.surface
            ))),
            None => Err(DecodeError::Decode(format!(
                "{surface} has no picture in progress"
            ))),
        }
    }
}

impl Accelerator for CountingAccelerator {
    fn create_context(&mut self, info: &ContextInfo) -> Result<(), DecodeError> {
        self.check_limits(info)?;
        self.update(|stats| {
            stats.contexts_created += 1;
            stats.last_context = Some(*info);
        });
        Ok(())
    }

    fn reset_context(&mut self, info: &ContextInfo) -> Result<(), DecodeError> {
        self.check_limits(info)?;
        self.open_picture = None;
        self.update(|stats| {
            stats.contexts_reset += 1;
            stats.last_context = Some(*info);
        });
        Ok(())
    }

    fn submit_parameter_sets(&mut self, sets: &[Vec<u8>]) -> Result<(), DecodeError> {
        if sets.iter().any(Vec::is_empty) {
            return Err(DecodeError::Decode("empty parameter set".to_string()));
        }
        self.update(|stats| {
            stats.parameter_set_submissions += 1;
            stats.parameter_sets = sets.to_vec();
        });
        Ok(())
    }

    fn begin_picture(&mut self, surface: SurfaceId) -> Result<(), DecodeError> {
        // A picture left open by a failed frame is abandoned.
        if self.open_picture.is_some() {
            self.update(|stats| stats.abandoned_pictures += 1);
        }
        self.open_picture = Some(PictureRecord {
            surface,
            slices: 0,
            slice_bytes: 0,
        });
        Ok(())
    }

    fn submit_slice(&mut self, surface: SurfaceId, data: &[u8]) -> Result<(), DecodeError> {
        let picture = self.picture_on(surface)?;
        picture.slices += 1;
        picture.slice_bytes += data.len();
        let len = data.len();
        self.update(|stats| {
            stats.slices_submitted += 1;
            stats.slice_bytes += len;
        });
        Ok(())
    }

    fn end_picture(&mut self, surface: SurfaceId) -> Result<(), DecodeError> {
        self.picture_on(surface)?;
        if let Some(picture) = self.open_picture.take() {
            self.update(|stats| {
                stats.pictures_completed += 1;
                stats.last_picture = Some(picture);
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_pictures_and_rejects_out_of_order_calls() {
        let mut accel = CountingAccelerator::new();
        let probe = accel.probe();
        assert!(accel.submit_slice(SurfaceId(0), &[1]).is_err());

        accel.begin_picture(SurfaceId(4)).unwrap();
        accel.begin_picture(SurfaceId(3)).unwrap();
        accel.submit_slice(SurfaceId(3), &[1, 2, 3]).unwrap();
        accel.submit_slice(SurfaceId(3), &[4]).unwrap();
        assert!(accel.submit_slice(SurfaceId(4), &[4]).is_err());
        accel.end_picture(SurfaceId(3)).unwrap();

        let stats = probe.snapshot();
        assert_eq!(stats.pictures_completed, 1);
        assert_eq!(
            stats.last_picture,
            Some(PictureRecord {
                surface: SurfaceId(3),
                slices: 2,
                slice_bytes: 4,
            })
        );
        assert_eq!(stats.slices_submitted, 2);
        assert_eq!(stats.abandoned_pictures, 1);
    }

    #[test]
    fn picture_stats_stay_bounded() {
        let mut accel = CountingAccelerator::new();
        let probe = accel.probe();
        for index in 0..1000 {
            accel.begin_picture(SurfaceId(index % 4)).unwrap();
            accel.end_picture(SurfaceId(index % 4)).unwrap();
        }
        let stats = probe.snapshot();
        assert_eq!(stats.pictures_completed, 1000);
        assert_eq!(stats.last_picture.map(|p| p.surface), Some(SurfaceId(3)));
    }

    #[test]
    fn parameter_sets_replace_previous_ones() {
        let mut accel = CountingAccelerator::new();
        let probe = accel.probe();
        accel.submit_parameter_sets(&[vec![0x67, 1], vec![0x68, 2]]).unwrap();
        accel.submit_parameter_sets(&[vec![0x67, 3], vec![0x68, 4]]).unwrap();
        assert!(accel.submit_parameter_sets(&[Vec::new()]).is_err());

        let stats = probe.snapshot();
        assert_eq!(stats.parameter_set_submissions, 2);
        assert_eq!(stats.parameter_sets, vec![vec![0x67, 3], vec![0x68, 4]]);
    }
}
