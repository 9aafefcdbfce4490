//! Sparse per-record latency sampling.

use std::time::Instant;

use thiserror::Error;

use crate::error::Error as CrateError;
use crate::queue::Seq;

/// Error from reading the tracker with a bad index.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TrackerError {
    /// Sample index or stage is outside the tracker's shape.
    #[error("sample index {index} / stage {stage} out of range")]
    OutOfRange { index: usize, stage: usize },
    /// `interval` needs a stage with a predecessor.
    #[error("stage must be > 0 to compute an interval")]
    StageZero,
}

impl From<TrackerError> for CrateError {
    fn from(e: TrackerError) -> Self {
        CrateError::Generic(e.to_string())
    }
}

/// A dense `(num_samples, num_stages)` matrix of timestamps.
///
/// A timestamp for sequence number `seq` is stored only when
/// `seq % sample_interval == 0`, into sample slot
/// `(seq / sample_interval) % num_samples`. The slots form a ring: once
/// sequence numbers outrun `num_samples * sample_interval`, older samples
/// are overwritten.
///
/// During a session only the receiving client writes (through `&mut`);
/// other threads may read the tracker once the session has closed.
pub struct LatencyTracker {
    num_samples: usize,
    num_stages: usize,
    sample_interval: u64,
    points: Vec<Instant>,
}

impl LatencyTracker {
    /// A `sample_interval` of 0 is treated as 1 (every record sampled).
    pub fn new(num_samples: usize, num_stages: usize, sample_interval: u64) -> Self {
        let origin = Instant::now();
        Self {
            num_samples,
            num_stages,
            sample_interval: sample_interval.max(1),
            points: vec![origin; num_samples * num_stages],
        }
    }

    /// Whether `seq` is a latency sample under the configured interval.
    pub fn is_sample(&self, seq: Seq) -> bool {
        seq % self.sample_interval == 0
    }

    /// Store `value` for `seq` at `stage` if `seq` is a sample.
    ///
    /// Returns whether the timestamp was stored. An out-of-range stage is
    /// rejected the same way a non-sampled sequence number is.
    pub fn put(&mut self, seq: Seq, stage: usize, value: Instant) -> bool {
        if stage >= self.num_stages || self.num_samples == 0 {
            return false;
        }
        if seq % self.sample_interval != 0 {
            return false;
        }
        let slot = (seq / self.sample_interval) as usize % self.num_samples;
        self.points[slot * self.num_stages + stage] = value;
        true
    }

    /// The timestamp stored at `(index, stage)`.
    pub fn get(&self, index: usize, stage: usize) -> Result<Instant, TrackerError> {
        if stage >= self.num_stages || index >= self.num_samples {
            return Err(TrackerError::OutOfRange { index, stage });
        }
        Ok(self.points[index * self.num_stages + stage])
    }

    /// Seconds between `stage - 1` and `stage` at `index`.
    ///
    /// Saturates at zero for slots that were never written.
    pub fn interval(&self, index: usize, stage: usize) -> Result<f64, TrackerError> {
        if stage == 0 {
            return Err(TrackerError::StageZero);
        }
        let earlier = self.get(index, stage - 1)?;
        let later = self.get(index, stage)?;
        Ok(later.saturating_duration_since(earlier).as_secs_f64())
    }

    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    pub fn num_stages(&self) -> usize {
        self.num_stages
    }

    pub fn sample_interval(&self) -> u64 {
        self.sample_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn put_stores_only_sampled_seqs() {
        let mut tracker = LatencyTracker::new(4, 1, 3);
        let t = Instant::now();
        assert!(tracker.put(0, 0, t));
        assert!(!tracker.put(1, 0, t));
        assert!(!tracker.put(2, 0, t));
        assert!(tracker.put(3, 0, t));
        assert!(tracker.put(6, 0, t));
    }

    #[test]
    fn put_rejects_out_of_range_stage() {
        let mut tracker = LatencyTracker::new(4, 2, 1);
        assert!(!tracker.put(0, 2, Instant::now()));
    }

    #[test]
    fn put_wraps_around_samples() {
        let mut tracker = LatencyTracker::new(2, 1, 1);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(1);
        let t2 = t0 + Duration::from_millis(2);
        assert!(tracker.put(0, 0, t0));
        assert!(tracker.put(1, 0, t1));
        // seq 2 lands back on slot 0
        assert!(tracker.put(2, 0, t2));
        assert_eq!(tracker.get(0, 0).unwrap(), t2);
        assert_eq!(tracker.get(1, 0).unwrap(), t1);
    }

    #[test]
    fn get_fails_out_of_range() {
        let tracker = LatencyTracker::new(2, 2, 1);
        assert!(matches!(
            tracker.get(2, 0),
            Err(TrackerError::OutOfRange { index: 2, stage: 0 })
        ));
        assert!(matches!(
            tracker.get(0, 2),
            Err(TrackerError::OutOfRange { index: 0, stage: 2 })
        ));
    }

    #[test]
    fn interval_between_stages() {
        let mut tracker = LatencyTracker::new(1, 2, 1);
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(5);
        assert!(tracker.put(0, 0, t0));
        assert!(tracker.put(0, 1, t1));
        let secs = tracker.interval(0, 1).unwrap();
        assert!((secs - 0.005).abs() < 1e-6);
    }

    #[test]
    fn interval_requires_nonzero_stage() {
        let tracker = LatencyTracker::new(1, 2, 1);
        assert_eq!(tracker.interval(0, 0), Err(TrackerError::StageZero));
    }

    #[test]
    fn interval_saturates_for_unwritten_slots() {
        let tracker = LatencyTracker::new(1, 2, 1);
        assert_eq!(tracker.interval(0, 1).unwrap(), 0.0);
    }

    #[test]
    fn zero_interval_is_treated_as_one() {
        let mut tracker = LatencyTracker::new(2, 1, 0);
        assert_eq!(tracker.sample_interval(), 1);
        assert!(tracker.put(1, 0, Instant::now()));
    }
}
