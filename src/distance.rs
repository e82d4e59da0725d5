//! Presence distance filtering.
//!
//! The time-of-flight sensor is noisy in two distinct ways: individual
//! samples can fall outside the hardware's valid range (missed echo,
//! crosstalk), and a whole cycle can average out to a phantom close-range
//! reading from a spurious reflection. Range filtering and averaging handle
//! the first; the asymmetric anti-spike rule handles the second. Rapid
//! departure is physically plausible, rapid unexplained approach is not.

use crate::config::MachineConfig;

/// Per-cycle distance filter with a last-valid cache.
#[derive(Debug)]
pub struct DistanceFilter {
    min_valid_cm: f32,
    max_valid_cm: f32,
    approach_jump_cm: f32,
    last_valid_cm: Option<f32>,
}

impl DistanceFilter {
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            min_valid_cm: config.min_valid_distance_cm,
            max_valid_cm: config.max_valid_distance_cm,
            approach_jump_cm: config.approach_jump_cm,
            last_valid_cm: None,
        }
    }

    /// Last accepted reading, if any cycle has produced one.
    pub fn last_valid_cm(&self) -> Option<f32> {
        self.last_valid_cm
    }

    /// Reduce one cycle of raw samples to a filtered distance.
    ///
    /// Samples outside the valid hardware range are discarded and the rest
    /// averaged. A sample-less cycle returns the cache unchanged (fail-safe:
    /// a dropout must not read as a departure). An average more than the
    /// approach margin *below* the cache is suppressed as a spurious
    /// reflection; larger averages are always accepted. Accepted values
    /// update the cache. Returns `None` only before the first valid cycle.
    pub fn filter_cycle(&mut self, samples: &[f32]) -> Option<f32> {
        let mut sum = 0.0f32;
        let mut valid = 0u32;
        for &s in samples {
            if s >= self.min_valid_cm && s <= self.max_valid_cm {
                sum += s;
                valid += 1;
            }
        }

        if valid == 0 {
            return self.last_valid_cm;
        }

        let avg = sum / valid as f32;
        match self.last_valid_cm {
            Some(cached) if cached - avg > self.approach_jump_cm => Some(cached),
            _ => {
                self.last_valid_cm = Some(avg);
                Some(avg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> DistanceFilter {
        DistanceFilter::new(&MachineConfig::default())
    }

    #[test]
    fn averages_valid_samples() {
        let mut f = filter();
        assert_eq!(f.filter_cycle(&[100.0, 110.0, 120.0]), Some(110.0));
        assert_eq!(f.last_valid_cm(), Some(110.0));
    }

    #[test]
    fn discards_out_of_range_samples() {
        let mut f = filter();
        // 0.5 is below the hardware minimum, 900 above the maximum.
        assert_eq!(f.filter_cycle(&[0.5, 80.0, 900.0]), Some(80.0));
    }

    #[test]
    fn empty_cycle_returns_cache() {
        let mut f = filter();
        f.filter_cycle(&[50.0, 50.0, 50.0]);
        assert_eq!(f.filter_cycle(&[0.0, 0.0, 0.0]), Some(50.0));
        assert_eq!(f.filter_cycle(&[]), Some(50.0));
    }

    #[test]
    fn no_reading_before_first_valid_cycle() {
        let mut f = filter();
        assert_eq!(f.filter_cycle(&[]), None);
        assert_eq!(f.filter_cycle(&[0.0]), None);
    }

    #[test]
    fn departure_jump_is_accepted() {
        let mut f = filter();
        f.filter_cycle(&[20.0]);
        assert_eq!(f.filter_cycle(&[150.0]), Some(150.0));
        assert_eq!(f.last_valid_cm(), Some(150.0));
    }

    #[test]
    fn approach_jump_is_suppressed() {
        let mut f = filter();
        f.filter_cycle(&[200.0]);
        assert_eq!(f.filter_cycle(&[10.0]), Some(200.0));
        // Cache untouched by the suppressed reading.
        assert_eq!(f.last_valid_cm(), Some(200.0));
    }

    #[test]
    fn gradual_approach_tracks_normally() {
        let mut f = filter();
        f.filter_cycle(&[200.0]);
        for d in [170.0, 140.0, 110.0, 80.0, 50.0, 30.0] {
            assert_eq!(f.filter_cycle(&[d]), Some(d));
        }
    }
}
