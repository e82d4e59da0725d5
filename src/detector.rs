//! Adaptive coin detection over the light sensor.
//!
//! A fixed absolute threshold fails when ambient light changes, so the
//! detector tracks a slow exponential-moving-average baseline and fires on
//! spikes *relative* to it. Firing is gated twice: a minimum run of
//! above-threshold samples rejects single-sample glitches, and a minimum
//! elapsed time rejects mechanical bounce from a coin rocking past the
//! sensor. One event per coin: after firing, the detector stays in a coin
//! window until the signal falls back near baseline.

use tracing::debug;

use crate::config::MachineConfig;

/// Light-sensor spike detector emitting debounced coin events.
///
/// Feed one sample per control tick via [`CoinDetector::sample`]. The caller
/// gates feeding: the machine does not run detection while dispensing,
/// returning change, or faulted.
#[derive(Debug)]
pub struct CoinDetector {
    alpha: f32,
    rising_delta: f32,
    falling_delta: f32,
    min_samples: u32,
    min_elapsed_ms: u64,
    tick_ms: u64,

    /// Ambient estimate; seeded by the first sample.
    baseline: Option<f32>,
    /// Above-threshold samples since arming.
    sample_count: u32,
    /// Ticks since the arming sample.
    armed_ticks: u32,
    /// True while a coin occludes the sensor; blocks re-fire and baseline
    /// updates until the falling threshold is crossed.
    in_coin_window: bool,
}

impl CoinDetector {
    pub fn new(config: &MachineConfig) -> Self {
        Self {
            alpha: config.baseline_alpha,
            rising_delta: config.coin_rising_delta,
            falling_delta: config.coin_falling_delta,
            min_samples: config.coin_min_samples,
            min_elapsed_ms: config.coin_min_elapsed_ms,
            tick_ms: config.tick_ms,
            baseline: None,
            sample_count: 0,
            armed_ticks: 0,
            in_coin_window: false,
        }
    }

    /// Current ambient estimate, once seeded.
    pub fn baseline(&self) -> Option<f32> {
        self.baseline
    }

    pub fn in_coin_window(&self) -> bool {
        self.in_coin_window
    }

    /// Feed one tick's light reading (0-100 scale). Returns `true` exactly
    /// when a debounced coin event fires.
    pub fn sample(&mut self, light_pct: f32) -> bool {
        let Some(baseline) = self.baseline else {
            self.baseline = Some(light_pct);
            return false;
        };

        let delta = light_pct - baseline;

        if self.in_coin_window {
            // Re-arm only once the signal has fallen back near baseline.
            // A stuck-high sensor (wedged coin) therefore never re-fires.
            if delta < self.falling_delta {
                self.in_coin_window = false;
                self.sample_count = 0;
                self.armed_ticks = 0;
            }
            return false;
        }

        if delta > self.rising_delta {
            // Suspected coin transient: excluded from the baseline so the
            // spike does not erase itself.
            if self.sample_count == 0 {
                self.armed_ticks = 0;
            } else {
                self.armed_ticks += 1;
            }
            self.sample_count += 1;

            let elapsed_ms = u64::from(self.armed_ticks) * self.tick_ms;
            if self.sample_count >= self.min_samples && elapsed_ms > self.min_elapsed_ms {
                self.in_coin_window = true;
                self.sample_count = 0;
                self.armed_ticks = 0;
                debug!(light_pct, baseline, delta, "coin spike confirmed");
                return true;
            }
            return false;
        }

        // Ambient drift: fold into the baseline.
        self.baseline = Some(baseline * (1.0 - self.alpha) + light_pct * self.alpha);

        if delta < self.falling_delta {
            // Below the falling threshold the run is over; between the two
            // thresholds the counter holds and the elapsed timer keeps going.
            self.sample_count = 0;
            self.armed_ticks = 0;
        } else if self.sample_count > 0 {
            self.armed_ticks += 1;
        }

        false
    }
}
