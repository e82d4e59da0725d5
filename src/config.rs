//! Machine tuning.
//!
//! Every threshold, debounce count, and timeout that varied across firmware
//! revisions lives here rather than in the algorithms. Defaults match the
//! deployed calibration.

use serde::Deserialize;

use crate::model::{Credit, PRODUCT_COUNT};

/// All tunables for one machine. Deserializable so a deployment can load
/// its own calibration; `Default` is the reference calibration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MachineConfig {
    /// Main control tick period in milliseconds.
    pub tick_ms: u64,

    // Coin detector
    /// EMA weight for ambient baseline adaptation.
    pub baseline_alpha: f32,
    /// Spike height above baseline that arms detection, in percent points.
    pub coin_rising_delta: f32,
    /// Delta below which the coin window re-arms.
    pub coin_falling_delta: f32,
    /// Consecutive above-threshold samples required to fire.
    pub coin_min_samples: u32,
    /// Minimum elapsed time from the first above-threshold sample.
    pub coin_min_elapsed_ms: u64,

    // Presence sensing
    /// Distance below which a customer counts as present, in cm.
    pub active_distance_cm: f32,
    /// Hysteresis band: absence requires `active + margin`.
    pub exit_margin_cm: f32,
    /// Consecutive near ticks before Idle -> AwaitingPayment.
    pub presence_enter_ticks: u32,
    /// Consecutive far ticks before AwaitingPayment -> Idle.
    pub presence_exit_ticks: u32,

    // Distance filter
    /// Raw samples taken per reading cycle.
    pub distance_samples_per_cycle: usize,
    /// Hardware-valid range, in cm. Samples outside are discarded.
    pub min_valid_distance_cm: f32,
    pub max_valid_distance_cm: f32,
    /// An average this much closer than the cache is a spurious reflection.
    pub approach_jump_cm: f32,

    // Transaction timing
    /// No-coin timeout before credit is refunded.
    pub inactivity_timeout_ms: u64,
    /// Fresh sufficient credit auto-dispenses after this long; `None`
    /// requires an explicit confirm command.
    pub auto_dispense_after_ms: Option<u64>,
    /// Total dispense profile duration.
    pub dispense_ms: u64,
    /// Kick phase within the dispense profile.
    pub dispense_kick_ms: u64,
    /// Change-return pulse pattern duration.
    pub change_return_ms: u64,

    // Thermal protection
    /// Temperature at or above which commerce halts.
    pub fault_temp_c: i32,
    /// Recovery requires dropping this far below the fault threshold.
    pub fault_hysteresis_c: i32,

    // Actuator profile
    /// Servo rest / hold position.
    pub servo_rest: f32,
    /// Servo kick position during the first dispense phase.
    pub servo_kick: f32,
    /// Change-return buzzer pattern: full period and on-window.
    pub change_pulse_period_ms: u64,
    pub change_pulse_on_ms: u64,

    // Commerce
    /// Unit price per product slot, indexed by `ProductId - 1`.
    pub prices: [Credit; PRODUCT_COUNT],
    /// Per-slot stock capacity.
    pub max_stock: u8,

    // Telemetry and liveness
    /// Ticks between outbound temperature/humidity publishes.
    pub telemetry_publish_ticks: u32,
    /// Background probe read cadence (the probe needs 2 s between reads).
    pub telemetry_poll_ms: u64,
    /// Watchdog starvation timeout.
    pub watchdog_timeout_ms: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            baseline_alpha: 0.10,
            coin_rising_delta: 25.0,
            coin_falling_delta: 15.0,
            coin_min_samples: 5,
            coin_min_elapsed_ms: 300,
            active_distance_cm: 40.0,
            exit_margin_cm: 20.0,
            presence_enter_ticks: 5,
            presence_exit_ticks: 20,
            distance_samples_per_cycle: 3,
            min_valid_distance_cm: 2.0,
            max_valid_distance_cm: 400.0,
            approach_jump_cm: 50.0,
            inactivity_timeout_ms: 30_000,
            auto_dispense_after_ms: None,
            dispense_ms: 2_000,
            dispense_kick_ms: 1_000,
            change_return_ms: 3_000,
            fault_temp_c: 28,
            fault_hysteresis_c: 2,
            servo_rest: 0.05,
            servo_kick: 0.10,
            change_pulse_period_ms: 400,
            change_pulse_on_ms: 200,
            prices: [1, 2, 1, 2],
            max_stock: 5,
            telemetry_publish_ticks: 20,
            telemetry_poll_ms: 2_000,
            watchdog_timeout_ms: 10_000,
        }
    }
}

impl MachineConfig {
    /// Unit price for a product slot.
    pub fn price(&self, product: crate::model::ProductId) -> Credit {
        self.prices[(product as usize).saturating_sub(1).min(PRODUCT_COUNT - 1)]
    }

    /// Distance at or beyond which the customer counts as departed.
    pub fn exit_distance_cm(&self) -> f32 {
        self.active_distance_cm + self.exit_margin_cm
    }
}
