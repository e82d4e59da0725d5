//! Core domain types for the vending controller.

use thiserror::Error;

/// Product slot identifier, `1..=PRODUCT_COUNT`.
pub type ProductId = u8;

/// Credit balance in currency units (one unit = the cheapest product).
pub type Credit = u32;

/// Number of product slots in the machine.
pub const PRODUCT_COUNT: usize = 4;

/// Transaction state. The discriminant is the wire ordinal published in
/// status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MachineState {
    Idle = 0,
    AwaitingPayment = 1,
    Dispensing = 2,
    ReturningChange = 3,
    Fault = 4,
}

impl MachineState {
    /// Wire ordinal for telemetry consumers.
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// A remote command, parsed once from the wire byte. Wire-format validation
/// happens here; the state machine only ever sees these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Select a product slot (wire codes 1-4).
    SelectProduct(ProductId),
    /// Abort the session and return any credit (wire code 9).
    Cancel,
    /// Confirm the purchase of the current selection (wire code 10).
    Confirm,
    /// Refill every slot to capacity (wire code 11).
    Restock,
}

/// A wire byte that does not map to any command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unrecognized command code {0:#04x}")]
pub struct InvalidCommand(pub u8);

impl Command {
    /// Parse a single-byte wire command.
    pub fn parse(byte: u8) -> Result<Self, InvalidCommand> {
        match byte {
            1..=4 => Ok(Command::SelectProduct(byte)),
            9 => Ok(Command::Cancel),
            10 => Ok(Command::Confirm),
            11 => Ok(Command::Restock),
            other => Err(InvalidCommand(other)),
        }
    }
}

/// Display name for a product slot.
pub fn product_name(product: ProductId) -> &'static str {
    match product {
        1 => "WATER",
        2 => "SNACK",
        3 => "COFFEE",
        4 => "TEA",
        _ => "?",
    }
}

/// One temperature/humidity reading from the slow probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryReading {
    /// Degrees Celsius, integer per the probe's resolution.
    pub temp_c: i32,
    /// Relative humidity percent.
    pub humidity_pct: i32,
}

/// Everything the main tick samples from the sensor layer.
#[derive(Debug, Clone, Default)]
pub struct SensorFrame {
    /// Light sensor reading on the 0-100 scale.
    pub light_pct: f32,
    /// Raw time-of-flight distances for this cycle, in centimeters.
    pub distance_samples: Vec<f32>,
    /// Momentary cancel button, the local twin of wire code 9.
    pub cancel_button: bool,
    /// Latest probe reading, if the background worker has published one.
    pub telemetry: Option<TelemetryReading>,
}

/// Status record published on every observable change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub credit: Credit,
    pub state: MachineState,
    pub stock: [u8; PRODUCT_COUNT],
    pub selection: ProductId,
}

/// Tri-color status indicator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedColor {
    #[default]
    Off,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
}

impl LedColor {
    /// Per-channel drive levels, matching a three-pin RGB indicator.
    pub fn rgb(self) -> (bool, bool, bool) {
        match self {
            LedColor::Off => (false, false, false),
            LedColor::Red => (true, false, false),
            LedColor::Green => (false, true, false),
            LedColor::Blue => (false, false, true),
            LedColor::Yellow => (true, true, false),
            LedColor::Cyan => (false, true, true),
            LedColor::Magenta => (true, false, true),
        }
    }
}

/// Actuator outputs recomputed by every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommands {
    /// Dispensing servo position, `0.0..=1.0` duty.
    pub servo: f32,
    /// Audible indicator level.
    pub buzzer: bool,
    /// Status indicator color.
    pub led: LedColor,
}

impl ActuatorCommands {
    /// Quiescent outputs: servo parked, buzzer off, indicator off.
    pub fn quiescent(servo_rest: f32) -> Self {
        Self {
            servo: servo_rest,
            buzzer: false,
            led: LedColor::Off,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_select_codes() {
        for code in 1..=4u8 {
            assert_eq!(Command::parse(code), Ok(Command::SelectProduct(code)));
        }
    }

    #[test]
    fn parse_session_codes() {
        assert_eq!(Command::parse(9), Ok(Command::Cancel));
        assert_eq!(Command::parse(10), Ok(Command::Confirm));
        assert_eq!(Command::parse(11), Ok(Command::Restock));
    }

    #[test]
    fn parse_rejects_out_of_range() {
        for code in [0u8, 5, 6, 7, 8, 12, 42, 255] {
            assert_eq!(Command::parse(code), Err(InvalidCommand(code)));
        }
    }

    #[test]
    fn state_ordinals_match_wire_contract() {
        assert_eq!(MachineState::Idle.ordinal(), 0);
        assert_eq!(MachineState::AwaitingPayment.ordinal(), 1);
        assert_eq!(MachineState::Dispensing.ordinal(), 2);
        assert_eq!(MachineState::ReturningChange.ordinal(), 3);
        assert_eq!(MachineState::Fault.ordinal(), 4);
    }

    #[test]
    fn led_channel_levels() {
        assert_eq!(LedColor::Off.rgb(), (false, false, false));
        assert_eq!(LedColor::Yellow.rgb(), (true, true, false));
        assert_eq!(LedColor::Cyan.rgb(), (false, true, true));
    }
}
