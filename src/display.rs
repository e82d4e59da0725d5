//! Customer display: presenter and shared-bus guard.
//!
//! The panel is a 16x2 character device on a shared, non-reentrant bus.
//! Partial writes interleaved from two contexts corrupt the on-screen
//! content, so [`SharedDisplay`] serializes the full clear/write sequence
//! under one lock. Callers only ever see whole frames.

use std::sync::Mutex;

use crate::machine::Machine;
use crate::model::{MachineState, product_name};

/// Character columns per line.
pub const DISPLAY_COLS: usize = 16;
/// Lines on the panel.
pub const DISPLAY_ROWS: usize = 2;

/// Low-level character panel. The bus driver behind this is out of scope;
/// implementations receive already-padded fixed-width lines.
pub trait DisplayDevice: Send {
    fn clear(&mut self);
    fn write_line(&mut self, row: usize, text: &str);
}

/// Mutex-guarded panel: one lock around the whole frame.
pub struct SharedDisplay<D: DisplayDevice> {
    inner: Mutex<D>,
}

impl<D: DisplayDevice> SharedDisplay<D> {
    pub fn new(device: D) -> Self {
        Self {
            inner: Mutex::new(device),
        }
    }

    /// Write one whole frame: clear, then both lines padded/truncated to
    /// the panel width. The lock spans the entire sequence.
    pub fn render(&self, lines: &[String; DISPLAY_ROWS]) {
        let Ok(mut device) = self.inner.lock() else {
            return;
        };
        device.clear();
        let width = DISPLAY_COLS;
        for (row, line) in lines.iter().enumerate() {
            device.write_line(row, &format!("{line:<width$.width$}"));
        }
    }

    /// Consume the guard and return the device.
    pub fn into_inner(self) -> D {
        match self.inner.into_inner() {
            Ok(device) => device,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Render the machine's user-facing status as panel lines.
pub fn render_lines(machine: &Machine) -> [String; DISPLAY_ROWS] {
    let name = product_name(machine.selection());
    let price = machine.selection_price();
    let credit = machine.credit();

    match machine.state() {
        MachineState::Idle => ["Ready".into(), "Approach to buy".into()],

        MachineState::AwaitingPayment => {
            let header = format!("{name:<6}- {price}.00EUR");
            let detail = if credit == 0 {
                "Insert coin".into()
            } else if credit < price {
                format!("Cr:{credit}E Need {}E", price - credit)
            } else if machine.residual_credit() {
                format!("Cr:{credit}E Confirm?")
            } else {
                format!("Cr:{credit}E T-{:02}s", machine.inactivity_remaining_secs())
            };
            [header, detail]
        }

        MachineState::Dispensing => [format!("Vending {name}"), "Please wait".into()],

        MachineState::ReturningChange => {
            ["Take your change".into(), format!("Amount: {credit}.00E")]
        }

        MachineState::Fault => {
            let line = match machine.telemetry() {
                Some(t) => format!("T:{}C > {}C", t.temp_c, machine.config().fault_temp_c),
                None => "Probe offline".into(),
            };
            ["! TEMP ALARM !".into(), line]
        }
    }
}
