//! The transaction state machine.
//!
//! One `Machine` owns the complete notion of "current transaction state":
//! credit, selection, FSM state, per-state timers, and the sensor filters
//! that feed it. Each control tick calls [`Machine::step`] exactly once
//! with that tick's sensor frame and the batch of remote commands drained
//! from the channel. Within a tick, sensor-derived events are applied
//! before remote commands, so a same-tick confirm sees that tick's credit.

use tracing::{info, warn};

use crate::config::MachineConfig;
use crate::detector::CoinDetector;
use crate::distance::DistanceFilter;
use crate::inventory::InventoryLedger;
use crate::model::{
    ActuatorCommands, Command, Credit, LedColor, MachineState, ProductId, SensorFrame,
    StatusSnapshot, TelemetryReading,
};

mod error;
pub use error::CommandError;

/// Product and price latched at dispense entry, so a mid-dispense selection
/// change affects the next purchase only.
#[derive(Debug, Clone, Copy)]
struct DispenseJob {
    product: ProductId,
    price: Credit,
}

/// The vending machine control core.
pub struct Machine {
    config: MachineConfig,
    detector: CoinDetector,
    distance: DistanceFilter,
    ledger: InventoryLedger,

    state: MachineState,
    credit: Credit,
    selection: ProductId,
    residual_credit: bool,
    job: Option<DispenseJob>,

    /// Ticks since the current state was entered.
    ticks_in_state: u32,
    /// Ticks since the last coin or selection.
    inactivity_ticks: u32,
    presence_ticks: u32,
    absence_ticks: u32,

    last_telemetry: Option<TelemetryReading>,
    actuators: ActuatorCommands,
    last_published: Option<StatusSnapshot>,
}

/// Public API
impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            detector: CoinDetector::new(&config),
            distance: DistanceFilter::new(&config),
            ledger: InventoryLedger::new(config.max_stock),
            state: MachineState::Idle,
            credit: 0,
            selection: 1,
            residual_credit: false,
            job: None,
            ticks_in_state: 0,
            inactivity_ticks: 0,
            presence_ticks: 0,
            absence_ticks: 0,
            last_telemetry: None,
            actuators: ActuatorCommands::quiescent(config.servo_rest),
            last_published: None,
            config,
        }
    }

    /// Run one control tick: sensor events first, then the command batch,
    /// then the current state's timers and transition rules. Returns a
    /// fresh snapshot when the observable status changed.
    pub fn step(&mut self, frame: &SensorFrame, commands: &[Command]) -> Option<StatusSnapshot> {
        self.ticks_in_state = self.ticks_in_state.saturating_add(1);
        self.inactivity_ticks = self.inactivity_ticks.saturating_add(1);

        if let Some(reading) = frame.telemetry {
            self.last_telemetry = Some(reading);
        }

        // Environmental fault preempts everything, from any state.
        if self.state != MachineState::Fault
            && let Some(t) = self.last_telemetry
            && t.temp_c >= self.config.fault_temp_c
        {
            warn!(temp_c = t.temp_c, "over-temperature, commerce halted");
            self.transition_to(MachineState::Fault);
        }

        let distance_cm = self.distance.filter_cycle(&frame.distance_samples);

        // Coin detection runs only while the machine can accept payment.
        if matches!(
            self.state,
            MachineState::Idle | MachineState::AwaitingPayment
        ) && self.detector.sample(frame.light_pct)
        {
            self.accept_coin();
        }

        // The local cancel button is wire code 9's twin.
        if frame.cancel_button {
            let result = self.apply_command(Command::Cancel);
            Self::log_result(Command::Cancel, &result);
        }

        for &cmd in commands {
            let result = self.apply_command(cmd);
            Self::log_result(cmd, &result);
        }

        self.run_state(distance_cm);

        let snapshot = self.snapshot();
        if self.last_published != Some(snapshot) {
            self.last_published = Some(snapshot);
            Some(snapshot)
        } else {
            None
        }
    }

    /// Apply one parsed command. Rejections leave all state unchanged.
    pub fn apply_command(&mut self, cmd: Command) -> Result<(), CommandError> {
        match cmd {
            Command::SelectProduct(product) => {
                if !self.ledger.available(product) {
                    return Err(CommandError::SoldOut(product));
                }
                self.selection = product;
                self.inactivity_ticks = 0;
                Ok(())
            }
            Command::Cancel => {
                if self.state != MachineState::AwaitingPayment {
                    return Err(CommandError::CancelWrongState(self.state));
                }
                if self.credit == 0 {
                    return Err(CommandError::NothingToRefund);
                }
                self.transition_to(MachineState::ReturningChange);
                Ok(())
            }
            Command::Confirm => {
                if self.state != MachineState::AwaitingPayment {
                    return Err(CommandError::ConfirmWrongState(self.state));
                }
                let price = self.config.price(self.selection);
                if self.credit < price {
                    return Err(CommandError::InsufficientCredit {
                        credit: self.credit,
                        price,
                    });
                }
                self.transition_to(MachineState::Dispensing);
                Ok(())
            }
            Command::Restock => {
                self.ledger.restock();
                Ok(())
            }
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn credit(&self) -> Credit {
        self.credit
    }

    pub fn selection(&self) -> ProductId {
        self.selection
    }

    pub fn selection_price(&self) -> Credit {
        self.config.price(self.selection)
    }

    pub fn residual_credit(&self) -> bool {
        self.residual_credit
    }

    pub fn stock(&self) -> [u8; crate::model::PRODUCT_COUNT] {
        self.ledger.stock()
    }

    pub fn remaining(&self, product: ProductId) -> u8 {
        self.ledger.remaining(product)
    }

    pub fn telemetry(&self) -> Option<TelemetryReading> {
        self.last_telemetry
    }

    /// Actuator outputs as of the last tick.
    pub fn actuators(&self) -> ActuatorCommands {
        self.actuators
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Whole seconds left before the inactivity refund.
    pub fn inactivity_remaining_secs(&self) -> u64 {
        let elapsed = u64::from(self.inactivity_ticks) * self.config.tick_ms;
        self.config.inactivity_timeout_ms.saturating_sub(elapsed) / 1000
    }

    /// Current status record.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            credit: self.credit,
            state: self.state,
            stock: self.ledger.stock(),
            selection: self.selection,
        }
    }
}

/// Private API
impl Machine {
    fn log_result(cmd: Command, result: &Result<(), CommandError>) {
        match result {
            Ok(()) => info!(?cmd, "command applied"),
            Err(e) => info!(?cmd, reason = %e, "command rejected"),
        }
    }

    fn accept_coin(&mut self) {
        self.credit = self.credit.saturating_add(1);
        self.residual_credit = false;
        self.inactivity_ticks = 0;
        info!(credit = self.credit, "coin accepted");
        // A coin alone starts a session.
        if self.state == MachineState::Idle {
            self.transition_to(MachineState::AwaitingPayment);
        }
    }

    /// Enter `next`: stop the prior state's patterns, reset the per-state
    /// timer and presence counters, run entry actions.
    fn transition_to(&mut self, next: MachineState) {
        let prev = self.state;
        self.actuators.buzzer = false;
        self.presence_ticks = 0;
        self.absence_ticks = 0;
        self.ticks_in_state = 0;
        self.state = next;
        info!(from = ?prev, to = ?next, "state transition");

        match next {
            MachineState::AwaitingPayment => {
                self.inactivity_ticks = 0;
            }
            MachineState::Dispensing => {
                // Close the selection/depletion race at actuation time, not
                // only at selection time.
                if !self.ledger.available(self.selection) {
                    warn!(
                        product = self.selection,
                        "sold out at dispense entry, refunding"
                    );
                    self.transition_to(MachineState::ReturningChange);
                    return;
                }
                self.job = Some(DispenseJob {
                    product: self.selection,
                    price: self.config.price(self.selection),
                });
            }
            _ => {}
        }
    }

    fn elapsed_ms(&self) -> u64 {
        u64::from(self.ticks_in_state) * self.config.tick_ms
    }

    /// Per-tick logic for the current state: actuator outputs, timers, and
    /// timer/presence-driven transitions.
    fn run_state(&mut self, distance_cm: Option<f32>) {
        let near = distance_cm.is_some_and(|d| d < self.config.active_distance_cm);
        let far = distance_cm.is_none_or(|d| d > self.config.exit_distance_cm());

        match self.state {
            MachineState::Idle => {
                self.actuators = ActuatorCommands {
                    servo: self.config.servo_rest,
                    buzzer: false,
                    led: LedColor::Green,
                };
                if near {
                    self.presence_ticks += 1;
                    if self.presence_ticks > self.config.presence_enter_ticks {
                        self.transition_to(MachineState::AwaitingPayment);
                    }
                } else {
                    self.presence_ticks = 0;
                }
            }

            MachineState::AwaitingPayment => {
                self.actuators = ActuatorCommands {
                    servo: self.config.servo_rest,
                    buzzer: false,
                    led: selection_color(self.selection),
                };

                let idle_ms = u64::from(self.inactivity_ticks) * self.config.tick_ms;
                let price = self.config.price(self.selection);
                let auto_ready = self
                    .config
                    .auto_dispense_after_ms
                    .is_some_and(|after| {
                        self.credit >= price && !self.residual_credit && idle_ms > after
                    });

                if auto_ready {
                    self.transition_to(MachineState::Dispensing);
                } else if self.credit > 0 && idle_ms > self.config.inactivity_timeout_ms {
                    // Refund on inactivity regardless of sufficiency.
                    self.transition_to(MachineState::ReturningChange);
                } else if self.credit == 0 {
                    if far {
                        self.absence_ticks += 1;
                        if self.absence_ticks > self.config.presence_exit_ticks {
                            self.transition_to(MachineState::Idle);
                        }
                    } else {
                        self.absence_ticks = 0;
                    }
                }
            }

            MachineState::Dispensing => {
                let elapsed = self.elapsed_ms();
                if elapsed < self.config.dispense_ms {
                    self.actuators = ActuatorCommands {
                        servo: if elapsed < self.config.dispense_kick_ms {
                            self.config.servo_kick
                        } else {
                            self.config.servo_rest
                        },
                        buzzer: true,
                        led: LedColor::Yellow,
                    };
                } else {
                    self.actuators.buzzer = false;
                    self.actuators.servo = self.config.servo_rest;
                    self.finish_dispense();
                }
            }

            MachineState::ReturningChange => {
                let elapsed = self.elapsed_ms();
                self.actuators = ActuatorCommands {
                    servo: self.config.servo_rest,
                    buzzer: elapsed % self.config.change_pulse_period_ms
                        < self.config.change_pulse_on_ms,
                    led: LedColor::Magenta,
                };
                if elapsed > self.config.change_return_ms {
                    info!(refunded = self.credit, "change returned");
                    self.credit = 0;
                    self.transition_to(MachineState::AwaitingPayment);
                }
            }

            MachineState::Fault => {
                self.actuators = if self.ticks_in_state % 2 == 0 {
                    ActuatorCommands {
                        servo: self.config.servo_rest,
                        buzzer: true,
                        led: LedColor::Red,
                    }
                } else {
                    ActuatorCommands::quiescent(self.config.servo_rest)
                };
                let recovered = self.last_telemetry.is_some_and(|t| {
                    t.temp_c <= self.config.fault_temp_c - self.config.fault_hysteresis_c
                });
                if recovered {
                    info!("temperature back in range, resuming");
                    self.transition_to(MachineState::Idle);
                }
            }
        }
    }

    /// Dispense profile complete: settle stock and credit, decide the next
    /// state by residual credit.
    fn finish_dispense(&mut self) {
        let Some(job) = self.job.take() else {
            // Unreachable through step(); recover to the refund path.
            self.transition_to(MachineState::ReturningChange);
            return;
        };
        if !self.ledger.try_dispense(job.product) {
            warn!(product = job.product, "stock vanished mid-dispense, refunding");
            self.transition_to(MachineState::ReturningChange);
            return;
        }
        self.credit = self.credit.saturating_sub(job.price);
        if self.credit > 0 {
            // Multi-purchase: residual credit spends only via explicit
            // confirm, with a fresh inactivity window.
            self.residual_credit = true;
        } else {
            self.residual_credit = false;
        }
        self.transition_to(MachineState::AwaitingPayment);
    }
}

/// Indicator color while awaiting payment, keyed by the selected product.
fn selection_color(product: ProductId) -> LedColor {
    match product {
        1 => LedColor::Cyan,
        2 => LedColor::Magenta,
        3 => LedColor::Yellow,
        _ => LedColor::Green,
    }
}
