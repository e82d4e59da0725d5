//! Concurrency wiring around the machine.
//!
//! Three execution contexts touch the system, exactly one of which owns the
//! machine: the periodic main tick (detector feed, distance consultation,
//! FSM step, display, watchdog kick), a background telemetry worker on its
//! own cadence publishing into the [`Mailbox`], and the remote command
//! stream, whose bytes are queued as they arrive and drained into a batch
//! at the top of each tick. The tick step itself contains no await points.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_stream::{Stream, StreamExt};
use tracing::{error, warn};

use crate::display::{DisplayDevice, SharedDisplay, render_lines};
use crate::machine::Machine;
use crate::mailbox::Mailbox;
use crate::model::{Command, SensorFrame, StatusSnapshot, TelemetryReading};

/// Per-tick sensor inputs. Implemented by the hardware layer, or scripted
/// for replay and tests.
pub trait SensorSource: Send {
    /// Light reading on the 0-100 scale.
    fn light_pct(&mut self) -> f32;
    /// One cycle of raw time-of-flight samples, cm.
    fn distance_samples(&mut self) -> Vec<f32>;
    /// Whether the cancel button is pressed this tick.
    fn cancel_pressed(&mut self) -> bool;
}

/// The slow temperature/humidity probe. One read involves a timing-critical
/// exchange, which is why it gets its own task and cadence.
pub trait TelemetryProbe: Send {
    /// Attempt one probe read; `None` on a failed exchange.
    fn read(&mut self) -> Option<TelemetryReading>;
}

/// Spawn the background probe worker. Results flow to the tick only through
/// the mailbox.
pub fn spawn_telemetry_worker<P>(
    mut probe: P,
    mailbox: Arc<Mailbox<TelemetryReading>>,
    poll_ms: u64,
) -> JoinHandle<()>
where
    P: TelemetryProbe + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(poll_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Some(reading) = probe.read() {
                mailbox.publish(reading);
            }
        }
    })
}

/// Liveness guard: the tick must call [`Watchdog::kick`] every cycle; the
/// monitor reports starvation so a supervisor can reset the process.
#[derive(Clone)]
pub struct Watchdog {
    last_kick: Arc<Mutex<Instant>>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_kick: Arc::new(Mutex::new(Instant::now())),
            timeout,
        }
    }

    pub fn kick(&self) {
        if let Ok(mut t) = self.last_kick.lock() {
            *t = Instant::now();
        }
    }

    pub fn starved(&self) -> bool {
        self.last_kick
            .lock()
            .map(|t| t.elapsed() > self.timeout)
            .unwrap_or(true)
    }

    /// Spawn the monitor task; it logs an error for every check interval
    /// the tick goes unserviced.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let watchdog = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(watchdog.timeout / 4);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if watchdog.starved() {
                    error!(
                        timeout_ms = watchdog.timeout.as_millis() as u64,
                        "main tick starved the watchdog"
                    );
                }
            }
        })
    }
}

/// Drive the machine until `shutdown` fires; returns the machine for
/// inspection. `status_tx` carries every published snapshot;
/// `telemetry_tx` is refreshed on the configured cadence.
pub async fn run<S, D>(
    mut machine: Machine,
    mut sensors: S,
    mut command_bytes: impl Stream<Item = u8> + Unpin,
    telemetry: Arc<Mailbox<TelemetryReading>>,
    display: Arc<SharedDisplay<D>>,
    status_tx: watch::Sender<StatusSnapshot>,
    telemetry_tx: watch::Sender<Option<TelemetryReading>>,
    watchdog: Watchdog,
    mut shutdown: oneshot::Receiver<()>,
) -> Machine
where
    S: SensorSource,
    D: DisplayDevice,
{
    let tick_ms = machine.config().tick_ms;
    let publish_every = machine.config().telemetry_publish_ticks.max(1);
    let mut ticker = interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut pending: Vec<Command> = Vec::new();
    let mut tick_count: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                watchdog.kick();
                tick_count = tick_count.wrapping_add(1);

                let frame = SensorFrame {
                    light_pct: sensors.light_pct(),
                    distance_samples: sensors.distance_samples(),
                    cancel_button: sensors.cancel_pressed(),
                    telemetry: telemetry.take(),
                };

                if let Some(snapshot) = machine.step(&frame, &pending) {
                    status_tx.send_replace(snapshot);
                }
                pending.clear();

                display.render(&render_lines(&machine));

                // Periodic re-publish keeps late-joining consumers current.
                if tick_count % publish_every == 0 {
                    telemetry_tx.send_replace(machine.telemetry());
                    status_tx.send_replace(machine.snapshot());
                }
            }
            Some(byte) = command_bytes.next() => {
                match Command::parse(byte) {
                    Ok(cmd) => pending.push(cmd),
                    Err(e) => warn!(reason = %e, "command rejected"),
                }
            }
            _ = &mut shutdown => break,
        }
    }

    machine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::model::MachineState;
    use tokio_stream::wrappers::ReceiverStream;

    /// Scripted frames, repeating the final frame once exhausted.
    struct ScriptedSensors {
        frames: Vec<(f32, f32)>,
        cursor: usize,
    }

    impl ScriptedSensors {
        fn new(frames: Vec<(f32, f32)>) -> Self {
            Self { frames, cursor: 0 }
        }
    }

    impl SensorSource for ScriptedSensors {
        fn light_pct(&mut self) -> f32 {
            let i = self.cursor.min(self.frames.len() - 1);
            self.frames[i].0
        }

        fn distance_samples(&mut self) -> Vec<f32> {
            let i = self.cursor.min(self.frames.len() - 1);
            let dist = self.frames[i].1;
            self.cursor += 1;
            vec![dist]
        }

        fn cancel_pressed(&mut self) -> bool {
            false
        }
    }

    struct NullPanel;

    impl DisplayDevice for NullPanel {
        fn clear(&mut self) {}
        fn write_line(&mut self, _row: usize, _text: &str) {}
    }

    struct FixedProbe(TelemetryReading);

    impl TelemetryProbe for FixedProbe {
        fn read(&mut self) -> Option<TelemetryReading> {
            Some(self.0)
        }
    }

    fn fast_config() -> MachineConfig {
        MachineConfig {
            tick_ms: 5,
            // Keep the debounce window proportional to the shrunk tick.
            coin_min_elapsed_ms: 15,
            ..MachineConfig::default()
        }
    }

    #[tokio::test]
    async fn purchase_through_the_full_loop() {
        let config = fast_config();
        let machine = Machine::new(config);

        // Approach, then hold a coin spike long enough to debounce.
        let mut frames = vec![(10.0, 30.0); 8];
        frames.extend([(60.0, 30.0); 70]);
        frames.push((10.0, 30.0));

        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(16);
        let (status_tx, mut status_rx) = watch::channel(machine.snapshot());
        let (telemetry_tx, _telemetry_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mailbox = Arc::new(Mailbox::new());
        let watchdog = Watchdog::new(Duration::from_secs(10));

        let task = tokio::spawn(run(
            machine,
            ScriptedSensors::new(frames),
            ReceiverStream::new(cmd_rx),
            mailbox,
            Arc::new(SharedDisplay::new(NullPanel)),
            status_tx,
            telemetry_tx,
            watchdog,
            stop_rx,
        ));

        // Wait for the coin to land, confirm remotely, then wait for the
        // sale to settle. Watch notifications keep this free of wall-clock
        // assumptions.
        tokio::time::timeout(Duration::from_secs(30), async {
            while status_rx.borrow_and_update().credit == 0 {
                status_rx.changed().await.unwrap();
            }
            cmd_tx.send(10u8).await.unwrap();
            loop {
                let status = *status_rx.borrow_and_update();
                if status.stock[0] == 4 && status.state == MachineState::AwaitingPayment {
                    break;
                }
                status_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("purchase never settled");

        stop_tx.send(()).unwrap();
        let machine = task.await.unwrap();

        assert_eq!(machine.state(), MachineState::AwaitingPayment);
        assert_eq!(machine.credit(), 0);
        assert_eq!(machine.stock(), [4, 5, 5, 5]);
    }

    #[tokio::test]
    async fn invalid_bytes_are_dropped_not_fatal() {
        let machine = Machine::new(fast_config());
        let (cmd_tx, cmd_rx) = tokio::sync::mpsc::channel(16);
        let (status_tx, _status_rx) = watch::channel(machine.snapshot());
        let (telemetry_tx, _telemetry_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let watchdog = Watchdog::new(Duration::from_secs(10));

        let task = tokio::spawn(run(
            machine,
            ScriptedSensors::new(vec![(10.0, 70.0)]),
            ReceiverStream::new(cmd_rx),
            Arc::new(Mailbox::new()),
            Arc::new(SharedDisplay::new(NullPanel)),
            status_tx,
            telemetry_tx,
            watchdog,
            stop_rx,
        ));

        for byte in [0u8, 7, 99, 255] {
            cmd_tx.send(byte).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(()).unwrap();
        let machine = task.await.unwrap();
        assert_eq!(machine.state(), MachineState::Idle);
    }

    #[tokio::test]
    async fn telemetry_worker_feeds_the_fault_path() {
        let config = fast_config();
        let machine = Machine::new(config);
        let mailbox = Arc::new(Mailbox::new());
        let worker = spawn_telemetry_worker(
            FixedProbe(TelemetryReading {
                temp_c: 31,
                humidity_pct: 40,
            }),
            Arc::clone(&mailbox),
            5,
        );

        let (_cmd_tx, cmd_rx) = tokio::sync::mpsc::channel::<u8>(16);
        let (status_tx, _status_rx) = watch::channel(machine.snapshot());
        let (telemetry_tx, mut telemetry_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = oneshot::channel();
        let watchdog = Watchdog::new(Duration::from_secs(10));

        let task = tokio::spawn(run(
            machine,
            ScriptedSensors::new(vec![(10.0, 70.0)]),
            ReceiverStream::new(cmd_rx),
            Arc::clone(&mailbox),
            Arc::new(SharedDisplay::new(NullPanel)),
            status_tx,
            telemetry_tx,
            watchdog,
            stop_rx,
        ));

        // Wait until the probe reading has travelled worker -> mailbox ->
        // tick -> outbound channel.
        tokio::time::timeout(Duration::from_secs(30), async {
            while telemetry_rx.borrow_and_update().is_none() {
                telemetry_rx.changed().await.unwrap();
            }
        })
        .await
        .expect("telemetry never published");

        stop_tx.send(()).unwrap();
        worker.abort();
        let machine = task.await.unwrap();

        assert_eq!(machine.state(), MachineState::Fault);
        assert_eq!(
            *telemetry_rx.borrow(),
            Some(TelemetryReading {
                temp_c: 31,
                humidity_pct: 40
            })
        );
    }

    #[tokio::test]
    async fn watchdog_reports_starvation() {
        let watchdog = Watchdog::new(Duration::from_millis(20));
        assert!(!watchdog.starved());
        watchdog.kick();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(watchdog.starved());
        watchdog.kick();
        assert!(!watchdog.starved());
    }
}
