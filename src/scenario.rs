//! Scenario replay: recorded inputs in, event log out.
//!
//! A scenario file is a CSV of tick runs: each row holds the sensor inputs
//! for `ticks` consecutive control ticks, with an optional command byte and
//! cancel press applied on the first tick of the run. Replay feeds the rows
//! through the machine deterministically and records every published
//! snapshot, which is how firmware behavior is exercised off-target.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::machine::Machine;
use crate::model::{Command, SensorFrame, TelemetryReading};

/// Errors that can occur when parsing scenario rows.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: temperature and humidity must appear together")]
    PartialTelemetry { line: usize },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    ticks: Option<u32>,
    light: f32,
    distance: Option<f32>,
    command: Option<u8>,
    cancel: Option<bool>,
    temp_c: Option<i32>,
    humidity: Option<i32>,
}

/// One run of identical control ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioStep {
    /// How many ticks this row covers (at least 1).
    pub ticks: u32,
    pub light_pct: f32,
    pub distance_cm: Option<f32>,
    /// Raw command byte, delivered on the run's first tick.
    pub command: Option<u8>,
    /// Cancel button, pressed on the run's first tick.
    pub cancel: bool,
    pub telemetry: Option<TelemetryReading>,
}

/// One line of the replay event log: a published status snapshot with the
/// tick it appeared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventRow {
    pub tick: u64,
    pub credit: u32,
    pub state: u8,
    pub selection: u8,
    pub stock1: u8,
    pub stock2: u8,
    pub stock3: u8,
    pub stock4: u8,
}

/// Read scenario steps from a csv file.
pub fn read_scenario(
    path: impl AsRef<Path>,
) -> impl Iterator<Item = Result<ScenarioStep, ScenarioError>> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .expect("failed to open scenario file");

    reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| ScenarioError::Parse { line, source })?;
            let telemetry = match (row.temp_c, row.humidity) {
                (Some(temp_c), Some(humidity_pct)) => Some(TelemetryReading {
                    temp_c,
                    humidity_pct,
                }),
                (None, None) => None,
                _ => return Err(ScenarioError::PartialTelemetry { line }),
            };
            Ok(ScenarioStep {
                ticks: row.ticks.unwrap_or(1).max(1),
                light_pct: row.light,
                distance_cm: row.distance,
                command: row.command,
                cancel: row.cancel.unwrap_or(false),
                telemetry,
            })
        })
}

/// Feed scenario steps through the machine; returns the event log.
pub async fn replay(
    machine: &mut Machine,
    mut steps: impl Stream<Item = ScenarioStep> + Unpin,
) -> Vec<EventRow> {
    let mut events = Vec::new();
    let mut tick: u64 = 0;

    while let Some(step) = steps.next().await {
        for i in 0..step.ticks {
            let first = i == 0;
            let frame = SensorFrame {
                light_pct: step.light_pct,
                distance_samples: step.distance_cm.map(|d| vec![d]).unwrap_or_default(),
                cancel_button: first && step.cancel,
                telemetry: if first { step.telemetry } else { None },
            };

            let mut commands = Vec::new();
            if first && let Some(byte) = step.command {
                match Command::parse(byte) {
                    Ok(cmd) => commands.push(cmd),
                    Err(e) => warn!(reason = %e, "command rejected"),
                }
            }

            tick += 1;
            if let Some(snapshot) = machine.step(&frame, &commands) {
                events.push(EventRow {
                    tick,
                    credit: snapshot.credit,
                    state: snapshot.state.ordinal(),
                    selection: snapshot.selection,
                    stock1: snapshot.stock[0],
                    stock2: snapshot.stock[1],
                    stock3: snapshot.stock[2],
                    stock4: snapshot.stock[3],
                });
            }
        }
    }

    events
}

/// Write the event log to stdout in csv format.
pub fn write_events(events: impl IntoIterator<Item = EventRow>) {
    let stdout = io::stdout();
    let mut writer = csv::Writer::from_writer(stdout.lock());

    for event in events {
        writer.serialize(event).expect("failed to write event row");
    }

    writer.flush().expect("failed to flush event log");
}
