use std::env;

use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use vend_eng::Machine;
use vend_eng::config::MachineConfig;
use vend_eng::scenario::{read_scenario, replay, write_events};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let path = env::args()
        .nth(1)
        .expect("usage: vend-eng <scenario.csv>");

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let mut machine = Machine::new(MachineConfig::default());
    let (step_tx, step_rx) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in read_scenario(&path) {
            match result {
                Ok(step) => {
                    step_tx.send(step).await.unwrap();
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let events = replay(&mut machine, ReceiverStream::new(step_rx)).await;

    write_events(events);
}
