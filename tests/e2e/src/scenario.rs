//! The four-worker round trip
//!
//! Workers `One`..`Four` are called concurrently each round. The round's
//! 4-tuple is forwarded through a channel to an `Accumulator` worker, which
//! sums everything once the channel ends.

use crate::blueprints::{Accumulator, AccumulatorClient, Coordinator, Four, One, Three, Two};
use futures::future::try_join_all;
use once_cell::sync::OnceCell;
use spindle::{channel, FromValue, Registry, RegistryBuilder, Sender, Value, WorkerHandle, WorkerOptions};
use std::time::Instant;
use tracing::{debug, info};

pub const DEFAULT_ROUNDS: usize = 10;

/// Sum of the four constant workers
const ROUND_SUM: i64 = 1 + 2 + 3 + 4;

static WORKER_OPTIONS: OnceCell<WorkerOptions> = OnceCell::new();

/// Options for every worker the scenario spawns; first call wins
pub fn configure(options: WorkerOptions) {
    if WORKER_OPTIONS.set(options).is_err() {
        debug!("Worker options already configured");
    }
}

pub fn worker_options() -> WorkerOptions {
    WORKER_OPTIONS.get().cloned().unwrap_or_default()
}

pub fn expected_total(rounds: usize) -> i64 {
    ROUND_SUM * rounds as i64
}

/// Registrations for every blueprint in the scenario
pub fn registry() -> spindle::Result<RegistryBuilder> {
    let mut builder = Registry::builder();
    builder
        .worker::<One>()?
        .worker::<Two>()?
        .worker::<Three>()?
        .worker::<Four>()?
        .worker::<Accumulator>()?
        .main::<Coordinator>()?;
    Ok(builder)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Tuples the accumulator received
    pub rounds: i64,
    pub total: i64,
}

/// Run `rounds` rounds and report what the accumulator summed
pub async fn run_rounds(rounds: usize, options: WorkerOptions) -> spindle::Result<ScenarioReport> {
    let started = Instant::now();
    let workers = vec![
        WorkerHandle::spawn_with::<One>(options.clone(), vec![])?,
        WorkerHandle::spawn_with::<Two>(options.clone(), vec![])?,
        WorkerHandle::spawn_with::<Three>(options.clone(), vec![])?,
        WorkerHandle::spawn_with::<Four>(options.clone(), vec![])?,
    ];

    let (sender, receiver) = channel();
    let accumulator = AccumulatorClient::spawn_with(options, vec![Value::object(receiver)])?;

    let (summary, fed) = tokio::join!(accumulator.drain(), feed(&workers, &sender, rounds));
    fed?;
    let mut summary = summary?;
    let report = ScenarioReport {
        rounds: summary.take("rounds", "ScenarioReport")?,
        total: summary.take("total", "ScenarioReport")?,
    };

    accumulator.dispose().await?;
    for worker in &workers {
        worker.dispose().await?;
    }

    info!(
        rounds = report.rounds,
        total = report.total,
        duration_ms = started.elapsed().as_millis() as u64,
        "Scenario finished"
    );
    Ok(report)
}

async fn feed(workers: &[WorkerHandle], sender: &Sender, rounds: usize) -> spindle::Result<()> {
    for round in 0..rounds {
        let replies = try_join_all(workers.iter().map(|worker| worker.execute("value", vec![]))).await?;
        let tuple = replies
            .into_iter()
            .map(i64::from_value)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(round, ?tuple, "Forwarding round");
        sender.send(tuple)?.await?;
    }
    sender.end()?.await
}
