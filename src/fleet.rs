//! Multi-stream runner
//!
//! Independent streams are evaluated on dedicated worker threads, one
//! evaluator per stream with no shared model state. Reports are forwarded
//! over a bounded channel as soon as each window completes, tagged with the
//! stream id. A shared `StopSignal` cancels every worker at its next window
//! boundary.

use crate::config::DetectorConfig;
use crate::engine::{StopSignal, StreamingEvaluator};
use crate::error::{OddError, Result};
use crate::report::{DriftDiagnostic, OutlierReport};
use crate::series::TimeSeriesCollection;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::thread;
use tracing::{info, warn};

/// One stream to evaluate
#[derive(Debug, Clone)]
pub struct StreamJob {
    pub id: usize,
    pub training: TimeSeriesCollection,
    pub stream: TimeSeriesCollection,
    pub config: DetectorConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FleetEvent {
    Report {
        stream: usize,
        report: OutlierReport,
        diagnostic: Option<DriftDiagnostic>,
    },
    Finished {
        stream: usize,
        windows: usize,
        cancelled: bool,
    },
    Failed {
        stream: usize,
        error: OddError,
    },
}

pub struct StreamFleet {
    capacity: usize,
    stop: StopSignal,
}

impl Default for StreamFleet {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl StreamFleet {
    /// `capacity` bounds the number of undelivered events
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            stop: StopSignal::new(),
        }
    }

    /// Handle that cancels every worker of this fleet
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Start one worker per job
    pub fn spawn(&self, jobs: Vec<StreamJob>) -> Result<FleetHandle> {
        let (tx, rx) = bounded::<FleetEvent>(self.capacity);
        let mut workers = Vec::with_capacity(jobs.len());
        for job in jobs {
            workers.push(StreamWorker::spawn(job, tx.clone(), self.stop.clone())?);
        }
        info!(streams = workers.len(), "Stream fleet started.");
        Ok(FleetHandle { events: rx, workers })
    }
}

pub struct FleetHandle {
    events: Receiver<FleetEvent>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl FleetHandle {
    /// Live event feed; disconnects once every worker has finished
    pub fn events(&self) -> &Receiver<FleetEvent> {
        &self.events
    }

    /// Drain every event, then join the workers
    pub fn collect(self) -> Result<Vec<FleetEvent>> {
        let events: Vec<FleetEvent> = self.events.iter().collect();
        for handle in self.workers {
            handle
                .join()
                .map_err(|_| OddError::Worker("stream worker panicked".into()))?;
        }
        Ok(events)
    }
}

struct StreamWorker {
    job: StreamJob,
    tx: Sender<FleetEvent>,
    stop: StopSignal,
}

impl StreamWorker {
    fn spawn(
        job: StreamJob,
        tx: Sender<FleetEvent>,
        stop: StopSignal,
    ) -> Result<thread::JoinHandle<()>> {
        let id = job.id;
        thread::Builder::new()
            .name(format!("odd-stream-{}", id))
            .spawn(move || {
                let worker = StreamWorker { job, tx, stop };
                worker.run();
                info!(stream = id, "Stream worker stopped.");
            })
            .map_err(|e| OddError::Worker(format!("failed to spawn stream {}: {}", id, e)))
    }

    fn run(self) {
        let id = self.job.id;
        info!(stream = id, "Stream worker active.");

        let outcome = StreamingEvaluator::new(&self.job.training, self.job.config.clone())
            .and_then(|mut eval| {
                eval.run_with(&self.job.stream, Some(&self.stop), |report, diagnostic| {
                    // A dropped receiver only means nobody is listening any more
                    let _ = self.tx.send(FleetEvent::Report {
                        stream: id,
                        report: report.clone(),
                        diagnostic: diagnostic.copied(),
                    });
                })
            });

        let event = match outcome {
            Ok(run) => FleetEvent::Finished {
                stream: id,
                windows: run.reports.len(),
                cancelled: run.cancelled,
            },
            Err(error) => {
                warn!(stream = id, error = %error, "Stream failed.");
                FleetEvent::Failed { stream: id, error }
            }
        };
        let _ = self.tx.send(event);
    }
}
