//! Continuous monitoring of the active scenario set

use crate::error::VisionError;
use crate::pipeline::Pipeline;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};
use watchpost_core::{AnalysisResult, Command};

const RESULT_BACKLOG: usize = 16;

/// Results of one monitoring pass.
#[derive(Debug, Clone)]
pub struct MonitorCycle {
    pub iteration: u64,
    /// Scenarios that were active when the pass started
    pub scenario_ids: Vec<String>,
    pub results: Vec<AnalysisResult>,
}

/// Background thread re-running a command template against whatever is
/// currently active.
pub struct Monitor;

impl Monitor {
    /// Starts monitoring. The template's scenario ids are replaced with the
    /// active set on every pass; its regions, threshold and rate are kept.
    pub fn spawn(
        pipeline: Arc<Pipeline>,
        template: Command,
        interval: Duration,
    ) -> Result<MonitorHandle, VisionError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (results_tx, results_rx) = bounded(RESULT_BACKLOG);
        let thread = thread::Builder::new()
            .name("watchpost-monitor".to_string())
            .spawn(move || run(pipeline, template, interval, stop_rx, results_tx))?;
        info!("Monitor started with {:?} interval", interval);
        Ok(MonitorHandle {
            stop: stop_tx,
            results: results_rx,
            thread: Some(thread),
        })
    }
}

fn run(
    pipeline: Arc<Pipeline>,
    template: Command,
    interval: Duration,
    stop: Receiver<()>,
    results: Sender<MonitorCycle>,
) {
    let mut iteration = 0u64;
    loop {
        let scenario_ids = pipeline.registry().active_ids();
        let cycle_results = if scenario_ids.is_empty() {
            Vec::new()
        } else {
            let mut command = template.clone();
            command.scenario_ids = scenario_ids.clone();
            match pipeline.process(&command) {
                Ok(results) => results,
                Err(e) => {
                    warn!("Monitor pass {} failed: {}", iteration, e);
                    Vec::new()
                }
            }
        };

        let cycle = MonitorCycle {
            iteration,
            scenario_ids,
            results: cycle_results,
        };
        match results.try_send(cycle) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Monitor results backlog full, dropping pass {}", iteration),
            Err(TrySendError::Disconnected(_)) => break,
        }
        iteration += 1;

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!("Monitor stopped after {} passes", iteration);
}

pub struct MonitorHandle {
    stop: Sender<()>,
    results: Receiver<MonitorCycle>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn results(&self) -> &Receiver<MonitorCycle> {
        &self.results
    }

    /// Signals the thread and waits for the current pass to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
