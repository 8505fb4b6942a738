//! Background training
//!
//! Detection only enqueues training requests; a tokio task drains the queue
//! and runs each `train_step` on the blocking pool under the agent mutex.
//! Requests that do not fit in the queue are dropped.

use crate::agent::DdqnAgent;
use crate::approximator::{Backend, ValueApproximator};
use crate::metrics::DetectorMetrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Agent shared between a detector and its training worker
pub type SharedAgent<A = Backend> = Arc<Mutex<DdqnAgent<A>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingRequest {
    pub batch_size: usize,
}

/// What the worker did before its queue closed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkerSummary {
    pub requests: u64,
    pub steps: u64,
    pub failures: u64,
    pub last_loss: f64,
}

/// Cloneable sender side of a training worker
#[derive(Debug, Clone)]
pub struct TrainingHandle {
    sender: mpsc::Sender<TrainingRequest>,
    metrics: Arc<DetectorMetrics>,
}

impl TrainingHandle {
    /// Enqueue without waiting; false when the request was dropped
    pub fn try_submit(&self, batch_size: usize) -> bool {
        match self.sender.try_send(TrainingRequest { batch_size }) {
            Ok(()) => true,
            Err(e) => {
                debug!("Training request dropped: {}", e);
                self.metrics.record_dropped_training();
                false
            }
        }
    }
}

pub struct TrainingWorker;

impl TrainingWorker {
    /// Spawn the worker on the current tokio runtime
    ///
    /// The worker exits once every [`TrainingHandle`] has been dropped.
    pub fn spawn<A: ValueApproximator + 'static>(
        agent: SharedAgent<A>,
        metrics: Arc<DetectorMetrics>,
        queue_size: usize,
    ) -> (TrainingHandle, JoinHandle<WorkerSummary>) {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let handle = TrainingHandle {
            sender,
            metrics: metrics.clone(),
        };
        let task = tokio::spawn(Self::worker_loop(receiver, agent, metrics));
        (handle, task)
    }

    async fn worker_loop<A: ValueApproximator + 'static>(
        mut receiver: mpsc::Receiver<TrainingRequest>,
        agent: SharedAgent<A>,
        metrics: Arc<DetectorMetrics>,
    ) -> WorkerSummary {
        let mut summary = WorkerSummary::default();

        while let Some(request) = receiver.recv().await {
            summary.requests += 1;
            let agent = agent.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let mut agent = agent.lock();
                let before = agent.stats().training_steps;
                agent
                    .train_step(request.batch_size)
                    .map(|loss| (agent.stats().training_steps > before, loss))
            })
            .await;

            match outcome {
                Ok(Ok((true, loss))) => {
                    summary.steps += 1;
                    summary.last_loss = loss;
                    metrics.record_training_step();
                }
                Ok(Ok((false, _))) => {}
                Ok(Err(e)) => {
                    summary.failures += 1;
                    warn!("Training step failed: {}", e);
                }
                Err(e) => {
                    summary.failures += 1;
                    warn!("Training task aborted: {}", e);
                }
            }
        }

        info!(
            "Training worker stopped after {} requests ({} steps)",
            summary.requests, summary.steps
        );
        summary
    }
}
