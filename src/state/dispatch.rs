//! Channels connecting request handlers, the scheduler and the artifact worker.

use std::sync::Arc;

use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// One entry of the final submission list handed to the artifact generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactTrack {
    pub submission_id: Uuid,
    pub submitter_id: Uuid,
    pub content_ref: String,
    pub tally: u32,
}

/// Request to build the artifact (playlist) of a round that entered voting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactTask {
    pub round_id: Uuid,
    pub battle_id: Uuid,
    pub ordinal: u32,
    pub theme: String,
    /// Ordered by descending tally.
    pub tracks: Vec<ArtifactTrack>,
}

/// Sending half of the artifact task queue.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::UnboundedSender<ArtifactTask>,
}

impl TaskQueue {
    /// Create the queue and the receiver consumed by the artifact worker.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ArtifactTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Enqueue a task; returns `false` when the worker is gone.
    pub fn dispatch(&self, task: ArtifactTask) -> bool {
        let round_id = task.round_id;
        match self.tx.send(task) {
            Ok(()) => {
                debug!(round_id = %round_id, "artifact task queued");
                true
            }
            Err(_) => {
                warn!(round_id = %round_id, "artifact worker stopped; task dropped");
                false
            }
        }
    }
}

/// Best-effort requests to re-evaluate a round out of cycle. A round is queued at
/// most once until the scheduler picks it up.
#[derive(Clone)]
pub struct EvaluationHints {
    tx: mpsc::UnboundedSender<Uuid>,
    queued: Arc<DashSet<Uuid>>,
}

/// Receiving half of [`EvaluationHints`].
pub struct HintReceiver {
    rx: mpsc::UnboundedReceiver<Uuid>,
    queued: Arc<DashSet<Uuid>>,
}

impl EvaluationHints {
    pub fn channel() -> (Self, HintReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queued = Arc::new(DashSet::new());
        (
            Self {
                tx,
                queued: queued.clone(),
            },
            HintReceiver { rx, queued },
        )
    }

    /// Ask for `round_id` to be evaluated soon.
    pub fn notify(&self, round_id: Uuid) {
        if !self.queued.insert(round_id) {
            return;
        }
        if self.tx.send(round_id).is_err() {
            self.queued.remove(&round_id);
            debug!(round_id = %round_id, "scheduler not listening; hint dropped");
        }
    }
}

impl HintReceiver {
    /// Wait for the next hinted round.
    pub async fn recv(&mut self) -> Option<Uuid> {
        let round_id = self.rx.recv().await?;
        self.queued.remove(&round_id);
        Some(round_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hints_coalesce_while_queued() {
        let (hints, mut receiver) = EvaluationHints::channel();
        let round = Uuid::new_v4();

        hints.notify(round);
        hints.notify(round);
        hints.notify(round);

        assert_eq!(receiver.recv().await, Some(round));
        assert!(receiver.rx.try_recv().is_err());

        hints.notify(round);
        assert_eq!(receiver.recv().await, Some(round));
    }

    #[tokio::test]
    async fn dispatch_reports_closed_worker() {
        let (queue, rx) = TaskQueue::channel();
        drop(rx);
        let task = ArtifactTask {
            round_id: Uuid::new_v4(),
            battle_id: Uuid::new_v4(),
            ordinal: 1,
            theme: "Openers".into(),
            tracks: Vec::new(),
        };
        assert!(!queue.dispatch(task));
    }
}
