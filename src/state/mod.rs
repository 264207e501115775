pub mod dispatch;
pub mod round_machine;

use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, watch};

use crate::{
    config::AppConfig,
    dao::battle_store::BattleStore,
    error::ServiceError,
    state::dispatch::{ArtifactTask, EvaluationHints, HintReceiver, TaskQueue},
};

pub type SharedState = Arc<AppState>;

/// Receivers handed to the background workers at startup.
pub struct BackgroundChannels {
    pub artifact_tasks: mpsc::UnboundedReceiver<ArtifactTask>,
    pub hints: HintReceiver,
}

/// Central application state: the storage handle, degraded flag and work queues.
pub struct AppState {
    battle_store: RwLock<Option<Arc<dyn BattleStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    artifact_tasks: TaskQueue,
    hints: EvaluationHints,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> (SharedState, BackgroundChannels) {
        let (degraded_tx, _rx) = watch::channel(true);
        let (artifact_tasks, artifact_rx) = TaskQueue::channel();
        let (hints, hint_rx) = EvaluationHints::channel();

        let state = Arc::new(Self {
            battle_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            artifact_tasks,
            hints,
        });

        (
            state,
            BackgroundChannels {
                artifact_tasks: artifact_rx,
                hints: hint_rx,
            },
        )
    }

    /// Obtain a handle to the current battle store, if one is installed.
    pub async fn battle_store(&self) -> Option<Arc<dyn BattleStore>> {
        let guard = self.battle_store.read().await;
        guard.as_ref().cloned()
    }

    /// Resolve the battle store or fail with [`ServiceError::Degraded`].
    pub async fn require_battle_store(&self) -> Result<Arc<dyn BattleStore>, ServiceError> {
        self.battle_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new battle store implementation and leave degraded mode.
    pub async fn set_battle_store(&self, store: Arc<dyn BattleStore>) {
        {
            let mut guard = self.battle_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Loaded application configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Queue feeding the artifact worker.
    pub fn artifact_tasks(&self) -> &TaskQueue {
        &self.artifact_tasks
    }

    /// Out-of-cycle evaluation requests for the scheduler.
    pub fn hints(&self) -> &EvaluationHints {
        &self.hints
    }
}
