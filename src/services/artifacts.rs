//! Playlist generation for rounds that entered voting.
//!
//! The scheduler queues an [`ArtifactTask`] after opening voting; the worker in
//! this module hands it to an [`ArtifactGenerator`], retries with exponential
//! backoff and records the outcome on the round. A failed generation never
//! touches the round phase.

use std::{
    cmp::Reverse,
    sync::Arc,
    time::{Duration, SystemTime},
};

use futures::future::BoxFuture;
use rand::{Rng, rng};
use thiserror::Error;
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::ArtifactSettings,
    dao::{
        battle_store::BattleStore,
        models::{ArtifactEntity, RoundEntity, SubmissionEntity},
        storage::StorageError,
    },
    dto::round::ArtifactRetryView,
    error::{Rejection, ServiceError},
    services::guards::{load_battle, load_round, require_creator},
    state::{
        SharedState,
        dispatch::{ArtifactTask, ArtifactTrack, TaskQueue},
        round_machine::RoundPhase,
    },
};

/// Errors reported by an artifact generator.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("generator request failed: {0}")]
    Transport(String),
    #[error("generator answered with status {0}")]
    Status(u16),
    #[error("generator response was invalid: {0}")]
    InvalidResponse(String),
}

/// Builds the artifact of a round and returns where it can be found.
pub trait ArtifactGenerator: Send + Sync {
    fn generate(&self, task: ArtifactTask) -> BoxFuture<'static, Result<String, ArtifactError>>;
}

/// Generator used when no webhook is configured: derives a stable reference from
/// the round id.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactGenerator;

impl ArtifactGenerator for LocalArtifactGenerator {
    fn generate(&self, task: ArtifactTask) -> BoxFuture<'static, Result<String, ArtifactError>> {
        Box::pin(async move { Ok(format!("local://playlists/{}", task.round_id)) })
    }
}

#[cfg(feature = "webhook-artifacts")]
mod webhook {
    use std::time::Duration;

    use futures::future::BoxFuture;
    use reqwest::Client;
    use serde::Deserialize;

    use super::{ArtifactError, ArtifactGenerator};
    use crate::state::dispatch::ArtifactTask;

    #[derive(Deserialize)]
    struct WebhookReply {
        url: String,
    }

    /// POSTs the task as JSON and expects `{ "url": "..." }` back.
    #[derive(Clone)]
    pub struct WebhookArtifactGenerator {
        client: Client,
        endpoint: String,
    }

    impl WebhookArtifactGenerator {
        pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ArtifactError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|err| ArtifactError::Transport(err.to_string()))?;
            Ok(Self { client, endpoint })
        }
    }

    impl ArtifactGenerator for WebhookArtifactGenerator {
        fn generate(
            &self,
            task: ArtifactTask,
        ) -> BoxFuture<'static, Result<String, ArtifactError>> {
            let client = self.client.clone();
            let endpoint = self.endpoint.clone();
            Box::pin(async move {
                let response = client
                    .post(&endpoint)
                    .json(&task)
                    .send()
                    .await
                    .map_err(|err| ArtifactError::Transport(err.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ArtifactError::Status(status.as_u16()));
                }
                let reply: WebhookReply = response
                    .json()
                    .await
                    .map_err(|err| ArtifactError::InvalidResponse(err.to_string()))?;
                if reply.url.trim().is_empty() {
                    return Err(ArtifactError::InvalidResponse("empty url".into()));
                }
                Ok(reply.url)
            })
        }
    }
}

#[cfg(feature = "webhook-artifacts")]
pub use webhook::WebhookArtifactGenerator;

/// Pick the generator matching the configuration.
pub fn generator_from_settings(
    settings: &ArtifactSettings,
) -> Result<Arc<dyn ArtifactGenerator>, ArtifactError> {
    match &settings.webhook_url {
        #[cfg(feature = "webhook-artifacts")]
        Some(url) => {
            info!(url = %url, "artifact generation via webhook");
            Ok(Arc::new(WebhookArtifactGenerator::new(
                url.clone(),
                settings.request_timeout,
            )?))
        }
        #[cfg(not(feature = "webhook-artifacts"))]
        Some(url) => {
            warn!(url = %url, "webhook artifacts not compiled in; using local generator");
            Ok(Arc::new(LocalArtifactGenerator))
        }
        None => {
            info!("artifact generation via local generator");
            Ok(Arc::new(LocalArtifactGenerator))
        }
    }
}

/// Task for `round`, listing its entries by descending tally then submission time.
pub fn build_task(round: &RoundEntity, mut submissions: Vec<SubmissionEntity>) -> ArtifactTask {
    submissions.sort_by_key(|submission| (Reverse(submission.tally), submission.submitted_at));
    ArtifactTask {
        round_id: round.id,
        battle_id: round.battle_id,
        ordinal: round.ordinal,
        theme: round.theme.clone(),
        tracks: submissions
            .into_iter()
            .map(|submission| ArtifactTrack {
                submission_id: submission.id,
                submitter_id: submission.submitter_id,
                content_ref: submission.content_ref,
                tally: submission.tally,
            })
            .collect(),
    }
}

/// What the worker did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOutcome {
    /// The round already had a ready artifact or no longer exists.
    Skipped,
    Ready,
    /// Every attempt failed; the failure was recorded on the round.
    Failed,
}

/// Generate and record the artifact of one task.
pub async fn process_task(
    store: &dyn BattleStore,
    generator: &dyn ArtifactGenerator,
    settings: &ArtifactSettings,
    task: ArtifactTask,
) -> Result<ArtifactOutcome, StorageError> {
    let round_id = task.round_id;
    match store.find_round(round_id).await? {
        Some(round) if !round.artifact.as_ref().is_some_and(ArtifactEntity::is_ready) => {}
        _ => {
            debug!(round_id = %round_id, "artifact already present; task skipped");
            return Ok(ArtifactOutcome::Skipped);
        }
    }

    let attempts = settings.max_attempts.max(1);
    let mut backoff = settings.initial_backoff;
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match generator.generate(task.clone()).await {
            Ok(url) => {
                let artifact = ArtifactEntity::Ready {
                    url,
                    generated_at: SystemTime::now(),
                };
                store.set_round_artifact(round_id, artifact).await?;
                info!(round_id = %round_id, attempt, "artifact generated");
                return Ok(ArtifactOutcome::Ready);
            }
            Err(err) => {
                warn!(round_id = %round_id, attempt, error = %err, "artifact generation failed");
                last_error = err.to_string();
                if attempt < attempts {
                    let ceiling = u64::try_from(backoff.as_millis() / 2).unwrap_or(u64::MAX);
                    let jitter = rng().random_range(0..=ceiling);
                    sleep(backoff + Duration::from_millis(jitter)).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    let artifact = ArtifactEntity::Failed {
        reason: last_error,
        failed_at: SystemTime::now(),
    };
    store.set_round_artifact(round_id, artifact).await?;
    warn!(round_id = %round_id, attempts, "artifact generation gave up");
    Ok(ArtifactOutcome::Failed)
}

/// Consume artifact tasks until the queue closes.
pub async fn run_worker(
    state: SharedState,
    generator: Arc<dyn ArtifactGenerator>,
    mut tasks: mpsc::UnboundedReceiver<ArtifactTask>,
) {
    while let Some(task) = tasks.recv().await {
        let round_id = task.round_id;
        let store = match state.require_battle_store().await {
            Ok(store) => store,
            Err(_) => {
                warn!(round_id = %round_id, "artifact task dropped in degraded mode");
                continue;
            }
        };
        let settings = state.config().artifacts();
        if let Err(err) =
            process_task(store.as_ref(), generator.as_ref(), settings, task).await
        {
            warn!(round_id = %round_id, error = %err, "artifact outcome could not be stored");
        }
    }
    debug!("artifact task queue closed");
}

/// Re-queue artifact generation for a round whose previous attempt failed.
pub async fn retry_artifact(
    store: &dyn BattleStore,
    tasks: &TaskQueue,
    actor: Uuid,
    round_id: Uuid,
) -> Result<ArtifactRetryView, ServiceError> {
    let round = load_round(store, round_id).await?;
    let battle = load_battle(store, round.battle_id).await?;
    require_creator(&battle, actor, "retry artifact generation")?;

    if !matches!(round.phase, RoundPhase::Voting | RoundPhase::Completed) {
        return Err(Rejection::PhaseViolation(format!(
            "round {} has not reached voting yet",
            round.ordinal
        ))
        .into());
    }
    if round.artifact.as_ref().is_some_and(ArtifactEntity::is_ready) {
        return Err(Rejection::Conflict("the round artifact is already available".into()).into());
    }

    let submissions = store.list_submissions(round.id).await?;
    let queued = tasks.dispatch(build_task(&round, submissions));
    Ok(ArtifactRetryView {
        round_id: round.id,
        queued,
    })
}
