//! Fixtures shared by the service tests: a memory store, the work queues and a
//! fixed clock.

use std::time::{Duration, SystemTime};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    dao::{battle_store::memory::MemoryBattleStore, models::Visibility},
    dto::{
        battle::{CreateBattleRequest, EnrollParticipantRequest},
        round::RoundInput,
    },
    services::battle_service,
    state::dispatch::{ArtifactTask, EvaluationHints, HintReceiver, TaskQueue},
};

pub const SUBMISSION_DEADLINE: u64 = 1_000;
pub const VOTING_DEADLINE: u64 = 2_000;

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

pub fn rfc3339(secs: u64) -> String {
    OffsetDateTime::from(at(secs)).format(&Rfc3339).unwrap()
}

pub fn track(n: u8) -> String {
    format!("spotify:track:{:0>22}", n)
}

pub fn round_input(theme: &str, submission_deadline: u64, voting_deadline: u64) -> RoundInput {
    RoundInput {
        theme: theme.into(),
        description: String::new(),
        submission_deadline: rfc3339(submission_deadline),
        voting_deadline: rfc3339(voting_deadline),
    }
}

pub struct Fixture {
    pub store: MemoryBattleStore,
    pub tasks: TaskQueue,
    pub task_rx: mpsc::UnboundedReceiver<ArtifactTask>,
    pub hints: EvaluationHints,
    pub hint_rx: HintReceiver,
}

impl Fixture {
    pub fn new() -> Self {
        let (tasks, task_rx) = TaskQueue::channel();
        let (hints, hint_rx) = EvaluationHints::channel();
        Self {
            store: MemoryBattleStore::new(),
            tasks,
            task_rx,
            hints,
            hint_rx,
        }
    }

    /// Create a public battle whose first round closes submissions at
    /// [`SUBMISSION_DEADLINE`] and voting at [`VOTING_DEADLINE`].
    pub async fn battle(&self, creator: Uuid, capacity: u32, double: bool) -> Uuid {
        let request = CreateBattleRequest {
            name: "Friday battle".into(),
            visibility: Visibility::Public,
            capacity,
            double_submissions: double,
            display_name: "creator".into(),
            first_round: round_input("Openers", SUBMISSION_DEADLINE, VOTING_DEADLINE),
        };
        battle_service::create_battle(&self.store, creator, request, at(0))
            .await
            .unwrap()
            .battle
            .id
    }

    pub async fn enroll(&self, battle_id: Uuid, creator: Uuid, user_id: Uuid, name: &str) {
        let request = EnrollParticipantRequest {
            user_id,
            display_name: name.into(),
        };
        battle_service::enroll_participant(&self.store, creator, battle_id, request, at(1))
            .await
            .unwrap();
    }

    /// Drain queued artifact tasks.
    pub fn drain_tasks(&mut self) -> Vec<ArtifactTask> {
        let mut tasks = Vec::new();
        while let Ok(task) = self.task_rx.try_recv() {
            tasks.push(task);
        }
        tasks
    }
}
