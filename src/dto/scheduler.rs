use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::round_machine::RoundPhase;

/// A transition applied during a tick.
#[derive(Debug, Serialize, ToSchema, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub round_id: Uuid,
    pub battle_id: Uuid,
    pub from: RoundPhase,
    pub to: RoundPhase,
}

/// Summary of one scheduler pass.
#[derive(Debug, Serialize, ToSchema, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// In-flight rounds evaluated.
    pub scanned: usize,
    pub transitions: Vec<TransitionRecord>,
    /// Rounds whose evaluation failed and will be retried on the next tick.
    pub failures: usize,
}
