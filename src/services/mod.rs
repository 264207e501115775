/// Artifact generation worker and manual retries.
pub mod artifacts;
/// Battle creation, membership, rounds and the current round view.
pub mod battle_service;
/// Track reference validation and normalization.
pub mod content;
/// OpenAPI documentation generation.
pub mod documentation;
/// Shared lookups and gating checks.
pub mod guards;
/// Health check service.
pub mod health_service;
/// Round credits, winners and results.
pub mod results;
/// Deadline and completion driven round transitions.
pub mod scheduler;
/// Background storage connection supervision.
pub mod storage_supervisor;
/// Entry admission, editing and removal.
pub mod submission_service;
/// Star allocation during voting.
pub mod vote_service;

#[cfg(test)]
pub(crate) mod testing;
