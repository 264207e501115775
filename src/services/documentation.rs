use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the song battle backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::battles::create_battle,
        crate::routes::battles::list_battles,
        crate::routes::battles::get_battle,
        crate::routes::battles::add_round,
        crate::routes::battles::join_battle,
        crate::routes::battles::enroll_participant,
        crate::routes::battles::get_current_round,
        crate::routes::rounds::update_round,
        crate::routes::rounds::submit_item,
        crate::routes::rounds::get_round_results,
        crate::routes::rounds::retry_artifact,
        crate::routes::submissions::update_submission,
        crate::routes::submissions::remove_submission,
        crate::routes::submissions::award_vote,
        crate::routes::submissions::remove_vote,
        crate::routes::scheduler::trigger_tick,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::battle::CreateBattleRequest,
            crate::dto::battle::JoinBattleRequest,
            crate::dto::battle::EnrollParticipantRequest,
            crate::dto::battle::BattleSummary,
            crate::dto::battle::ParticipantView,
            crate::dto::battle::BattleDetails,
            crate::dto::battle::BattleList,
            crate::dto::battle::MembershipView,
            crate::dto::round::RoundInput,
            crate::dto::round::RoundSummary,
            crate::dto::round::ArtifactView,
            crate::dto::round::CurrentRoundView,
            crate::dto::round::StandingView,
            crate::dto::round::RoundResultsView,
            crate::dto::submission::SubmissionContentRequest,
            crate::dto::submission::SubmissionView,
            crate::dto::vote::VoteReceipt,
            crate::dto::scheduler::TickReport,
            crate::dto::scheduler::TransitionRecord,
            crate::dao::models::Visibility,
            crate::dao::models::BattleStatus,
            crate::state::round_machine::RoundPhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "battles", description = "Battle creation, membership and round planning"),
        (name = "rounds", description = "Round schedule, results and artifacts"),
        (name = "submissions", description = "Entries submitted to rounds"),
        (name = "votes", description = "Star allocation during voting"),
        (name = "scheduler", description = "External scheduler trigger"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/battles",
            "/battles/{id}/current-round",
            "/rounds/{id}/submissions",
            "/rounds/{id}/results",
            "/submissions/{id}/votes",
            "/scheduler/tick",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path}");
        }
    }
}
