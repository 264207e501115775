use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        battle_store::BattleStore,
        models::{SubmissionEntity, SubmissionWrite},
    },
    dto::submission::{RemovedSubmission, SubmissionContentRequest, SubmissionView},
    error::{Rejection, ServiceError},
    services::{
        content,
        guards::{
            ensure_submission_window, load_battle, load_round, load_submission,
            require_participant,
        },
    },
};

const ALREADY_SUBMITTED: &str = "You have already submitted a song for this round.";
const MAXIMUM_SUBMITTED: &str =
    "You have already submitted the maximum number of songs for this round.";

/// Decide which entry slot a new submission takes, given how many entries the
/// submitter already holds in the round.
pub fn decide_submission_order(count: usize, double_submissions: bool) -> Result<u8, Rejection> {
    match count {
        0 => Ok(1),
        1 if double_submissions => Ok(2),
        1 => Err(Rejection::QuotaExceeded(ALREADY_SUBMITTED.into())),
        _ => Err(Rejection::QuotaExceeded(MAXIMUM_SUBMITTED.into())),
    }
}

async fn duplicate_rejection(
    store: &dyn BattleStore,
    battle_id: Uuid,
    submitter_id: Uuid,
) -> Result<Rejection, ServiceError> {
    let name = store
        .find_participant(battle_id, submitter_id)
        .await?
        .map(|participant| participant.display_name)
        .unwrap_or_else(|| "another participant".into());
    Ok(Rejection::Conflict(format!(
        "This song has already been submitted by {name}."
    )))
}

async fn write_rejection(
    store: &dyn BattleStore,
    battle_id: Uuid,
    write: SubmissionWrite,
) -> Result<Rejection, ServiceError> {
    Ok(match write {
        SubmissionWrite::Applied => {
            return Err(ServiceError::Internal(
                "applied submission write treated as rejection".into(),
            ));
        }
        SubmissionWrite::RoundClosed => {
            Rejection::PhaseViolation("the round stopped accepting submissions".into())
        }
        SubmissionWrite::DuplicateContent { submitter_id } => {
            duplicate_rejection(store, battle_id, submitter_id).await?
        }
        SubmissionWrite::OrderTaken => Rejection::Conflict(
            "another submission was recorded at the same time; please retry".into(),
        ),
        SubmissionWrite::NotFound => Rejection::NotFound("submission not found".into()),
    })
}

/// Enter a track into a round on behalf of `actor`.
pub async fn submit_item(
    store: &dyn BattleStore,
    actor: Uuid,
    round_id: Uuid,
    request: SubmissionContentRequest,
    now: SystemTime,
) -> Result<SubmissionView, ServiceError> {
    let round = load_round(store, round_id).await?;
    ensure_submission_window(&round, now)?;

    let battle = load_battle(store, round.battle_id).await?;
    require_participant(store, battle.id, actor).await?;

    let content = content::normalize(&request.content)?;

    let existing = store.list_submissions(round.id).await?;
    if let Some(first) = existing.iter().find(|s| s.content_key == content.key) {
        return Err(duplicate_rejection(store, battle.id, first.submitter_id)
            .await?
            .into());
    }

    let count = store.count_submissions(round.id, actor).await?;
    let order = decide_submission_order(count, battle.double_submissions)?;

    let submission = SubmissionEntity {
        id: Uuid::new_v4(),
        round_id: round.id,
        battle_id: battle.id,
        submitter_id: actor,
        content_ref: content.reference,
        content_key: content.key,
        order,
        submitted_at: now,
        tally: 0,
    };

    match store.insert_submission(submission.clone()).await? {
        SubmissionWrite::Applied => {
            info!(
                round_id = %round.id,
                submission_id = %submission.id,
                order,
                "submission recorded"
            );
            Ok(submission.into())
        }
        rejected => Err(write_rejection(store, battle.id, rejected).await?.into()),
    }
}

/// Replace the track of one of the actor's own submissions.
pub async fn update_submission(
    store: &dyn BattleStore,
    actor: Uuid,
    submission_id: Uuid,
    request: SubmissionContentRequest,
    now: SystemTime,
) -> Result<SubmissionView, ServiceError> {
    let submission = load_submission(store, submission_id).await?;
    let round = load_round(store, submission.round_id).await?;
    ensure_submission_window(&round, now)?;
    ensure_owner(&submission, actor, "edit")?;

    let content = content::normalize(&request.content)?;
    match store
        .replace_submission_content(submission.id, content.reference, content.key)
        .await?
    {
        SubmissionWrite::Applied => {}
        rejected => {
            return Err(write_rejection(store, submission.battle_id, rejected)
                .await?
                .into());
        }
    }

    let updated = load_submission(store, submission.id).await?;
    info!(submission_id = %updated.id, "submission updated");
    Ok(updated.into())
}

/// Withdraw one of the actor's own submissions.
pub async fn remove_submission(
    store: &dyn BattleStore,
    actor: Uuid,
    submission_id: Uuid,
    now: SystemTime,
) -> Result<RemovedSubmission, ServiceError> {
    let submission = load_submission(store, submission_id).await?;
    let round = load_round(store, submission.round_id).await?;
    ensure_submission_window(&round, now)?;
    ensure_owner(&submission, actor, "remove")?;

    match store.delete_submission(submission.id).await? {
        SubmissionWrite::Applied => {
            info!(submission_id = %submission.id, "submission removed");
            Ok(RemovedSubmission {
                submission_id: submission.id,
            })
        }
        rejected => Err(write_rejection(store, submission.battle_id, rejected)
            .await?
            .into()),
    }
}

fn ensure_owner(submission: &SubmissionEntity, actor: Uuid, action: &str) -> Result<(), Rejection> {
    if submission.submitter_id != actor {
        return Err(Rejection::Unauthorized(format!(
            "you can only {action} your own submissions"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{Fixture, SUBMISSION_DEADLINE, at, track};

    fn content(n: u8) -> SubmissionContentRequest {
        SubmissionContentRequest { content: track(n) }
    }

    async fn current_round(fixture: &Fixture, battle_id: Uuid) -> Uuid {
        fixture
            .store
            .find_battle(battle_id)
            .await
            .unwrap()
            .unwrap()
            .current_round_id
            .unwrap()
    }

    #[test]
    fn order_decisions() {
        assert_eq!(decide_submission_order(0, false), Ok(1));
        assert_eq!(decide_submission_order(0, true), Ok(1));
        assert_eq!(decide_submission_order(1, true), Ok(2));
        assert_eq!(
            decide_submission_order(1, false),
            Err(Rejection::QuotaExceeded(ALREADY_SUBMITTED.into()))
        );
        assert_eq!(
            decide_submission_order(2, true),
            Err(Rejection::QuotaExceeded(MAXIMUM_SUBMITTED.into()))
        );
        assert_eq!(
            decide_submission_order(3, false),
            Err(Rejection::QuotaExceeded(MAXIMUM_SUBMITTED.into()))
        );
    }

    #[tokio::test]
    async fn double_submissions_take_orders_one_and_two() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, true).await;
        let round_id = current_round(&fixture, battle_id).await;

        let first = submit_item(&fixture.store, creator, round_id, content(1), at(10))
            .await
            .unwrap();
        let second = submit_item(&fixture.store, creator, round_id, content(2), at(11))
            .await
            .unwrap();
        let third = submit_item(&fixture.store, creator, round_id, content(3), at(12)).await;

        assert_eq!((first.order, second.order), (1, 2));
        assert!(matches!(
            third,
            Err(ServiceError::Rejected(Rejection::QuotaExceeded(message))) if message == MAXIMUM_SUBMITTED
        ));
    }

    #[tokio::test]
    async fn duplicate_content_names_first_submitter() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        fixture.enroll(battle_id, creator, rival, "rival").await;
        let round_id = current_round(&fixture, battle_id).await;

        submit_item(&fixture.store, creator, round_id, content(7), at(10))
            .await
            .unwrap();
        let link = SubmissionContentRequest {
            content: format!("https://open.spotify.com/track/{:0>22}?si=x", 7),
        };
        let err = submit_item(&fixture.store, rival, round_id, link, at(11))
            .await
            .unwrap_err();

        match err {
            ServiceError::Rejected(Rejection::Conflict(message)) => {
                assert!(message.contains("creator"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_members_and_late_entries_are_rejected() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        let round_id = current_round(&fixture, battle_id).await;

        let outsider = submit_item(&fixture.store, Uuid::new_v4(), round_id, content(1), at(10)).await;
        assert!(matches!(
            outsider,
            Err(ServiceError::Rejected(Rejection::Unauthorized(_)))
        ));

        let late = submit_item(
            &fixture.store,
            creator,
            round_id,
            content(1),
            at(SUBMISSION_DEADLINE + 1),
        )
        .await;
        assert!(matches!(
            late,
            Err(ServiceError::Rejected(Rejection::PhaseViolation(_)))
        ));
    }

    #[tokio::test]
    async fn only_owner_can_edit_and_remove() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let rival = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, true).await;
        fixture.enroll(battle_id, creator, rival, "rival").await;
        let round_id = current_round(&fixture, battle_id).await;

        let first = submit_item(&fixture.store, creator, round_id, content(1), at(10))
            .await
            .unwrap();
        let second = submit_item(&fixture.store, creator, round_id, content(2), at(11))
            .await
            .unwrap();

        let foreign = remove_submission(&fixture.store, rival, first.id, at(12)).await;
        assert!(matches!(
            foreign,
            Err(ServiceError::Rejected(Rejection::Unauthorized(_)))
        ));

        let edited = update_submission(&fixture.store, creator, second.id, content(9), at(12))
            .await
            .unwrap();
        assert_eq!(edited.content_key, track(9));

        remove_submission(&fixture.store, creator, first.id, at(13))
            .await
            .unwrap();
        let remaining = fixture.store.find_submission(second.id).await.unwrap().unwrap();
        assert_eq!(remaining.order, 1);
    }

    #[tokio::test]
    async fn invalid_content_is_rejected_without_write() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        let round_id = current_round(&fixture, battle_id).await;

        let result = submit_item(
            &fixture.store,
            creator,
            round_id,
            SubmissionContentRequest {
                content: "https://example.com/song".into(),
            },
            at(10),
        )
        .await;

        assert!(matches!(
            result,
            Err(ServiceError::Rejected(Rejection::InvalidInput(_)))
        ));
        assert!(fixture.store.list_submissions(round_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_entries_never_share_an_order() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, false).await;
        let round_id = current_round(&fixture, battle_id).await;

        let (first, second) = tokio::join!(
            submit_item(&fixture.store, creator, round_id, content(1), at(10)),
            submit_item(&fixture.store, creator, round_id, content(2), at(10)),
        );

        assert_eq!(
            [first.is_ok(), second.is_ok()].iter().filter(|ok| **ok).count(),
            1
        );
        let entries = fixture.store.list_submissions(round_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].order, 1);
    }

    #[tokio::test]
    async fn concurrent_double_entries_stay_within_two_distinct_orders() {
        let fixture = Fixture::new();
        let creator = Uuid::new_v4();
        let battle_id = fixture.battle(creator, 4, true).await;
        let round_id = current_round(&fixture, battle_id).await;

        let _ = tokio::join!(
            submit_item(&fixture.store, creator, round_id, content(1), at(10)),
            submit_item(&fixture.store, creator, round_id, content(2), at(10)),
            submit_item(&fixture.store, creator, round_id, content(3), at(10)),
        );

        let mut orders: Vec<u8> = fixture
            .store
            .list_submissions(round_id)
            .await
            .unwrap()
            .iter()
            .map(|entry| entry.order)
            .collect();
        orders.sort_unstable();
        assert!(orders.len() <= 2);
        assert!(orders.contains(&1));
        let mut unique = orders.clone();
        unique.dedup();
        assert_eq!(unique, orders);
    }
}
