//! Sweater votes and poll answers.

use tracing::{debug, info};
use validator::Validate;

use crate::{
    dao::{
        models::{PollId, PollKind},
        party_store::{DocumentWrite, WriteBatch, WritePrecondition},
    },
    dto::vote::{LeaderboardEntry, PollAnswerRequest, PollTally, SweaterVoteRequest},
    error::ServiceError,
    state::SharedState,
};

/// Transfer the caller's single sweater vote to `target`.
///
/// The decrement of the previous target, the increment of the new one and
/// the vote pointer move commit as one batch, guarded by the vote observed
/// at read time. A concurrent re-vote by the same guest invalidates the
/// guard and the transfer is rebuilt from a fresh read.
pub async fn cast_sweater_vote(
    state: &SharedState,
    request: SweaterVoteRequest,
) -> Result<(), ServiceError> {
    if request.voter == request.target {
        return Err(ServiceError::InvalidInput(
            "voting for your own sweater is not allowed".into(),
        ));
    }
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;
    let attempts = state.config().commit_attempts.max(1);

    for attempt in 1..=attempts {
        let Some(voter) = store.find_user(request.voter.clone()).await? else {
            return Err(ServiceError::NotFound(format!("guest {}", request.voter)));
        };
        if store.find_user(request.target.clone()).await?.is_none() {
            return Err(ServiceError::NotFound(format!("guest {}", request.target)));
        }

        if voter.has_voted_for.as_ref() == Some(&request.target) {
            guard.commit();
            return Ok(());
        }

        // A previous target that has since left the party keeps no counter
        // to decrement.
        let previous = match voter.has_voted_for.clone() {
            Some(prev) if store.find_user(prev.clone()).await?.is_some() => Some(prev),
            _ => None,
        };

        let mut batch = WriteBatch::new()
            .require(WritePrecondition::SweaterVoteIs {
                voter: request.voter.clone(),
                expected: voter.has_voted_for.clone(),
            })
            .require(WritePrecondition::UserExists(request.target.clone()));
        if let Some(previous) = previous {
            batch = batch.write(DocumentWrite::AdjustVotesReceived {
                user: previous,
                delta: -1,
            });
        }
        let batch = batch
            .write(DocumentWrite::AdjustVotesReceived {
                user: request.target.clone(),
                delta: 1,
            })
            .write(DocumentWrite::SetSweaterVote {
                voter: request.voter.clone(),
                target: Some(request.target.clone()),
            });

        match store.commit(batch).await {
            Ok(()) => {
                guard.commit();
                info!(voter = %request.voter, target = %request.target, "sweater vote cast");
                return Ok(());
            }
            Err(err) if err.is_conflict() && attempt < attempts => {
                debug!(voter = %request.voter, attempt, "sweater vote conflicted, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(format!(
        "sweater vote by {} kept conflicting",
        request.voter
    )))
}

/// Record (or overwrite) the caller's answer to a poll.
pub async fn cast_poll_answer(
    state: &SharedState,
    request: PollAnswerRequest,
) -> Result<(), ServiceError> {
    request.validate()?;
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let Some(poll) = store.find_poll(request.poll.clone()).await? else {
        return Err(ServiceError::NotFound(format!("poll {}", request.poll)));
    };
    if !poll.is_active {
        return Err(ServiceError::InvalidState(format!(
            "poll {} is closed",
            poll.id
        )));
    }
    let answer = request.answer.trim().to_string();
    if poll.kind == PollKind::MultipleChoice && !poll.has_option(&answer) {
        return Err(ServiceError::InvalidInput(format!(
            "poll {} has no option `{answer}`",
            poll.id
        )));
    }

    let batch = WriteBatch::new().write(DocumentWrite::SetPollAnswer {
        poll: request.poll,
        voter: request.voter,
        answer,
    });
    store.commit(batch).await?;

    guard.commit();
    Ok(())
}

/// Aggregated answers of one poll, served from the session cache.
pub fn poll_tally(state: &SharedState, poll: &PollId) -> Result<PollTally, ServiceError> {
    state
        .cache()
        .poll(poll)
        .map(|poll| PollTally::from(&poll))
        .ok_or_else(|| ServiceError::NotFound(format!("poll {poll}")))
}

/// Every poll tally, served from the session cache.
pub fn poll_tallies(state: &SharedState) -> Vec<PollTally> {
    state.cache().polls().iter().map(Into::into).collect()
}

/// Guests ranked by received sweater votes.
pub fn sweater_leaderboard(state: &SharedState) -> Vec<LeaderboardEntry> {
    LeaderboardEntry::ranking(&state.cache().users())
}
