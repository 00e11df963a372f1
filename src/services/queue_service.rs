//! King-of-the-hill queue operations.
//!
//! Join, win and leave are serialized through the per-game worker; score
//! adjustments bypass it because the store applies them atomically on its
//! own.

use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::{
        models::{GameId, SignupEntity},
        party_store::{DocumentWrite, WriteBatch},
    },
    dto::queue::{
        AdjustScoreRequest, GameResultSummary, JoinGameRequest, LeaveQueueRequest, QueueSummary,
        ReportWinRequest, SignupSummary,
    },
    error::ServiceError,
    state::SharedState,
};

/// Append a signup at the tail of a game's queue.
pub async fn join_game(
    state: &SharedState,
    request: JoinGameRequest,
) -> Result<SignupSummary, ServiceError> {
    request.validate()?;
    if request.partner.as_ref() == Some(&request.user) {
        return Err(ServiceError::InvalidInput(
            "partner must be a different guest".into(),
        ));
    }
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let mut players = vec![request.user.clone()];
    if let Some(partner) = request.partner {
        players.push(partner);
    }
    let signup = SignupEntity {
        id: Uuid::new_v4(),
        label: request.label.trim().to_string(),
        captain: request.user,
        wins: 0,
        players,
    };

    let handle = state.queue_handle(&request.game);
    let committed = handle.join(store, signup).await?;

    guard.commit();
    info!(game = %request.game, signup = %committed.id, label = %committed.label, "signup queued");
    Ok(SignupSummary::from(&committed))
}

/// Conclude the active match in favor of `winner`.
pub async fn report_win(
    state: &SharedState,
    request: ReportWinRequest,
) -> Result<GameResultSummary, ServiceError> {
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let handle = state.queue_handle(&request.game);
    let result = handle.report_win(store, request.winner).await?;

    guard.commit();
    info!(
        game = %request.game,
        winner = %result.winner_label,
        loser = %result.loser_label,
        "match concluded"
    );
    Ok(GameResultSummary::from(&result))
}

/// Withdraw a signup from the queue wherever it sits.
pub async fn leave_queue(
    state: &SharedState,
    request: LeaveQueueRequest,
) -> Result<(), ServiceError> {
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let handle = state.queue_handle(&request.game);
    handle.leave(store, request.signup).await?;

    guard.commit();
    info!(game = %request.game, signup = %request.signup, "signup withdrawn");
    Ok(())
}

/// Nudge one signup's live score; the store clamps the floor at zero.
pub async fn adjust_score(
    state: &SharedState,
    request: AdjustScoreRequest,
) -> Result<(), ServiceError> {
    if request.delta == 0 {
        return Err(ServiceError::InvalidInput(
            "score delta must be non-zero".into(),
        ));
    }
    let guard = state.claim_token(request.token)?;
    let store = state.require_store().await?;

    let batch = WriteBatch::new().write(DocumentWrite::AdjustScore {
        game: request.game,
        signup: request.signup,
        delta: request.delta,
    });
    store.commit(batch).await?;

    guard.commit();
    Ok(())
}

/// Queue board of one game, served from the session cache.
pub fn queue_summary(state: &SharedState, game: &GameId) -> Result<QueueSummary, ServiceError> {
    state
        .cache()
        .game(game)
        .map(|game| QueueSummary::from(&game))
        .ok_or_else(|| ServiceError::NotFound(format!("game {game}")))
}

/// Every queue board, served from the session cache.
pub fn queue_boards(state: &SharedState) -> Vec<QueueSummary> {
    state.cache().games().iter().map(Into::into).collect()
}
