use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{
    dao::models::{
        GameEntity, GameId, GameKind, GameResultEntity, MutationToken, SignupEntity, SignupId,
        UserId,
    },
    dto::{format_system_time, validation::validate_signup_label},
};

/// Payload used to append a signup to a game queue.
#[derive(Debug, Deserialize, Validate)]
pub struct JoinGameRequest {
    pub token: MutationToken,
    pub game: GameId,
    /// Guest submitting the signup; always a player.
    pub user: UserId,
    #[validate(custom(function = validate_signup_label))]
    pub label: String,
    /// Second player for team games.
    #[serde(default)]
    pub partner: Option<UserId>,
}

/// Declares the winner of the active match.
#[derive(Debug, Deserialize)]
pub struct ReportWinRequest {
    pub token: MutationToken,
    pub game: GameId,
    pub winner: SignupId,
}

/// Withdraws a signup from the queue wherever it sits.
#[derive(Debug, Deserialize)]
pub struct LeaveQueueRequest {
    pub token: MutationToken,
    pub game: GameId,
    pub signup: SignupId,
}

/// Nudges the live score of one signup in the active match.
#[derive(Debug, Deserialize)]
pub struct AdjustScoreRequest {
    pub token: MutationToken,
    pub game: GameId,
    pub signup: SignupId,
    pub delta: i64,
}

/// Public projection of a queue signup.
#[derive(Clone, Debug, Serialize)]
pub struct SignupSummary {
    pub id: SignupId,
    pub label: String,
    pub captain: UserId,
    pub wins: u32,
    pub players: Vec<UserId>,
}

impl From<&SignupEntity> for SignupSummary {
    fn from(signup: &SignupEntity) -> Self {
        Self {
            id: signup.id,
            label: signup.label.clone(),
            captain: signup.captain.clone(),
            wins: signup.wins,
            players: signup.players.clone(),
        }
    }
}

/// Public projection of a concluded match.
#[derive(Clone, Debug, Serialize)]
pub struct GameResultSummary {
    pub id: String,
    pub winner_label: String,
    pub loser_label: String,
    pub recorded_at: String,
}

impl From<&GameResultEntity> for GameResultSummary {
    fn from(result: &GameResultEntity) -> Self {
        Self {
            id: result.id.to_string(),
            winner_label: result.winner_label.clone(),
            loser_label: result.loser_label.clone(),
            recorded_at: format_system_time(result.recorded_at),
        }
    }
}

/// Full queue board for one game: waiting list, active match, scores, history.
#[derive(Clone, Debug, Serialize)]
pub struct QueueSummary {
    pub game: GameId,
    pub title: String,
    pub kind: GameKind,
    pub signups: Vec<SignupSummary>,
    /// First two queue positions, when a match is running.
    pub active_match: Option<(SignupId, SignupId)>,
    pub scores: BTreeMap<SignupId, i64>,
    pub results: Vec<GameResultSummary>,
}

impl From<&GameEntity> for QueueSummary {
    fn from(game: &GameEntity) -> Self {
        Self {
            game: game.id.clone(),
            title: game.title.clone(),
            kind: game.kind,
            signups: game.signups.iter().map(Into::into).collect(),
            active_match: game.active_match(),
            scores: game.scores.clone(),
            results: game.results.iter().map(Into::into).collect(),
        }
    }
}
