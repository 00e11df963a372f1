//! King-of-the-hill queue transitions and the per-game worker that
//! serializes them.
//!
//! The pure functions in this module operate on an in-memory [`Queue`] and
//! never touch the store; the worker re-reads the game document, applies a
//! transition, and commits the rebuilt queue under a revision precondition.

use std::{sync::Arc, time::Duration};

use indexmap::IndexMap;
use rand::Rng;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};
use tracing::debug;
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            GameEntity, GameId, GameKind, GameResultEntity, SignupEntity, SignupId, UserId,
        },
        party_store::{DocumentWrite, PartyStore, WriteBatch, WritePrecondition},
    },
    error::ServiceError,
};

/// Runtime representation of a game queue: insertion order plus id uniqueness.
pub type Queue = IndexMap<SignupId, SignupEntity>;

/// Why a queue transition cannot be applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueRejection {
    /// The guest already appears in a signup of this queue.
    #[error("guest {user} already has a signup in this queue")]
    AlreadyQueued {
        /// Guest found on an existing signup.
        user: UserId,
    },
    /// Fewer than two signups are queued, so no match is running.
    #[error("no active match")]
    NoActiveMatch,
    /// The signup exists but holds neither of the first two positions.
    #[error("signup {signup} is not part of the active match")]
    NotInActiveMatch {
        /// Signup named by the caller.
        signup: SignupId,
    },
    /// No signup with this id is queued.
    #[error("unknown signup {signup}")]
    UnknownSignup {
        /// Signup named by the caller.
        signup: SignupId,
    },
    /// The queue carries the same signup id twice.
    #[error("queue contains duplicate signup id {signup}")]
    DuplicateSignupId {
        /// Offending id.
        signup: SignupId,
    },
}

/// Build the runtime queue from the stored signup list.
pub fn queue_of(game: &GameEntity) -> Result<Queue, QueueRejection> {
    let mut queue = Queue::with_capacity(game.signups.len());
    for signup in &game.signups {
        if queue.insert(signup.id, signup.clone()).is_some() {
            return Err(QueueRejection::DuplicateSignupId { signup: signup.id });
        }
    }
    Ok(queue)
}

/// Flatten the runtime queue back into the stored representation.
pub fn into_signups(queue: Queue) -> Vec<SignupEntity> {
    queue.into_values().collect()
}

/// Append a signup at the tail of the queue.
///
/// Rejected when any player of the new signup already appears in the queue,
/// as captain or as partner.
pub fn apply_join(queue: &mut Queue, signup: SignupEntity) -> Result<(), QueueRejection> {
    for queued in queue.values() {
        if let Some(player) = signup.players.iter().find(|player| queued.involves(player)) {
            return Err(QueueRejection::AlreadyQueued {
                user: player.clone(),
            });
        }
    }
    if queue.contains_key(&signup.id) {
        return Err(QueueRejection::DuplicateSignupId { signup: signup.id });
    }
    queue.insert(signup.id, signup);
    Ok(())
}

/// Outcome of a win: the surviving entry and the eliminated one.
#[derive(Debug)]
pub struct WinOutcome {
    /// Winner, with its incremented win count.
    pub winner: SignupEntity,
    /// Losing signup, already removed from the queue.
    pub loser: SignupEntity,
}

/// Conclude the active match in `winner`'s favor.
///
/// The active match is always the first two queue positions. The loser is
/// removed entirely; the winner takes a win and moves to position 0, where it
/// faces the next challenger.
pub fn apply_win(queue: &mut Queue, winner: SignupId) -> Result<WinOutcome, QueueRejection> {
    let (first, second) = match (queue.get_index(0), queue.get_index(1)) {
        (Some((first, _)), Some((second, _))) => (*first, *second),
        _ => return Err(QueueRejection::NoActiveMatch),
    };

    let loser_id = if winner == first {
        second
    } else if winner == second {
        first
    } else if queue.contains_key(&winner) {
        return Err(QueueRejection::NotInActiveMatch { signup: winner });
    } else {
        return Err(QueueRejection::UnknownSignup { signup: winner });
    };

    let loser = queue
        .shift_remove(&loser_id)
        .ok_or(QueueRejection::UnknownSignup { signup: loser_id })?;
    let mut surviving = queue
        .shift_remove(&winner)
        .ok_or(QueueRejection::UnknownSignup { signup: winner })?;
    surviving.wins += 1;

    let mut reordered = Queue::with_capacity(queue.len() + 1);
    reordered.insert(surviving.id, surviving.clone());
    for (id, signup) in queue.drain(..) {
        reordered.insert(id, signup);
    }
    *queue = reordered;

    Ok(WinOutcome {
        winner: surviving,
        loser,
    })
}

/// Remove a signup wherever it sits. Wins and results are untouched.
pub fn apply_leave(queue: &mut Queue, signup: SignupId) -> Result<SignupEntity, QueueRejection> {
    queue
        .shift_remove(&signup)
        .ok_or(QueueRejection::UnknownSignup { signup })
}

type StoreHandle = Arc<dyn PartyStore>;

enum QueueCommand {
    Join {
        store: StoreHandle,
        signup: SignupEntity,
        reply: oneshot::Sender<Result<SignupEntity, ServiceError>>,
    },
    Win {
        store: StoreHandle,
        winner: SignupId,
        reply: oneshot::Sender<Result<GameResultEntity, ServiceError>>,
    },
    Leave {
        store: StoreHandle,
        signup: SignupId,
        reply: oneshot::Sender<Result<(), ServiceError>>,
    },
}

/// Client half of a per-game queue worker.
///
/// Commands carry the store handle captured at call time, so an installed
/// replacement backend takes effect on the next command without restarting
/// the worker.
#[derive(Clone)]
pub struct QueueHandle {
    commands: mpsc::Sender<QueueCommand>,
}

impl QueueHandle {
    /// Spawn the worker task serializing one game's queue mutations.
    pub(crate) fn spawn(game: GameId, depth: usize, commit_attempts: u32) -> Self {
        let (commands, mailbox) = mpsc::channel(depth);
        tokio::spawn(run_worker(game, mailbox, commit_attempts));
        Self { commands }
    }

    /// Queue a join and wait for the committed signup.
    pub async fn join(
        &self,
        store: StoreHandle,
        signup: SignupEntity,
    ) -> Result<SignupEntity, ServiceError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(QueueCommand::Join {
                store,
                signup,
                reply,
            })
            .await
            .map_err(|_| worker_gone())?;
        answer.await.map_err(|_| worker_gone())?
    }

    /// Conclude the active match and wait for the recorded result.
    pub async fn report_win(
        &self,
        store: StoreHandle,
        winner: SignupId,
    ) -> Result<GameResultEntity, ServiceError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(QueueCommand::Win {
                store,
                winner,
                reply,
            })
            .await
            .map_err(|_| worker_gone())?;
        answer.await.map_err(|_| worker_gone())?
    }

    /// Withdraw a signup and wait for the commit.
    pub async fn leave(&self, store: StoreHandle, signup: SignupId) -> Result<(), ServiceError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(QueueCommand::Leave {
                store,
                signup,
                reply,
            })
            .await
            .map_err(|_| worker_gone())?;
        answer.await.map_err(|_| worker_gone())?
    }
}

fn worker_gone() -> ServiceError {
    ServiceError::Internal("game queue worker unavailable".into())
}

struct QueueUpdate<T> {
    value: T,
    append_result: Option<GameResultEntity>,
    clear_scores: bool,
}

impl<T> QueueUpdate<T> {
    fn plain(value: T) -> Self {
        Self {
            value,
            append_result: None,
            clear_scores: false,
        }
    }
}

async fn run_worker(game: GameId, mut mailbox: mpsc::Receiver<QueueCommand>, attempts: u32) {
    debug!(game = %game, "queue worker started");

    while let Some(command) = mailbox.recv().await {
        match command {
            QueueCommand::Join {
                store,
                signup,
                reply,
            } => {
                let result = commit_with_retry(&store, &game, attempts, |entity, queue| {
                    check_player_count(entity, &signup)?;
                    apply_join(queue, signup.clone())?;
                    Ok(QueueUpdate::plain(signup.clone()))
                })
                .await;
                let _ = reply.send(result);
            }
            QueueCommand::Win {
                store,
                winner,
                reply,
            } => {
                let result = commit_with_retry(&store, &game, attempts, |_, queue| {
                    let outcome = apply_win(queue, winner)?;
                    let recorded = GameResultEntity {
                        id: Uuid::new_v4(),
                        winner_label: outcome.winner.label.clone(),
                        loser_label: outcome.loser.label.clone(),
                        recorded_at: std::time::SystemTime::now(),
                    };
                    Ok(QueueUpdate {
                        value: recorded.clone(),
                        append_result: Some(recorded),
                        clear_scores: true,
                    })
                })
                .await;
                let _ = reply.send(result);
            }
            QueueCommand::Leave {
                store,
                signup,
                reply,
            } => {
                let result = commit_with_retry(&store, &game, attempts, |_, queue| {
                    apply_leave(queue, signup)?;
                    Ok(QueueUpdate::plain(()))
                })
                .await;
                let _ = reply.send(result);
            }
        }
    }

    debug!(game = %game, "queue worker stopped");
}

fn check_player_count(game: &GameEntity, signup: &SignupEntity) -> Result<(), ServiceError> {
    if game.kind == GameKind::Individual && signup.players.len() > 1 {
        return Err(ServiceError::InvalidInput(format!(
            "game {} is played individually, drop the partner",
            game.id
        )));
    }
    Ok(())
}

/// Read, transition, commit. Conflicting revisions retry with jitter.
async fn commit_with_retry<T, F>(
    store: &StoreHandle,
    game: &GameId,
    attempts: u32,
    mut transition: F,
) -> Result<T, ServiceError>
where
    F: FnMut(&GameEntity, &mut Queue) -> Result<QueueUpdate<T>, ServiceError>,
{
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        let Some(entity) = store.find_game(game.clone()).await? else {
            return Err(ServiceError::NotFound(format!("game {game}")));
        };
        let mut queue = queue_of(&entity)?;
        let update = transition(&entity, &mut queue)?;

        let batch = WriteBatch::new()
            .require(WritePrecondition::QueueRevisionIs {
                game: game.clone(),
                expected: entity.revision,
            })
            .write(DocumentWrite::ReplaceQueue {
                game: game.clone(),
                signups: into_signups(queue),
                append_result: update.append_result,
                clear_scores: update.clear_scores,
            });

        match store.commit(batch).await {
            Ok(()) => return Ok(update.value),
            Err(err) if err.is_conflict() && attempt < attempts => {
                debug!(game = %game, attempt, "queue commit conflicted, retrying");
                sleep(conflict_backoff(attempt)).await;
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ServiceError::Conflict(format!(
        "queue write for game {game} kept conflicting"
    )))
}

fn conflict_backoff(attempt: u32) -> Duration {
    let jitter = rand::rng().random_range(0..25);
    Duration::from_millis(u64::from(attempt) * 20 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::party_store::memory::MemoryPartyStore;

    fn signup(label: &str, players: &[&str]) -> SignupEntity {
        SignupEntity {
            id: Uuid::new_v4(),
            label: label.into(),
            captain: UserId::new(players[0]),
            wins: 0,
            players: players.iter().map(|p| UserId::new(*p)).collect(),
        }
    }

    fn game_with(signups: Vec<SignupEntity>) -> GameEntity {
        GameEntity {
            id: GameId::new("g1"),
            title: "Corn Hole".into(),
            kind: GameKind::Team,
            signups,
            results: Vec::new(),
            scores: Default::default(),
            revision: 0,
        }
    }

    #[test]
    fn queue_of_rejects_duplicate_ids() {
        let a = signup("Team A", &["u1"]);
        let mut b = signup("Team B", &["u2"]);
        b.id = a.id;

        let err = queue_of(&game_with(vec![a, b])).unwrap_err();
        assert!(matches!(err, QueueRejection::DuplicateSignupId { .. }));
    }

    #[test]
    fn join_appends_at_the_tail() {
        let mut queue = Queue::new();
        apply_join(&mut queue, signup("Team A", &["u1"])).unwrap();
        apply_join(&mut queue, signup("Team B", &["u2"])).unwrap();
        apply_join(&mut queue, signup("Team C", &["u3"])).unwrap();

        let labels: Vec<_> = queue.values().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Team A", "Team B", "Team C"]);
    }

    #[test]
    fn join_rejects_guest_already_queued_as_partner() {
        let mut queue = Queue::new();
        apply_join(&mut queue, signup("Team A", &["u1", "u2"])).unwrap();

        let err = apply_join(&mut queue, signup("Team B", &["u2", "u3"])).unwrap_err();
        assert_eq!(
            err,
            QueueRejection::AlreadyQueued {
                user: UserId::new("u2")
            }
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn holder_win_removes_challenger_and_keeps_position_zero() {
        let a = signup("Team A", &["u1"]);
        let b = signup("Team B", &["u2"]);
        let c = signup("Team C", &["u3"]);
        let mut queue = queue_of(&game_with(vec![a.clone(), b, c])).unwrap();

        let outcome = apply_win(&mut queue, a.id).unwrap();
        assert_eq!(outcome.winner.wins, 1);
        assert_eq!(outcome.loser.label, "Team B");

        let labels: Vec<_> = queue.values().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Team A", "Team C"]);
        assert_eq!(queue.values().next().map(|s| s.wins), Some(1));
    }

    #[test]
    fn challenger_win_dethrones_the_holder() {
        let a = signup("Team A", &["u1"]);
        let b = signup("Team B", &["u2"]);
        let c = signup("Team C", &["u3"]);
        let mut queue = queue_of(&game_with(vec![a, b.clone(), c])).unwrap();

        let outcome = apply_win(&mut queue, b.id).unwrap();
        assert_eq!(outcome.loser.label, "Team A");

        let labels: Vec<_> = queue.values().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Team B", "Team C"]);
    }

    #[test]
    fn win_by_waiting_signup_is_rejected() {
        let a = signup("Team A", &["u1"]);
        let b = signup("Team B", &["u2"]);
        let c = signup("Team C", &["u3"]);
        let mut queue = queue_of(&game_with(vec![a, b, c.clone()])).unwrap();

        let err = apply_win(&mut queue, c.id).unwrap_err();
        assert_eq!(err, QueueRejection::NotInActiveMatch { signup: c.id });
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn win_needs_two_queued_signups() {
        let a = signup("Team A", &["u1"]);
        let mut queue = queue_of(&game_with(vec![a.clone()])).unwrap();

        assert_eq!(
            apply_win(&mut queue, a.id).unwrap_err(),
            QueueRejection::NoActiveMatch
        );
    }

    #[test]
    fn win_by_unknown_signup_is_rejected() {
        let a = signup("Team A", &["u1"]);
        let b = signup("Team B", &["u2"]);
        let mut queue = queue_of(&game_with(vec![a, b])).unwrap();

        let ghost = Uuid::new_v4();
        assert_eq!(
            apply_win(&mut queue, ghost).unwrap_err(),
            QueueRejection::UnknownSignup { signup: ghost }
        );
    }

    #[test]
    fn leave_preserves_the_remaining_order() {
        let a = signup("Team A", &["u1"]);
        let b = signup("Team B", &["u2"]);
        let c = signup("Team C", &["u3"]);
        let mut queue = queue_of(&game_with(vec![a, b.clone(), c])).unwrap();

        apply_leave(&mut queue, b.id).unwrap();
        let labels: Vec<_> = queue.values().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Team A", "Team C"]);
    }

    #[tokio::test]
    async fn worker_serializes_join_and_win_against_the_store() {
        let store: StoreHandle = Arc::new(MemoryPartyStore::default());
        let game = game_with(Vec::new());
        let game_id = game.id.clone();
        store
            .commit(WriteBatch::new().write(DocumentWrite::PutGame(game)))
            .await
            .unwrap();

        let handle = QueueHandle::spawn(game_id.clone(), 8, 3);
        let a = handle
            .join(store.clone(), signup("Team A", &["u1"]))
            .await
            .unwrap();
        handle
            .join(store.clone(), signup("Team B", &["u2"]))
            .await
            .unwrap();
        handle
            .join(store.clone(), signup("Team C", &["u3"]))
            .await
            .unwrap();

        let result = handle.report_win(store.clone(), a.id).await.unwrap();
        assert_eq!(result.winner_label, "Team A");
        assert_eq!(result.loser_label, "Team B");

        let stored = store.find_game(game_id).await.unwrap().unwrap();
        let labels: Vec<_> = stored.signups.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, ["Team A", "Team C"]);
        assert_eq!(stored.signups[0].wins, 1);
        assert_eq!(stored.results.len(), 1);
        assert!(stored.scores.is_empty());
        assert_eq!(stored.revision, 4);
    }

    #[tokio::test]
    async fn worker_rejects_duplicate_player_across_signups() {
        let store: StoreHandle = Arc::new(MemoryPartyStore::default());
        let game = game_with(Vec::new());
        let game_id = game.id.clone();
        store
            .commit(WriteBatch::new().write(DocumentWrite::PutGame(game)))
            .await
            .unwrap();

        let handle = QueueHandle::spawn(game_id, 8, 3);
        handle
            .join(store.clone(), signup("Team A", &["u1", "u2"]))
            .await
            .unwrap();

        let err = handle
            .join(store.clone(), signup("Team B", &["u2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }
}
