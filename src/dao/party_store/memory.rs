use crate::dao::models::{
    GameEntity, GameId, HuntItemEntity, HuntItemId, PollEntity, PollId, UserEntity, UserId,
};
use crate::dao::party_store::{
    ChangeEvent, ChangeStream, CollectionKind, DocKey, DocumentWrite, PartyDocument, PartyStore,
    WriteBatch, WritePrecondition,
};
use crate::dao::storage::{StorageError, StorageResult};
use futures::StreamExt;
use futures::future::BoxFuture;
use indexmap::IndexSet;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const FEED_BUFFER: usize = 256;

#[derive(Debug, Error)]
#[error("memory store switched offline")]
struct Offline;

/// In-process [`PartyStore`] keeping every collection in a single mutex.
///
/// Commits check all preconditions and apply all writes while holding the
/// lock, so batches are atomic and change feeds observe them in commit
/// order. Used by tests and as the development backend; `set_offline`
/// simulates a lost backend.
#[derive(Clone, Default)]
pub struct MemoryPartyStore {
    inner: Arc<Inner>,
}

struct Inner {
    tables: Mutex<Tables>,
    feeds: Feeds,
    offline: AtomicBool,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            feeds: Feeds::new(FEED_BUFFER),
            offline: AtomicBool::new(false),
        }
    }
}

#[derive(Default, Clone)]
struct Tables {
    users: BTreeMap<UserId, UserEntity>,
    games: BTreeMap<GameId, GameEntity>,
    polls: BTreeMap<PollId, PollEntity>,
    hunt_items: BTreeMap<HuntItemId, HuntItemEntity>,
}

struct Feeds {
    users: broadcast::Sender<ChangeEvent>,
    games: broadcast::Sender<ChangeEvent>,
    polls: broadcast::Sender<ChangeEvent>,
    hunt_items: broadcast::Sender<ChangeEvent>,
}

impl Feeds {
    fn new(buffer: usize) -> Self {
        Self {
            users: broadcast::channel(buffer).0,
            games: broadcast::channel(buffer).0,
            polls: broadcast::channel(buffer).0,
            hunt_items: broadcast::channel(buffer).0,
        }
    }

    fn of(&self, collection: CollectionKind) -> &broadcast::Sender<ChangeEvent> {
        match collection {
            CollectionKind::Users => &self.users,
            CollectionKind::Games => &self.games,
            CollectionKind::Polls => &self.polls,
            CollectionKind::HuntItems => &self.hunt_items,
        }
    }
}

impl MemoryPartyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `Unavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn guard_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            Err(StorageError::unavailable(
                "memory store offline".to_owned(),
                Offline,
            ))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn commit_sync(&self, batch: WriteBatch) -> StorageResult<()> {
        self.guard_online()?;
        let mut tables = self.lock();
        for condition in batch.preconditions() {
            if !condition_holds(&tables, condition) {
                return Err(StorageError::PreconditionFailed {
                    condition: condition.to_string(),
                });
            }
        }

        // Writes land on a scratch copy first so a mid-batch failure leaves
        // the committed state untouched.
        let mut scratch = tables.clone();
        let mut touched = IndexSet::new();
        let (_, writes) = batch.into_parts();
        for write in writes {
            apply_write(&mut scratch, write, &mut touched)?;
        }

        let events: Vec<ChangeEvent> = touched
            .into_iter()
            .map(|key| match lookup(&scratch, &key) {
                Some(doc) => ChangeEvent::Upserted(doc),
                None => ChangeEvent::Removed(key),
            })
            .collect();
        *tables = scratch;
        for event in events {
            // Feeds without subscribers drop events on the floor.
            let _ = self.inner.feeds.of(event.collection()).send(event);
        }
        Ok(())
    }
}

fn condition_holds(tables: &Tables, condition: &WritePrecondition) -> bool {
    match condition {
        WritePrecondition::QueueRevisionIs { game, expected } => tables
            .games
            .get(game)
            .is_some_and(|doc| doc.revision == *expected),
        WritePrecondition::SweaterVoteIs { voter, expected } => tables
            .users
            .get(voter)
            .is_some_and(|doc| doc.has_voted_for == *expected),
        WritePrecondition::UserExists(id) => tables.users.contains_key(id),
        WritePrecondition::DocumentMissing(key) => lookup(tables, key).is_none(),
    }
}

fn lookup(tables: &Tables, key: &DocKey) -> Option<PartyDocument> {
    match key {
        DocKey::User(id) => tables.users.get(id).cloned().map(PartyDocument::User),
        DocKey::Game(id) => tables.games.get(id).cloned().map(PartyDocument::Game),
        DocKey::Poll(id) => tables.polls.get(id).cloned().map(PartyDocument::Poll),
        DocKey::HuntItem(id) => tables
            .hunt_items
            .get(id)
            .cloned()
            .map(PartyDocument::HuntItem),
    }
}

fn missing(collection: &'static str, key: impl ToString) -> StorageError {
    StorageError::MissingDocument {
        collection,
        key: key.to_string(),
    }
}

fn user_mut<'t>(tables: &'t mut Tables, id: &UserId) -> StorageResult<&'t mut UserEntity> {
    tables.users.get_mut(id).ok_or_else(|| missing("users", id))
}

fn game_mut<'t>(tables: &'t mut Tables, id: &GameId) -> StorageResult<&'t mut GameEntity> {
    tables.games.get_mut(id).ok_or_else(|| missing("games", id))
}

fn poll_mut<'t>(tables: &'t mut Tables, id: &PollId) -> StorageResult<&'t mut PollEntity> {
    tables.polls.get_mut(id).ok_or_else(|| missing("polls", id))
}

fn apply_write(
    tables: &mut Tables,
    write: DocumentWrite,
    touched: &mut IndexSet<DocKey>,
) -> StorageResult<()> {
    match write {
        DocumentWrite::PutUser(user) => {
            touched.insert(DocKey::User(user.id.clone()));
            tables.users.insert(user.id.clone(), user);
        }
        DocumentWrite::DeleteUser(id) => {
            touched.insert(DocKey::User(id.clone()));
            tables.users.remove(&id);
        }
        DocumentWrite::AdjustVotesReceived { user, delta } => {
            touched.insert(DocKey::User(user.clone()));
            user_mut(tables, &user)?.votes_received += delta;
        }
        DocumentWrite::SetSweaterVote { voter, target } => {
            touched.insert(DocKey::User(voter.clone()));
            user_mut(tables, &voter)?.has_voted_for = target;
        }
        DocumentWrite::SetHuntMark { user, item, mark } => {
            touched.insert(DocKey::User(user.clone()));
            let doc = user_mut(tables, &user)?;
            match mark {
                Some(mark) => {
                    doc.hunt_progress.insert(item, mark);
                }
                None => {
                    doc.hunt_progress.remove(&item);
                }
            }
        }
        DocumentWrite::SetProfile {
            user,
            name,
            language,
        } => {
            touched.insert(DocKey::User(user.clone()));
            let doc = user_mut(tables, &user)?;
            if let Some(name) = name {
                doc.name = name;
            }
            if let Some(language) = language {
                doc.language = language;
            }
        }
        DocumentWrite::AppendHostNote { user, note } => {
            touched.insert(DocKey::User(user.clone()));
            let doc = user_mut(tables, &user)?;
            if doc.host_comment.is_empty() {
                doc.host_comment = note;
            } else {
                doc.host_comment.push('\n');
                doc.host_comment.push_str(&note);
            }
        }
        DocumentWrite::PutGame(game) => {
            touched.insert(DocKey::Game(game.id.clone()));
            tables.games.insert(game.id.clone(), game);
        }
        DocumentWrite::ReplaceQueue {
            game,
            signups,
            append_result,
            clear_scores,
        } => {
            touched.insert(DocKey::Game(game.clone()));
            let doc = game_mut(tables, &game)?;
            doc.signups = signups;
            if let Some(result) = append_result {
                doc.results.push(result);
            }
            if clear_scores {
                doc.scores.clear();
            }
            doc.revision += 1;
        }
        DocumentWrite::AdjustScore {
            game,
            signup,
            delta,
        } => {
            touched.insert(DocKey::Game(game.clone()));
            let doc = game_mut(tables, &game)?;
            let slot = doc.scores.entry(signup).or_insert(0);
            *slot = (*slot + delta).max(0);
        }
        DocumentWrite::ResetGame(game) => {
            touched.insert(DocKey::Game(game.clone()));
            let doc = game_mut(tables, &game)?;
            doc.signups.clear();
            doc.results.clear();
            doc.scores.clear();
            doc.revision += 1;
        }
        DocumentWrite::PutPoll(poll) => {
            touched.insert(DocKey::Poll(poll.id.clone()));
            tables.polls.insert(poll.id.clone(), poll);
        }
        DocumentWrite::SetPollAnswer {
            poll,
            voter,
            answer,
        } => {
            touched.insert(DocKey::Poll(poll.clone()));
            poll_mut(tables, &poll)?.answers.insert(voter, answer);
        }
        DocumentWrite::ClearPollAnswers(poll) => {
            touched.insert(DocKey::Poll(poll.clone()));
            poll_mut(tables, &poll)?.answers.clear();
        }
        DocumentWrite::PutHuntItem(item) => {
            touched.insert(DocKey::HuntItem(item.id.clone()));
            tables.hunt_items.insert(item.id.clone(), item);
        }
    }
    Ok(())
}

impl PartyStore for MemoryPartyStore {
    fn find_user(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.users.get(&id).cloned())
        })
    }

    fn find_game(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.games.get(&id).cloned())
        })
    }

    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.polls.get(&id).cloned())
        })
    }

    fn list_users(&self) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.users.values().cloned().collect())
        })
    }

    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.games.values().cloned().collect())
        })
    }

    fn list_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.polls.values().cloned().collect())
        })
    }

    fn list_hunt_items(&self) -> BoxFuture<'static, StorageResult<Vec<HuntItemEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let tables = store.lock();
            Ok(tables.hunt_items.values().cloned().collect())
        })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit_sync(batch) })
    }

    fn watch(
        &self,
        collection: CollectionKind,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard_online()?;
            let receiver = store.inner.feeds.of(collection).subscribe();
            let stream = BroadcastStream::new(receiver).filter_map(move |event| async move {
                match event {
                    Ok(event) => Some(event),
                    Err(lagged) => {
                        tracing::warn!(%collection, error = %lagged, "change feed lagged");
                        None
                    }
                }
            });
            Ok(stream.boxed())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.guard_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.guard_online() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{GameKind, HuntMark, Language};
    use futures::FutureExt;
    use std::time::SystemTime;
    use uuid::Uuid;

    fn guest(id: &str) -> UserEntity {
        UserEntity {
            id: UserId::from(id),
            name: format!("Guest {id}"),
            photo_url: None,
            language: Language::En,
            host_comment: String::new(),
            votes_received: 0,
            has_voted_for: None,
            hunt_progress: BTreeMap::new(),
            joined_at: SystemTime::now(),
        }
    }

    fn game(id: &str) -> GameEntity {
        GameEntity {
            id: GameId::from(id),
            title: format!("Game {id}"),
            kind: GameKind::Team,
            signups: Vec::new(),
            results: Vec::new(),
            scores: BTreeMap::new(),
            revision: 0,
        }
    }

    async fn seeded_store() -> MemoryPartyStore {
        let store = MemoryPartyStore::new();
        let batch = WriteBatch::new()
            .write(DocumentWrite::PutUser(guest("ana")))
            .write(DocumentWrite::PutUser(guest("bo")))
            .write(DocumentWrite::PutGame(game("g1")));
        store.commit(batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn failed_precondition_applies_nothing() {
        let store = seeded_store().await;
        let batch = WriteBatch::new()
            .require(WritePrecondition::SweaterVoteIs {
                voter: UserId::from("ana"),
                expected: Some(UserId::from("bo")),
            })
            .write(DocumentWrite::AdjustVotesReceived {
                user: UserId::from("bo"),
                delta: 1,
            });
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::PreconditionFailed { .. }));
        let bo = store.find_user(UserId::from("bo")).await.unwrap().unwrap();
        assert_eq!(bo.votes_received, 0);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_earlier_writes() {
        let store = seeded_store().await;
        let batch = WriteBatch::new()
            .write(DocumentWrite::AdjustVotesReceived {
                user: UserId::from("ana"),
                delta: 1,
            })
            .write(DocumentWrite::SetSweaterVote {
                voter: UserId::from("nobody"),
                target: Some(UserId::from("ana")),
            });
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingDocument { .. }));
        let ana = store.find_user(UserId::from("ana")).await.unwrap().unwrap();
        assert_eq!(ana.votes_received, 0);
    }

    #[tokio::test]
    async fn score_adjustments_clamp_at_zero() {
        let store = seeded_store().await;
        let signup: Uuid = Uuid::new_v4();
        let up = WriteBatch::new().write(DocumentWrite::AdjustScore {
            game: GameId::from("g1"),
            signup,
            delta: 5,
        });
        store.commit(up).await.unwrap();
        let down = WriteBatch::new().write(DocumentWrite::AdjustScore {
            game: GameId::from("g1"),
            signup,
            delta: -9,
        });
        store.commit(down).await.unwrap();
        let doc = store.find_game(GameId::from("g1")).await.unwrap().unwrap();
        assert_eq!(doc.scores.get(&signup), Some(&0));
    }

    #[tokio::test]
    async fn first_writer_wins_on_missing_document() {
        let store = MemoryPartyStore::new();
        let seed = || {
            WriteBatch::new()
                .require(WritePrecondition::DocumentMissing(DocKey::Game(
                    GameId::from("g1"),
                )))
                .write(DocumentWrite::PutGame(game("g1")))
        };
        store.commit(seed()).await.unwrap();
        let err = store.commit(seed()).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn watch_emits_one_post_image_per_touched_document() {
        let store = seeded_store().await;
        let mut feed = store.watch(CollectionKind::Users).await.unwrap();

        let batch = WriteBatch::new()
            .write(DocumentWrite::AdjustVotesReceived {
                user: UserId::from("bo"),
                delta: 1,
            })
            .write(DocumentWrite::SetSweaterVote {
                voter: UserId::from("ana"),
                target: Some(UserId::from("bo")),
            })
            .write(DocumentWrite::SetHuntMark {
                user: UserId::from("ana"),
                item: HuntItemId::from("h1"),
                mark: Some(HuntMark::Checked(true)),
            });
        store.commit(batch).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            match feed.next().await {
                Some(ChangeEvent::Upserted(PartyDocument::User(user))) => seen.push(user),
                other => panic!("unexpected change: {other:?}"),
            }
        }
        assert!(feed.next().now_or_never().is_none());

        let bo = seen.iter().find(|u| u.id.as_str() == "bo").unwrap();
        assert_eq!(bo.votes_received, 1);
        let ana = seen.iter().find(|u| u.id.as_str() == "ana").unwrap();
        assert_eq!(ana.has_voted_for, Some(UserId::from("bo")));
        assert!(ana.hunt_progress.contains_key(&HuntItemId::from("h1")));
    }

    #[tokio::test]
    async fn watch_reports_removals() {
        let store = seeded_store().await;
        let mut feed = store.watch(CollectionKind::Users).await.unwrap();
        let batch = WriteBatch::new().write(DocumentWrite::DeleteUser(UserId::from("bo")));
        store.commit(batch).await.unwrap();
        match feed.next().await {
            Some(ChangeEvent::Removed(DocKey::User(id))) => assert_eq!(id.as_str(), "bo"),
            other => panic!("unexpected change: {other:?}"),
        }
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = seeded_store().await;
        store.set_offline(true);
        assert!(store.health_check().await.is_err());
        assert!(store.list_users().await.is_err());
        store.set_offline(false);
        assert!(store.try_reconnect().await.is_ok());
    }
}
