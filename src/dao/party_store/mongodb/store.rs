use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database,
    bson::{Bson, Document, doc, serialize_to_bson},
    change_stream::event::OperationType,
    error::{Error as MongoError, TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{FullDocumentType, IndexOptions},
};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoGameDocument, MongoHuntItemDocument, MongoPollDocument, MongoResultDocument,
        MongoSignupDocument, MongoUserDocument,
    },
};
use crate::dao::{
    models::{GameEntity, GameId, HuntItemEntity, HuntItemId, HuntMark, PollEntity, PollId,
        UserEntity, UserId},
    party_store::{
        ChangeEvent, ChangeStream, CollectionKind, DocKey, DocumentWrite, PartyDocument,
        PartyStore, WriteBatch, WritePrecondition,
    },
    storage::{StorageError, StorageResult},
};

const TXN_ATTEMPTS: u32 = 3;
const COMMIT_ATTEMPTS: u32 = 5;

/// MongoDB-backed [`PartyStore`].
///
/// Batches run inside multi-document transactions and subscriptions use
/// change streams, so the deployment must be a replica set (a single-node
/// replica set is enough for development).
#[derive(Clone)]
pub struct MongoPartyStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

/// Why a transaction body stopped, kept apart from `StorageError` so the
/// commit loop can tell transient Mongo failures from semantic ones.
enum BatchFailure {
    Precondition(String),
    Missing {
        collection: &'static str,
        key: String,
    },
    Encode {
        collection: &'static str,
        key: String,
        message: String,
    },
    Mongo {
        collection: &'static str,
        key: String,
        source: MongoError,
    },
}

impl BatchFailure {
    fn is_transient(&self) -> bool {
        matches!(self, BatchFailure::Mongo { source, .. }
            if source.contains_label(TRANSIENT_TRANSACTION_ERROR))
    }

    fn into_storage(self) -> StorageError {
        match self {
            BatchFailure::Precondition(condition) => {
                StorageError::PreconditionFailed { condition }
            }
            BatchFailure::Missing { collection, key } => {
                StorageError::MissingDocument { collection, key }
            }
            BatchFailure::Encode {
                collection,
                key,
                message,
            } => MongoDaoError::EncodeDocument {
                collection,
                key,
                message,
            }
            .into(),
            BatchFailure::Mongo {
                collection,
                key,
                source,
            } => MongoDaoError::WriteDocument {
                collection,
                key,
                source,
            }
            .into(),
        }
    }
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoPartyStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        let users = database.collection::<Document>(CollectionKind::Users.name());
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"votes_received": -1})
            .options(
                IndexOptions::builder()
                    .name(Some("user_votes_idx".to_owned()))
                    .build(),
            )
            .build();

        users
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: "users",
                index: "votes_received",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn handles(&self) -> (Client, Database) {
        let guard = self.inner.state.read().await;
        (guard.client.clone(), guard.database.clone())
    }

    async fn users(&self) -> Collection<MongoUserDocument> {
        self.database()
            .await
            .collection(CollectionKind::Users.name())
    }

    async fn games(&self) -> Collection<MongoGameDocument> {
        self.database()
            .await
            .collection(CollectionKind::Games.name())
    }

    async fn polls(&self) -> Collection<MongoPollDocument> {
        self.database()
            .await
            .collection(CollectionKind::Polls.name())
    }

    async fn hunt_items(&self) -> Collection<MongoHuntItemDocument> {
        self.database()
            .await
            .collection(CollectionKind::HuntItems.name())
    }

    async fn find_user(&self, id: UserId) -> MongoResult<Option<UserEntity>> {
        let collection = self.users().await;
        let document = collection
            .find_one(doc! {"_id": id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadDocument {
                collection: "users",
                key: id.to_string(),
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_game(&self, id: GameId) -> MongoResult<Option<GameEntity>> {
        let collection = self.games().await;
        let document = collection
            .find_one(doc! {"_id": id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadDocument {
                collection: "games",
                key: id.to_string(),
                source,
            })?;
        match document {
            Some(document) => {
                let entity =
                    document
                        .try_into()
                        .map_err(|message| MongoDaoError::DecodeDocument {
                            collection: "games",
                            key: id.to_string(),
                            message,
                        })?;
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    async fn find_poll(&self, id: PollId) -> MongoResult<Option<PollEntity>> {
        let collection = self.polls().await;
        let document = collection
            .find_one(doc! {"_id": id.as_str()})
            .await
            .map_err(|source| MongoDaoError::LoadDocument {
                collection: "polls",
                key: id.to_string(),
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn list_users(&self) -> MongoResult<Vec<UserEntity>> {
        let collection = self.users().await;
        let documents: Vec<MongoUserDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "users",
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "users",
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn list_games(&self) -> MongoResult<Vec<GameEntity>> {
        let collection = self.games().await;
        let documents: Vec<MongoGameDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "games",
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "games",
                source,
            })?;

        let mut games = Vec::with_capacity(documents.len());
        for document in documents {
            let key = document.id.to_string();
            let entity = document
                .try_into()
                .map_err(|message| MongoDaoError::DecodeDocument {
                    collection: "games",
                    key,
                    message,
                })?;
            games.push(entity);
        }
        Ok(games)
    }

    async fn list_polls(&self) -> MongoResult<Vec<PollEntity>> {
        let collection = self.polls().await;
        let documents: Vec<MongoPollDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "polls",
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "polls",
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn list_hunt_items(&self) -> MongoResult<Vec<HuntItemEntity>> {
        let collection = self.hunt_items().await;
        let documents: Vec<MongoHuntItemDocument> = collection
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "hunt_items",
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCollection {
                collection: "hunt_items",
                source,
            })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn commit_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.writes().is_empty() && batch.preconditions().is_empty() {
            return Ok(());
        }

        let (client, database) = self.handles().await;
        let mut session = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::StartSession { source })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            session
                .start_transaction()
                .await
                .map_err(|source| MongoDaoError::Transaction {
                    phase: "start",
                    source,
                })?;

            match run_batch(&database, &mut session, &batch).await {
                Ok(()) => match commit_with_retry(&mut session).await {
                    Ok(()) => return Ok(()),
                    Err(source) => {
                        if source.contains_label(TRANSIENT_TRANSACTION_ERROR)
                            && attempt < TXN_ATTEMPTS
                        {
                            continue;
                        }
                        return Err(MongoDaoError::Transaction {
                            phase: "commit",
                            source,
                        }
                        .into());
                    }
                },
                Err(failure) => {
                    let _ = session.abort_transaction().await;
                    if failure.is_transient() && attempt < TXN_ATTEMPTS {
                        continue;
                    }
                    return Err(failure.into_storage());
                }
            }
        }
    }

    async fn open_change_stream(&self, collection: CollectionKind) -> MongoResult<ChangeStream> {
        let database = self.database().await;
        match collection {
            CollectionKind::Users => {
                change_feed::<MongoUserDocument, _>(database, collection, |document| {
                    Ok(PartyDocument::User(document.into()))
                })
                .await
            }
            CollectionKind::Games => {
                change_feed::<MongoGameDocument, _>(database, collection, |document| {
                    let key = document.id.to_string();
                    document
                        .try_into()
                        .map(PartyDocument::Game)
                        .map_err(|message| MongoDaoError::DecodeDocument {
                            collection: "games",
                            key,
                            message,
                        })
                })
                .await
            }
            CollectionKind::Polls => {
                change_feed::<MongoPollDocument, _>(database, collection, |document| {
                    Ok(PartyDocument::Poll(document.into()))
                })
                .await
            }
            CollectionKind::HuntItems => {
                change_feed::<MongoHuntItemDocument, _>(database, collection, |document| {
                    Ok(PartyDocument::HuntItem(document.into()))
                })
                .await
            }
        }
    }
}

async fn commit_with_retry(session: &mut ClientSession) -> Result<(), MongoError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match session.commit_transaction().await {
            Ok(()) => return Ok(()),
            Err(err)
                if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempt < COMMIT_ATTEMPTS =>
            {
                continue;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn run_batch(
    database: &Database,
    session: &mut ClientSession,
    batch: &WriteBatch,
) -> Result<(), BatchFailure> {
    for condition in batch.preconditions() {
        check_precondition(database, session, condition).await?;
    }
    for write in batch.writes() {
        apply_write(database, session, write.clone()).await?;
    }
    Ok(())
}

async fn check_precondition(
    database: &Database,
    session: &mut ClientSession,
    condition: &WritePrecondition,
) -> Result<(), BatchFailure> {
    let holds = match condition {
        WritePrecondition::QueueRevisionIs { game, expected } => {
            let filter = doc! {"_id": game.as_str(), "revision": *expected as i64};
            raw_find(database, CollectionKind::Games, filter, game.to_string(), session)
                .await?
                .is_some()
        }
        WritePrecondition::SweaterVoteIs { voter, expected } => {
            let vote = match expected {
                Some(target) => Bson::String(target.to_string()),
                // `null` also matches documents where the field is absent.
                None => Bson::Null,
            };
            let filter = doc! {"_id": voter.as_str(), "has_voted_for": vote};
            raw_find(database, CollectionKind::Users, filter, voter.to_string(), session)
                .await?
                .is_some()
        }
        WritePrecondition::UserExists(id) => {
            let filter = doc! {"_id": id.as_str()};
            raw_find(database, CollectionKind::Users, filter, id.to_string(), session)
                .await?
                .is_some()
        }
        WritePrecondition::DocumentMissing(key) => {
            let filter = doc! {"_id": key.id_str()};
            raw_find(database, key.collection(), filter, key.to_string(), session)
                .await?
                .is_none()
        }
    };

    if holds {
        Ok(())
    } else {
        Err(BatchFailure::Precondition(condition.to_string()))
    }
}

async fn raw_find(
    database: &Database,
    collection: CollectionKind,
    filter: Document,
    key: String,
    session: &mut ClientSession,
) -> Result<Option<Document>, BatchFailure> {
    database
        .collection::<Document>(collection.name())
        .find_one(filter)
        .session(&mut *session)
        .await
        .map_err(|source| BatchFailure::Mongo {
            collection: collection.name(),
            key,
            source,
        })
}

fn mark_to_bson(mark: &HuntMark) -> Bson {
    match mark {
        HuntMark::Checked(done) => Bson::Boolean(*done),
        HuntMark::Answer(text) => Bson::String(text.clone()),
    }
}

/// Fail the batch when an update matched no document.
fn require_matched(
    matched_count: u64,
    collection: &'static str,
    key: &str,
) -> Result<(), BatchFailure> {
    if matched_count == 0 {
        Err(BatchFailure::Missing {
            collection,
            key: key.to_owned(),
        })
    } else {
        Ok(())
    }
}

async fn apply_write(
    database: &Database,
    session: &mut ClientSession,
    write: DocumentWrite,
) -> Result<(), BatchFailure> {
    match write {
        DocumentWrite::PutUser(user) => {
            let document = MongoUserDocument::from(user);
            let key = document.id.to_string();
            database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .replace_one(doc! {"_id": document.id.as_str()}, &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key,
                    source,
                })?;
        }
        DocumentWrite::DeleteUser(id) => {
            database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .delete_one(doc! {"_id": id.as_str()})
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: id.to_string(),
                    source,
                })?;
        }
        DocumentWrite::AdjustVotesReceived { user, delta } => {
            let result = database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .update_one(
                    doc! {"_id": user.as_str()},
                    doc! {"$inc": {"votes_received": delta}},
                )
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: user.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "users", user.as_str())?;
        }
        DocumentWrite::SetSweaterVote { voter, target } => {
            let vote = match target {
                Some(target) => Bson::String(target.to_string()),
                None => Bson::Null,
            };
            let result = database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .update_one(
                    doc! {"_id": voter.as_str()},
                    doc! {"$set": {"has_voted_for": vote}},
                )
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: voter.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "users", voter.as_str())?;
        }
        DocumentWrite::SetHuntMark { user, item, mark } => {
            let path = format!("hunt_progress.{item}");
            let update = match mark {
                Some(mark) => {
                    let mut set = Document::new();
                    set.insert(path, mark_to_bson(&mark));
                    doc! {"$set": set}
                }
                None => {
                    let mut unset = Document::new();
                    unset.insert(path, Bson::Null);
                    doc! {"$unset": unset}
                }
            };
            let result = database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .update_one(doc! {"_id": user.as_str()}, update)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: user.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "users", user.as_str())?;
        }
        DocumentWrite::SetProfile {
            user,
            name,
            language,
        } => {
            let mut set = Document::new();
            if let Some(name) = name {
                set.insert("name", name);
            }
            if let Some(language) = language {
                set.insert("language", language.as_str());
            }
            if set.is_empty() {
                return Ok(());
            }
            let result = database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .update_one(doc! {"_id": user.as_str()}, doc! {"$set": set})
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: user.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "users", user.as_str())?;
        }
        DocumentWrite::AppendHostNote { user, note } => {
            // Pipeline update so the append happens server-side in one step.
            let pipeline = vec![doc! {"$set": {"host_comment": {"$cond": {
                "if": {"$or": [
                    {"$eq": [{"$type": "$host_comment"}, "missing"]},
                    {"$eq": ["$host_comment", ""]},
                ]},
                "then": note.clone(),
                "else": {"$concat": ["$host_comment", "\n", note]},
            }}}}];
            let result = database
                .collection::<MongoUserDocument>(CollectionKind::Users.name())
                .update_one(doc! {"_id": user.as_str()}, pipeline)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "users",
                    key: user.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "users", user.as_str())?;
        }
        DocumentWrite::PutGame(game) => {
            let document = MongoGameDocument::from(game);
            let key = document.id.to_string();
            database
                .collection::<MongoGameDocument>(CollectionKind::Games.name())
                .replace_one(doc! {"_id": document.id.as_str()}, &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "games",
                    key,
                    source,
                })?;
        }
        DocumentWrite::ReplaceQueue {
            game,
            signups,
            append_result,
            clear_scores,
        } => {
            let signup_documents: Vec<MongoSignupDocument> =
                signups.into_iter().map(Into::into).collect();
            let signups_bson =
                serialize_to_bson(&signup_documents).map_err(|err| BatchFailure::Encode {
                    collection: "games",
                    key: game.to_string(),
                    message: err.to_string(),
                })?;

            let mut set = doc! {"signups": signups_bson};
            if clear_scores {
                set.insert("scores", Document::new());
            }
            let mut update = doc! {"$set": set, "$inc": {"revision": 1}};
            if let Some(result) = append_result {
                let result_bson = serialize_to_bson(&MongoResultDocument::from(result)).map_err(|err| {
                    BatchFailure::Encode {
                        collection: "games",
                        key: game.to_string(),
                        message: err.to_string(),
                    }
                })?;
                update.insert("$push", doc! {"results": result_bson});
            }

            let result = database
                .collection::<MongoGameDocument>(CollectionKind::Games.name())
                .update_one(doc! {"_id": game.as_str()}, update)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "games",
                    key: game.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "games", game.as_str())?;
        }
        DocumentWrite::AdjustScore {
            game,
            signup,
            delta,
        } => {
            let path = format!("scores.{signup}");
            let mut set = Document::new();
            set.insert(
                path.clone(),
                doc! {"$max": [0, {"$add": [{"$ifNull": [format!("${path}"), 0]}, delta]}]},
            );
            let pipeline = vec![doc! {"$set": set}];
            let result = database
                .collection::<MongoGameDocument>(CollectionKind::Games.name())
                .update_one(doc! {"_id": game.as_str()}, pipeline)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "games",
                    key: game.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "games", game.as_str())?;
        }
        DocumentWrite::ResetGame(game) => {
            let update = doc! {
                "$set": {
                    "signups": Bson::Array(Vec::new()),
                    "results": Bson::Array(Vec::new()),
                    "scores": Document::new(),
                },
                "$inc": {"revision": 1},
            };
            let result = database
                .collection::<MongoGameDocument>(CollectionKind::Games.name())
                .update_one(doc! {"_id": game.as_str()}, update)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "games",
                    key: game.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "games", game.as_str())?;
        }
        DocumentWrite::PutPoll(poll) => {
            let document = MongoPollDocument::from(poll);
            let key = document.id.to_string();
            database
                .collection::<MongoPollDocument>(CollectionKind::Polls.name())
                .replace_one(doc! {"_id": document.id.as_str()}, &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "polls",
                    key,
                    source,
                })?;
        }
        DocumentWrite::SetPollAnswer {
            poll,
            voter,
            answer,
        } => {
            let mut set = Document::new();
            set.insert(format!("answers.{voter}"), answer);
            let result = database
                .collection::<MongoPollDocument>(CollectionKind::Polls.name())
                .update_one(doc! {"_id": poll.as_str()}, doc! {"$set": set})
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "polls",
                    key: poll.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "polls", poll.as_str())?;
        }
        DocumentWrite::ClearPollAnswers(poll) => {
            let result = database
                .collection::<MongoPollDocument>(CollectionKind::Polls.name())
                .update_one(
                    doc! {"_id": poll.as_str()},
                    doc! {"$set": {"answers": Document::new()}},
                )
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "polls",
                    key: poll.to_string(),
                    source,
                })?;
            require_matched(result.matched_count, "polls", poll.as_str())?;
        }
        DocumentWrite::PutHuntItem(item) => {
            let document = MongoHuntItemDocument::from(item);
            let key = document.id.to_string();
            database
                .collection::<MongoHuntItemDocument>(CollectionKind::HuntItems.name())
                .replace_one(doc! {"_id": document.id.as_str()}, &document)
                .upsert(true)
                .session(&mut *session)
                .await
                .map_err(|source| BatchFailure::Mongo {
                    collection: "hunt_items",
                    key,
                    source,
                })?;
        }
    }
    Ok(())
}

async fn change_feed<T, F>(
    database: Database,
    kind: CollectionKind,
    convert: F,
) -> MongoResult<ChangeStream>
where
    T: serde::de::DeserializeOwned + Unpin + Send + Sync + 'static,
    F: Fn(T) -> Result<PartyDocument, MongoDaoError> + Send + 'static,
{
    let collection = database.collection::<T>(kind.name());
    let mut events = collection
        .watch()
        .full_document(FullDocumentType::UpdateLookup)
        .await
        .map_err(|source| MongoDaoError::WatchCollection {
            collection: kind.name(),
            source,
        })?;

    let feed = async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(collection = kind.name(), error = %err, "change stream failed");
                    break;
                }
            };
            match event.operation_type {
                OperationType::Insert | OperationType::Update | OperationType::Replace => {
                    let Some(document) = event.full_document else {
                        continue;
                    };
                    match convert(document) {
                        Ok(document) => yield ChangeEvent::Upserted(document),
                        Err(err) => {
                            warn!(
                                collection = kind.name(),
                                error = %err,
                                "skipping undecodable change",
                            );
                        }
                    }
                }
                OperationType::Delete => {
                    let Some(id) = event
                        .document_key
                        .as_ref()
                        .and_then(|key| key.get_str("_id").ok())
                    else {
                        continue;
                    };
                    yield ChangeEvent::Removed(doc_key(kind, id));
                }
                OperationType::Invalidate => {
                    warn!(collection = kind.name(), "change stream invalidated");
                    break;
                }
                _ => {}
            }
        }
    };
    Ok(feed.boxed())
}

fn doc_key(kind: CollectionKind, id: &str) -> DocKey {
    match kind {
        CollectionKind::Users => DocKey::User(UserId::from(id)),
        CollectionKind::Games => DocKey::Game(GameId::from(id)),
        CollectionKind::Polls => DocKey::Poll(PollId::from(id)),
        CollectionKind::HuntItems => DocKey::HuntItem(HuntItemId::from(id)),
    }
}

impl PartyStore for MongoPartyStore {
    fn find_user(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user(id).await.map_err(Into::into) })
    }

    fn find_game(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_poll(id).await.map_err(Into::into) })
    }

    fn list_users(&self) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_users().await.map_err(Into::into) })
    }

    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_games().await.map_err(Into::into) })
    }

    fn list_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_polls().await.map_err(Into::into) })
    }

    fn list_hunt_items(&self) -> BoxFuture<'static, StorageResult<Vec<HuntItemEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_hunt_items().await.map_err(Into::into) })
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit_batch(batch).await })
    }

    fn watch(
        &self,
        collection: CollectionKind,
    ) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .open_change_stream(collection)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
