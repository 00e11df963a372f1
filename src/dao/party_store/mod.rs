/// In-process store used by tests and as the development backend.
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{
    GameEntity, GameId, GameResultEntity, HuntItemEntity, HuntItemId, HuntMark, Language,
    PollEntity, PollId, SignupEntity, SignupId, UserEntity, UserId,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt;

/// The document collections managed by a party store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    /// Guest documents.
    Users,
    /// Game documents (catalog plus live queue state).
    Games,
    /// Poll documents (catalog plus collected answers).
    Polls,
    /// Scavenger-hunt catalog items.
    HuntItems,
}

impl CollectionKind {
    /// Every collection, in hydration order.
    pub const ALL: [CollectionKind; 4] = [
        CollectionKind::HuntItems,
        CollectionKind::Games,
        CollectionKind::Polls,
        CollectionKind::Users,
    ];

    /// Backend collection name.
    pub fn name(self) -> &'static str {
        match self {
            CollectionKind::Users => "users",
            CollectionKind::Games => "games",
            CollectionKind::Polls => "polls",
            CollectionKind::HuntItems => "hunt_items",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed document as stored in one of the collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyDocument {
    /// Guest document.
    User(UserEntity),
    /// Game document.
    Game(GameEntity),
    /// Poll document.
    Poll(PollEntity),
    /// Hunt catalog item.
    HuntItem(HuntItemEntity),
}

impl PartyDocument {
    /// Collection this document belongs to.
    pub fn collection(&self) -> CollectionKind {
        match self {
            PartyDocument::User(_) => CollectionKind::Users,
            PartyDocument::Game(_) => CollectionKind::Games,
            PartyDocument::Poll(_) => CollectionKind::Polls,
            PartyDocument::HuntItem(_) => CollectionKind::HuntItems,
        }
    }

    /// Typed key of this document.
    pub fn key(&self) -> DocKey {
        match self {
            PartyDocument::User(user) => DocKey::User(user.id.clone()),
            PartyDocument::Game(game) => DocKey::Game(game.id.clone()),
            PartyDocument::Poll(poll) => DocKey::Poll(poll.id.clone()),
            PartyDocument::HuntItem(item) => DocKey::HuntItem(item.id.clone()),
        }
    }
}

/// Typed key identifying a document in its collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocKey {
    /// Key into the users collection.
    User(UserId),
    /// Key into the games collection.
    Game(GameId),
    /// Key into the polls collection.
    Poll(PollId),
    /// Key into the hunt items collection.
    HuntItem(HuntItemId),
}

impl DocKey {
    /// Collection this key points into.
    pub fn collection(&self) -> CollectionKind {
        match self {
            DocKey::User(_) => CollectionKind::Users,
            DocKey::Game(_) => CollectionKind::Games,
            DocKey::Poll(_) => CollectionKind::Polls,
            DocKey::HuntItem(_) => CollectionKind::HuntItems,
        }
    }

    /// Raw identifier, without the collection prefix.
    pub fn id_str(&self) -> &str {
        match self {
            DocKey::User(id) => id.as_str(),
            DocKey::Game(id) => id.as_str(),
            DocKey::Poll(id) => id.as_str(),
            DocKey::HuntItem(id) => id.as_str(),
        }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocKey::User(id) => write!(f, "users/{id}"),
            DocKey::Game(id) => write!(f, "games/{id}"),
            DocKey::Poll(id) => write!(f, "polls/{id}"),
            DocKey::HuntItem(id) => write!(f, "hunt_items/{id}"),
        }
    }
}

/// One typed write inside a batch.
///
/// Every variant names the exact fields it touches. There is no generic
/// patch-by-path escape hatch; a new field means a new variant.
#[derive(Debug, Clone)]
pub enum DocumentWrite {
    /// Create or replace a guest document.
    PutUser(UserEntity),
    /// Remove a guest document.
    DeleteUser(UserId),
    /// Atomically add `delta` to a guest's received-votes counter.
    AdjustVotesReceived {
        /// Guest whose counter changes.
        user: UserId,
        /// Signed amount to add.
        delta: i64,
    },
    /// Point a guest's sweater vote at `target`, or clear it.
    SetSweaterVote {
        /// Voting guest.
        voter: UserId,
        /// New vote target, or `None` to clear.
        target: Option<UserId>,
    },
    /// Set or clear one hunt-progress mark on a guest document.
    SetHuntMark {
        /// Guest whose progress changes.
        user: UserId,
        /// Catalog item being marked.
        item: HuntItemId,
        /// New mark, or `None` to clear it.
        mark: Option<HuntMark>,
    },
    /// Update the profile fields that are present.
    SetProfile {
        /// Guest whose profile changes.
        user: UserId,
        /// New display name, if changing.
        name: Option<String>,
        /// New display language, if changing.
        language: Option<Language>,
    },
    /// Append one line to a guest's guestbook comment.
    AppendHostNote {
        /// Guest whose guestbook grows.
        user: UserId,
        /// Line to append.
        note: String,
    },
    /// Create or replace a game document.
    PutGame(GameEntity),
    /// Replace a game's queue in one step and bump its revision.
    ReplaceQueue {
        /// Game whose queue is replaced.
        game: GameId,
        /// New signup order.
        signups: Vec<SignupEntity>,
        /// Result to append when the replacement concludes a match.
        append_result: Option<GameResultEntity>,
        /// Whether live scores reset alongside the replacement.
        clear_scores: bool,
    },
    /// Atomically add `delta` to one live score, clamped at zero.
    AdjustScore {
        /// Game holding the score map.
        game: GameId,
        /// Signup whose score changes.
        signup: SignupId,
        /// Signed amount to add.
        delta: i64,
    },
    /// Clear a game's signups, results and scores, keeping its catalog fields.
    ResetGame(GameId),
    /// Create or replace a poll document.
    PutPoll(PollEntity),
    /// Record a guest's poll answer, overwriting any previous one.
    SetPollAnswer {
        /// Poll being answered.
        poll: PollId,
        /// Answering guest.
        voter: UserId,
        /// Option id for multiple choice, free text otherwise.
        answer: String,
    },
    /// Drop every recorded answer of a poll.
    ClearPollAnswers(PollId),
    /// Create or replace a hunt catalog item.
    PutHuntItem(HuntItemEntity),
}

/// Condition checked inside the same atomic unit as the batch's writes.
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// The game's queue revision still equals `expected`.
    QueueRevisionIs {
        /// Game whose revision is checked.
        game: GameId,
        /// Revision observed when the batch was built.
        expected: u64,
    },
    /// The guest's recorded sweater vote still equals `expected`.
    SweaterVoteIs {
        /// Voting guest.
        voter: UserId,
        /// Vote target observed when the batch was built.
        expected: Option<UserId>,
    },
    /// The guest document exists.
    UserExists(UserId),
    /// The document does not exist yet. First writer wins.
    DocumentMissing(DocKey),
}

impl fmt::Display for WritePrecondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePrecondition::QueueRevisionIs { game, expected } => {
                write!(f, "games/{game} revision == {expected}")
            }
            WritePrecondition::SweaterVoteIs { voter, expected } => match expected {
                Some(target) => write!(f, "users/{voter} vote == {target}"),
                None => write!(f, "users/{voter} vote unset"),
            },
            WritePrecondition::UserExists(id) => write!(f, "users/{id} exists"),
            WritePrecondition::DocumentMissing(key) => write!(f, "{key} missing"),
        }
    }
}

/// Ordered set of writes applied as one indivisible unit.
///
/// Preconditions are evaluated against the committed state first; if any
/// fails the whole batch is rejected with
/// [`StorageError::PreconditionFailed`](crate::dao::storage::StorageError)
/// and nothing is applied.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    preconditions: Vec<WritePrecondition>,
    writes: Vec<DocumentWrite>,
}

impl WriteBatch {
    /// Start an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a precondition to the batch.
    pub fn require(mut self, condition: WritePrecondition) -> Self {
        self.preconditions.push(condition);
        self
    }

    /// Add a write to the batch.
    pub fn write(mut self, write: DocumentWrite) -> Self {
        self.writes.push(write);
        self
    }

    /// Preconditions in evaluation order.
    pub fn preconditions(&self) -> &[WritePrecondition] {
        &self.preconditions
    }

    /// Writes in application order.
    pub fn writes(&self) -> &[DocumentWrite] {
        &self.writes
    }

    /// Whether the batch carries no writes.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Split the batch into its preconditions and writes.
    pub fn into_parts(self) -> (Vec<WritePrecondition>, Vec<DocumentWrite>) {
        (self.preconditions, self.writes)
    }
}

/// Single document change observed on a collection feed.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// The document now has this content (created or updated).
    Upserted(PartyDocument),
    /// The document was removed.
    Removed(DocKey),
}

impl ChangeEvent {
    /// Collection the change happened in.
    pub fn collection(&self) -> CollectionKind {
        match self {
            ChangeEvent::Upserted(doc) => doc.collection(),
            ChangeEvent::Removed(key) => key.collection(),
        }
    }
}

/// Stream of changes for one collection.
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// Abstraction over the persistence layer for party session state.
///
/// Batches committed through [`PartyStore::commit`] are atomic: concurrent
/// readers and change-stream subscribers never observe a partially applied
/// batch, and a failed precondition leaves the store untouched. Increments
/// (`AdjustScore`, `AdjustVotesReceived`) are applied store-side so
/// concurrent adjustments never lose updates.
pub trait PartyStore: Send + Sync {
    fn find_user(&self, id: UserId) -> BoxFuture<'static, StorageResult<Option<UserEntity>>>;
    fn find_game(&self, id: GameId) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    fn find_poll(&self, id: PollId) -> BoxFuture<'static, StorageResult<Option<PollEntity>>>;
    fn list_users(&self) -> BoxFuture<'static, StorageResult<Vec<UserEntity>>>;
    fn list_games(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;
    fn list_polls(&self) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>>;
    fn list_hunt_items(&self) -> BoxFuture<'static, StorageResult<Vec<HuntItemEntity>>>;
    /// Apply a preconditioned batch as one atomic unit.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to every subsequent change of one collection.
    fn watch(&self, collection: CollectionKind)
    -> BoxFuture<'static, StorageResult<ChangeStream>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
