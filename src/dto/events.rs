use serde::Serialize;

use crate::{
    dao::{
        models::{GameId, HuntKind, SignupId, UserId},
        party_store::CollectionKind,
    },
    dto::{
        guest::GuestSummary,
        hunt::HuntProgressSummary,
        queue::{GameResultSummary, QueueSummary},
        vote::{LeaderboardEntry, PollTally},
    },
};

/// Domain events fanned out to subscribed client sessions.
///
/// Every variant is derived from the store's change feed by the
/// reconciliation pumps (the storage supervisor emits `Degraded`), never
/// synthesized by a mutation call, so subscribers always observe committed
/// state in store order.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PartyEvent {
    /// The backend lost or regained its storage connection.
    Degraded { degraded: bool },
    /// A guest document appeared.
    GuestJoined { guest: GuestSummary },
    /// A guest document changed (profile, notes, votes, or progress).
    GuestUpdated { guest: GuestSummary },
    /// A guest document was removed.
    GuestLeft { user: UserId },
    /// A game's queue board changed in any way.
    QueueChanged { queue: QueueSummary },
    /// A win was recorded for the active match.
    MatchConcluded {
        game: GameId,
        result: GameResultSummary,
    },
    /// A live score moved.
    ScoreAdjusted {
        game: GameId,
        signup: SignupId,
        score: i64,
    },
    /// The sweater-vote leaderboard changed.
    SweaterVotesChanged { leaderboard: Vec<LeaderboardEntry> },
    /// A poll's collected answers changed.
    PollTallyChanged { tally: PollTally },
    /// A guest's progress through one hunt moved.
    HuntProgressUpdated {
        user: UserId,
        progress: HuntProgressSummary,
    },
    /// A guest finished every item of a hunt (edge-triggered).
    HuntCompleted { user: UserId, hunt: HuntKind },
    /// A catalog collection was seeded or rewritten.
    CatalogChanged { collection: CollectionKind },
}
