//! Typed in-memory mirror of the store, kept fresh by the reconciliation
//! pumps.

use dashmap::DashMap;

use crate::dao::{
    models::{
        GameEntity, GameId, HuntItemEntity, HuntItemId, HuntKind, PollEntity, PollId, UserEntity,
        UserId,
    },
    party_store::{ChangeEvent, CollectionKind, DocKey, PartyDocument},
};

/// Last-known committed state of every collection.
///
/// Reads served from the cache trail the change feed; callers that need to
/// react to their own writes subscribe to the event hub instead of
/// re-reading.
#[derive(Default)]
pub struct PartyCache {
    users: DashMap<UserId, UserEntity>,
    games: DashMap<GameId, GameEntity>,
    polls: DashMap<PollId, PollEntity>,
    hunt_items: DashMap<HuntItemId, HuntItemEntity>,
}

impl PartyCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Apply one change and return the document it replaced, if any.
    pub fn apply(&self, change: &ChangeEvent) -> Option<PartyDocument> {
        match change {
            ChangeEvent::Upserted(PartyDocument::User(user)) => self
                .users
                .insert(user.id.clone(), user.clone())
                .map(PartyDocument::User),
            ChangeEvent::Upserted(PartyDocument::Game(game)) => self
                .games
                .insert(game.id.clone(), game.clone())
                .map(PartyDocument::Game),
            ChangeEvent::Upserted(PartyDocument::Poll(poll)) => self
                .polls
                .insert(poll.id.clone(), poll.clone())
                .map(PartyDocument::Poll),
            ChangeEvent::Upserted(PartyDocument::HuntItem(item)) => self
                .hunt_items
                .insert(item.id.clone(), item.clone())
                .map(PartyDocument::HuntItem),
            ChangeEvent::Removed(DocKey::User(id)) => self
                .users
                .remove(id)
                .map(|(_, user)| PartyDocument::User(user)),
            ChangeEvent::Removed(DocKey::Game(id)) => self
                .games
                .remove(id)
                .map(|(_, game)| PartyDocument::Game(game)),
            ChangeEvent::Removed(DocKey::Poll(id)) => self
                .polls
                .remove(id)
                .map(|(_, poll)| PartyDocument::Poll(poll)),
            ChangeEvent::Removed(DocKey::HuntItem(id)) => self
                .hunt_items
                .remove(id)
                .map(|(_, item)| PartyDocument::HuntItem(item)),
        }
    }

    /// Replace the guest collection wholesale (hydration and resync).
    pub fn prime_users(&self, users: Vec<UserEntity>) {
        self.users.clear();
        for user in users {
            self.users.insert(user.id.clone(), user);
        }
    }

    /// Replace the game collection wholesale.
    pub fn prime_games(&self, games: Vec<GameEntity>) {
        self.games.clear();
        for game in games {
            self.games.insert(game.id.clone(), game);
        }
    }

    /// Replace the poll collection wholesale.
    pub fn prime_polls(&self, polls: Vec<PollEntity>) {
        self.polls.clear();
        for poll in polls {
            self.polls.insert(poll.id.clone(), poll);
        }
    }

    /// Replace the hunt catalog wholesale.
    pub fn prime_hunt_items(&self, items: Vec<HuntItemEntity>) {
        self.hunt_items.clear();
        for item in items {
            self.hunt_items.insert(item.id.clone(), item);
        }
    }

    /// Keys currently cached for one collection.
    pub fn keys(&self, collection: CollectionKind) -> Vec<DocKey> {
        match collection {
            CollectionKind::Users => self
                .users
                .iter()
                .map(|entry| DocKey::User(entry.key().clone()))
                .collect(),
            CollectionKind::Games => self
                .games
                .iter()
                .map(|entry| DocKey::Game(entry.key().clone()))
                .collect(),
            CollectionKind::Polls => self
                .polls
                .iter()
                .map(|entry| DocKey::Poll(entry.key().clone()))
                .collect(),
            CollectionKind::HuntItems => self
                .hunt_items
                .iter()
                .map(|entry| DocKey::HuntItem(entry.key().clone()))
                .collect(),
        }
    }

    /// Snapshot of one guest.
    pub fn user(&self, id: &UserId) -> Option<UserEntity> {
        self.users.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of one game.
    pub fn game(&self, id: &GameId) -> Option<GameEntity> {
        self.games.get(id).map(|entry| entry.value().clone())
    }

    /// Snapshot of one poll.
    pub fn poll(&self, id: &PollId) -> Option<PollEntity> {
        self.polls.get(id).map(|entry| entry.value().clone())
    }

    /// All guests, ordered by id for stable output.
    pub fn users(&self) -> Vec<UserEntity> {
        let mut users: Vec<_> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    /// All games, ordered by id.
    pub fn games(&self) -> Vec<GameEntity> {
        let mut games: Vec<_> = self.games.iter().map(|e| e.value().clone()).collect();
        games.sort_by(|a, b| a.id.cmp(&b.id));
        games
    }

    /// All polls, ordered by id.
    pub fn polls(&self) -> Vec<PollEntity> {
        let mut polls: Vec<_> = self.polls.iter().map(|e| e.value().clone()).collect();
        polls.sort_by(|a, b| a.id.cmp(&b.id));
        polls
    }

    /// The whole hunt catalog, ordered by id.
    pub fn hunt_items(&self) -> Vec<HuntItemEntity> {
        let mut items: Vec<_> = self.hunt_items.iter().map(|e| e.value().clone()).collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Catalog slice of one hunt, ordered by id.
    pub fn hunt_items_of(&self, hunt: HuntKind) -> Vec<HuntItemEntity> {
        let mut items: Vec<_> = self
            .hunt_items
            .iter()
            .filter(|e| e.value().hunt == hunt)
            .map(|e| e.value().clone())
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Drop everything, used when the store handle is torn down.
    pub fn clear(&self) {
        self.users.clear();
        self.games.clear();
        self.polls.clear();
        self.hunt_items.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::dao::models::Language;

    fn guest(id: &str) -> UserEntity {
        UserEntity {
            id: UserId::new(id),
            name: format!("Guest {id}"),
            photo_url: None,
            language: Language::En,
            host_comment: String::new(),
            votes_received: 0,
            has_voted_for: None,
            hunt_progress: Default::default(),
            joined_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn apply_returns_the_replaced_document() {
        let cache = PartyCache::new();
        let first = guest("u1");
        let mut second = guest("u1");
        second.votes_received = 3;

        assert!(
            cache
                .apply(&ChangeEvent::Upserted(PartyDocument::User(first.clone())))
                .is_none()
        );
        let replaced = cache.apply(&ChangeEvent::Upserted(PartyDocument::User(second)));
        assert_eq!(replaced, Some(PartyDocument::User(first)));
    }

    #[test]
    fn remove_yields_the_old_image_and_clears_the_entry() {
        let cache = PartyCache::new();
        cache.apply(&ChangeEvent::Upserted(PartyDocument::User(guest("u1"))));

        let removed = cache.apply(&ChangeEvent::Removed(DocKey::User(UserId::new("u1"))));
        assert!(matches!(removed, Some(PartyDocument::User(_))));
        assert!(cache.user(&UserId::new("u1")).is_none());
        // Removing again is a no-op.
        assert!(
            cache
                .apply(&ChangeEvent::Removed(DocKey::User(UserId::new("u1"))))
                .is_none()
        );
    }

    #[test]
    fn priming_drops_stale_entries() {
        let cache = PartyCache::new();
        cache.prime_users(vec![guest("u1"), guest("u2")]);
        cache.prime_users(vec![guest("u2")]);

        assert!(cache.user(&UserId::new("u1")).is_none());
        assert_eq!(cache.users().len(), 1);
    }
}
