//! Store reconciliation: hydration, per-collection change pumps, and the
//! derivation of [`PartyEvent`]s.
//!
//! Mutation calls never broadcast anything themselves. Authoritative state
//! flows back through the store's change feed, gets applied to the cache
//! here, and only then becomes an event. That keeps every subscriber, local
//! or remote, on the same committed ordering.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    dao::{
        models::{GameEntity, UserEntity},
        party_store::{
            ChangeEvent, ChangeStream, CollectionKind, DocKey, PartyDocument, PartyStore,
        },
    },
    dto::{
        events::PartyEvent,
        guest::GuestSummary,
        queue::QueueSummary,
        vote::{LeaderboardEntry, PollTally},
    },
    error::ServiceError,
    state::{SharedState, completion::hunt_progress_summary},
};

const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(5);

/// Running reconciliation session.
///
/// Dropping the handle without calling [`SessionHandle::shutdown`] also stops
/// the pumps, just without waiting for them.
pub struct SessionHandle {
    shutdown: watch::Sender<bool>,
    pumps: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Signal the pumps to stop and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for pump in self.pumps {
            let _ = pump.await;
        }
        info!("party session stopped");
    }
}

/// Hydrate the caches and start one reconciliation pump per collection.
pub async fn start(state: &SharedState) -> Result<SessionHandle, ServiceError> {
    let store = state.require_store().await?;

    // Subscribe before listing so no commit slips between snapshot and feed.
    let mut feeds = Vec::with_capacity(CollectionKind::ALL.len());
    for collection in CollectionKind::ALL {
        feeds.push((collection, store.watch(collection).await?));
    }

    hydrate(state, store.as_ref()).await?;

    let (shutdown, _) = watch::channel(false);
    let pumps = feeds
        .into_iter()
        .map(|(collection, feed)| {
            tokio::spawn(pump(
                Arc::clone(state),
                collection,
                feed,
                shutdown.subscribe(),
            ))
        })
        .collect();

    info!("party session started");
    Ok(SessionHandle { shutdown, pumps })
}

async fn hydrate(state: &SharedState, store: &dyn PartyStore) -> Result<(), ServiceError> {
    let hunt_items = store.list_hunt_items().await?;
    let games = store.list_games().await?;
    let polls = store.list_polls().await?;
    let users = store.list_users().await?;

    debug!(
        users = users.len(),
        games = games.len(),
        polls = polls.len(),
        hunt_items = hunt_items.len(),
        "hydrated party snapshot"
    );

    // Baseline the watcher before events flow so hydrated progress cannot
    // fire a completion.
    for user in &users {
        state
            .completion()
            .observe(&hunt_items, &user.id, &user.hunt_progress);
    }

    state.cache().prime_hunt_items(hunt_items);
    state.cache().prime_games(games);
    state.cache().prime_polls(polls);
    state.cache().prime_users(users);

    Ok(())
}

async fn pump(
    state: SharedState,
    collection: CollectionKind,
    mut feed: ChangeStream,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(collection = %collection, "reconciliation pump started");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            change = feed.next() => match change {
                Some(change) => reconcile(&state, change),
                None => {
                    warn!(collection = %collection, "change feed ended, resubscribing");
                    match resubscribe(&state, collection, &mut shutdown).await {
                        Some(fresh) => feed = fresh,
                        None => break,
                    }
                }
            },
        }
    }

    debug!(collection = %collection, "reconciliation pump stopped");
}

/// Re-open the change feed after it ended, then replay a fresh snapshot
/// through the reconciler so changes missed during the gap still surface.
async fn resubscribe(
    state: &SharedState,
    collection: CollectionKind,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<ChangeStream> {
    let mut delay = RESUBSCRIBE_INITIAL_DELAY;

    loop {
        if *shutdown.borrow() {
            return None;
        }

        if let Some(store) = state.store().await {
            match store.watch(collection).await {
                Ok(feed) => match resync(state, collection, store.as_ref()).await {
                    Ok(()) => return Some(feed),
                    Err(err) => {
                        warn!(collection = %collection, error = %err, "resync after resubscribe failed");
                    }
                },
                Err(err) => {
                    warn!(collection = %collection, error = %err, "resubscribe attempt failed");
                }
            }
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return None;
                }
            }
            _ = sleep(delay) => {}
        }
        delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
    }
}

/// Diff a fresh snapshot of one collection against the cache, replaying the
/// differences as synthetic change events.
async fn resync(
    state: &SharedState,
    collection: CollectionKind,
    store: &dyn PartyStore,
) -> Result<(), ServiceError> {
    let snapshot: Vec<PartyDocument> = match collection {
        CollectionKind::Users => store
            .list_users()
            .await?
            .into_iter()
            .map(PartyDocument::User)
            .collect(),
        CollectionKind::Games => store
            .list_games()
            .await?
            .into_iter()
            .map(PartyDocument::Game)
            .collect(),
        CollectionKind::Polls => store
            .list_polls()
            .await?
            .into_iter()
            .map(PartyDocument::Poll)
            .collect(),
        CollectionKind::HuntItems => store
            .list_hunt_items()
            .await?
            .into_iter()
            .map(PartyDocument::HuntItem)
            .collect(),
    };

    let fresh: HashSet<DocKey> = snapshot.iter().map(PartyDocument::key).collect();
    for key in state.cache().keys(collection) {
        if !fresh.contains(&key) {
            reconcile(state, ChangeEvent::Removed(key));
        }
    }
    for doc in snapshot {
        reconcile(state, ChangeEvent::Upserted(doc));
    }

    Ok(())
}

/// Apply one change to the cache and broadcast the events it implies.
fn reconcile(state: &SharedState, change: ChangeEvent) {
    let previous = state.cache().apply(&change);

    match change {
        ChangeEvent::Upserted(doc) => {
            if previous.as_ref() == Some(&doc) {
                return;
            }
            match doc {
                PartyDocument::User(user) => {
                    let previous = match previous {
                        Some(PartyDocument::User(user)) => Some(user),
                        _ => None,
                    };
                    user_events(state, previous, user);
                }
                PartyDocument::Game(game) => {
                    let previous = match previous {
                        Some(PartyDocument::Game(game)) => Some(game),
                        _ => None,
                    };
                    game_events(state, previous, game);
                }
                PartyDocument::Poll(poll) => {
                    state.events().broadcast(PartyEvent::PollTallyChanged {
                        tally: PollTally::from(&poll),
                    });
                }
                PartyDocument::HuntItem(_) => {
                    state.events().broadcast(PartyEvent::CatalogChanged {
                        collection: CollectionKind::HuntItems,
                    });
                }
            }
        }
        ChangeEvent::Removed(key) => {
            // Removal of something the cache never held announces nothing.
            let Some(previous) = previous else {
                return;
            };
            match key {
                DocKey::User(user) => {
                    state.completion().forget(&user);
                    state
                        .events()
                        .broadcast(PartyEvent::GuestLeft { user: user.clone() });
                    if let PartyDocument::User(old) = previous
                        && (old.votes_received != 0 || old.has_voted_for.is_some())
                    {
                        broadcast_leaderboard(state);
                    }
                }
                DocKey::Game(_) => {
                    state.events().broadcast(PartyEvent::CatalogChanged {
                        collection: CollectionKind::Games,
                    });
                }
                DocKey::Poll(_) => {
                    state.events().broadcast(PartyEvent::CatalogChanged {
                        collection: CollectionKind::Polls,
                    });
                }
                DocKey::HuntItem(_) => {
                    state.events().broadcast(PartyEvent::CatalogChanged {
                        collection: CollectionKind::HuntItems,
                    });
                }
            }
        }
    }
}

fn user_events(state: &SharedState, previous: Option<UserEntity>, user: UserEntity) {
    let events = state.events();

    let Some(previous) = previous else {
        events.broadcast(PartyEvent::GuestJoined {
            guest: GuestSummary::from(&user),
        });
        // First snapshot seeds the completion baseline without firing.
        let catalog = state.cache().hunt_items();
        state
            .completion()
            .observe(&catalog, &user.id, &user.hunt_progress);
        return;
    };

    events.broadcast(PartyEvent::GuestUpdated {
        guest: GuestSummary::from(&user),
    });

    if previous.votes_received != user.votes_received
        || previous.has_voted_for != user.has_voted_for
    {
        broadcast_leaderboard(state);
    }

    if previous.hunt_progress != user.hunt_progress {
        let catalog = state.cache().hunt_items();
        let kind_of: HashMap<_, _> = catalog.iter().map(|item| (&item.id, item.hunt)).collect();

        let mut touched = BTreeSet::new();
        for (item, mark) in &user.hunt_progress {
            if previous.hunt_progress.get(item) != Some(mark)
                && let Some(kind) = kind_of.get(item)
            {
                touched.insert(*kind);
            }
        }
        for item in previous.hunt_progress.keys() {
            if !user.hunt_progress.contains_key(item)
                && let Some(kind) = kind_of.get(item)
            {
                touched.insert(*kind);
            }
        }

        for hunt in touched {
            events.broadcast(PartyEvent::HuntProgressUpdated {
                user: user.id.clone(),
                progress: hunt_progress_summary(&catalog, hunt, &user.hunt_progress),
            });
        }

        for hunt in state
            .completion()
            .observe(&catalog, &user.id, &user.hunt_progress)
        {
            events.broadcast(PartyEvent::HuntCompleted {
                user: user.id.clone(),
                hunt,
            });
        }
    }
}

fn game_events(state: &SharedState, previous: Option<GameEntity>, game: GameEntity) {
    let events = state.events();
    events.broadcast(PartyEvent::QueueChanged {
        queue: QueueSummary::from(&game),
    });

    let Some(previous) = previous else {
        return;
    };

    if game.results.len() > previous.results.len() {
        for result in &game.results[previous.results.len()..] {
            events.broadcast(PartyEvent::MatchConcluded {
                game: game.id.clone(),
                result: result.into(),
            });
        }
    }

    for (signup, score) in &game.scores {
        if previous.scores.get(signup) != Some(score) {
            events.broadcast(PartyEvent::ScoreAdjusted {
                game: game.id.clone(),
                signup: *signup,
                score: *score,
            });
        }
    }
}

fn broadcast_leaderboard(state: &SharedState) {
    let leaderboard = LeaderboardEntry::ranking(&state.cache().users());
    state
        .events()
        .broadcast(PartyEvent::SweaterVotesChanged { leaderboard });
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{collections::BTreeMap, time::SystemTime};

    use tokio::{sync::broadcast, time::timeout};
    use uuid::Uuid;

    use crate::{
        config::CoreConfig,
        dao::{
            models::{
                GameId, HuntItemId, HuntKind, HuntMark, Language, OptionId, PollId, UserId,
            },
            party_store::{DocumentWrite, WriteBatch, memory::MemoryPartyStore},
        },
        dto::{
            guest::{GuestNoteRequest, GuestSummary, JoinPartyRequest, ProfileUpdateRequest},
            hunt::MarkItemRequest,
            queue::{
                AdjustScoreRequest, JoinGameRequest, LeaveQueueRequest, ReportWinRequest,
                SignupSummary,
            },
            vote::{PollAnswerRequest, SweaterVoteRequest},
        },
        services::{guest_service, hunt_service, party_service, queue_service, vote_service},
        state::AppState,
    };

    async fn started() -> (SharedState, SessionHandle, broadcast::Receiver<PartyEvent>) {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let state = AppState::new(CoreConfig::default());
        state
            .install_store(Arc::new(MemoryPartyStore::new()))
            .await;
        let events = state.subscribe();
        let session = start(&state).await.unwrap();
        (state, session, events)
    }

    async fn wait_for<F>(events: &mut broadcast::Receiver<PartyEvent>, mut pred: F) -> PartyEvent
    where
        F: FnMut(&PartyEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event hub closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event did not arrive")
    }

    async fn collect_until<F>(
        events: &mut broadcast::Receiver<PartyEvent>,
        mut pred: F,
    ) -> Vec<PartyEvent>
    where
        F: FnMut(&PartyEvent) -> bool,
    {
        timeout(Duration::from_secs(5), async {
            let mut seen = Vec::new();
            loop {
                let event = events.recv().await.expect("event hub closed");
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
        })
        .await
        .expect("expected event did not arrive")
    }

    async fn join(state: &SharedState, id: &str, name: &str) -> GuestSummary {
        guest_service::join_party(
            state,
            JoinPartyRequest {
                token: Uuid::new_v4(),
                user: UserId::from(id),
                name: name.to_owned(),
                photo_url: None,
                language: None,
            },
        )
        .await
        .unwrap()
    }

    async fn queue_join(
        state: &SharedState,
        game: &GameId,
        user: &str,
        label: &str,
    ) -> Result<SignupSummary, ServiceError> {
        queue_service::join_game(
            state,
            JoinGameRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                user: UserId::from(user),
                label: label.to_owned(),
                partner: None,
            },
        )
        .await
    }

    async fn answer(
        state: &SharedState,
        poll: &str,
        voter: &str,
        text: &str,
    ) -> Result<(), ServiceError> {
        vote_service::cast_poll_answer(
            state,
            PollAnswerRequest {
                token: Uuid::new_v4(),
                poll: PollId::from(poll),
                voter: UserId::from(voter),
                answer: text.to_owned(),
            },
        )
        .await
    }

    async fn mark(
        state: &SharedState,
        user: &str,
        item: &str,
        mark: Option<HuntMark>,
    ) -> Result<(), ServiceError> {
        hunt_service::mark_item(
            state,
            MarkItemRequest {
                token: Uuid::new_v4(),
                user: UserId::from(user),
                item: HuntItemId::from(item),
                mark,
            },
        )
        .await
    }

    #[tokio::test]
    async fn join_party_seeds_the_catalog_and_announces_the_guest() {
        let (state, session, mut events) = started().await;

        let summary = join(&state, "alice", "Alice Jones").await;
        assert_eq!(summary.name, "Alice Jones");

        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::GuestJoined { guest } if guest.id == UserId::from("alice"))
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::QueueChanged { queue } if queue.game == GameId::from("g1"))
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::PollTallyChanged { tally } if tally.poll == PollId::from("p3"))
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::CatalogChanged {
                    collection: CollectionKind::HuntItems
                }
            )
        })
        .await;

        // The catalog only seeds once.
        assert!(!party_service::ensure_seeded(&state).await.unwrap());

        // Re-joining with a fresh token hands back the stored guest.
        let again = join(&state, "alice", "Alice Jones").await;
        assert_eq!(again.id, UserId::from("alice"));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn queue_flow_reports_wins_and_clamps_scores() {
        let (state, session, mut events) = started().await;
        let game = GameId::from("g3");

        join(&state, "alice", "Alice Jones").await;
        join(&state, "bob", "Bob Stone").await;
        join(&state, "carol", "Carol Vega").await;

        let first = queue_join(&state, &game, "alice", "Alice").await.unwrap();
        let second = queue_join(&state, &game, "bob", "Bob").await.unwrap();
        let third = queue_join(&state, &game, "carol", "Carol").await.unwrap();
        assert_eq!(second.label, "Bob");

        // Joining twice while still queued is refused.
        let again = queue_join(&state, &game, "carol", "Carol again").await;
        assert!(matches!(again, Err(ServiceError::InvalidState(_))));

        let result = queue_service::report_win(
            &state,
            ReportWinRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                winner: first.id,
            },
        )
        .await
        .unwrap();
        assert_eq!(result.winner_label, "Alice");
        assert_eq!(result.loser_label, "Bob");

        // The queue update precedes the match event on the feed.
        let seen = collect_until(&mut events, |event| {
            matches!(event, PartyEvent::MatchConcluded { game: touched, .. } if *touched == game)
        })
        .await;
        let queue = seen
            .iter()
            .find_map(|event| match event {
                PartyEvent::QueueChanged { queue }
                    if queue.game == game
                        && queue.signups.len() == 2
                        && queue.signups[0].wins == 1 =>
                {
                    Some(queue.clone())
                }
                _ => None,
            })
            .expect("queue board update for the concluded match");
        assert_eq!(queue.active_match, Some((first.id, third.id)));
        assert_eq!(queue.results.len(), 1);
        assert!(queue.scores.is_empty());

        // The loser left the queue, so bob can sign up again.
        let back = queue_join(&state, &game, "bob", "Bob back").await.unwrap();

        queue_service::adjust_score(
            &state,
            AdjustScoreRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                signup: first.id,
                delta: 3,
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::ScoreAdjusted { signup, score: 3, .. } if *signup == first.id
            )
        })
        .await;

        // Floors at zero instead of going negative.
        queue_service::adjust_score(
            &state,
            AdjustScoreRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                signup: first.id,
                delta: -5,
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::ScoreAdjusted { signup, score: 0, .. } if *signup == first.id
            )
        })
        .await;

        // Only the head pair can conclude a match.
        let outside = queue_service::report_win(
            &state,
            ReportWinRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                winner: back.id,
            },
        )
        .await;
        assert!(matches!(outside, Err(ServiceError::InvalidState(_))));

        queue_service::leave_queue(
            &state,
            LeaveQueueRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                signup: back.id,
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::QueueChanged { queue }
                    if queue.game == game && queue.signups.len() == 2
            )
        })
        .await;

        let gone = queue_service::leave_queue(
            &state,
            LeaveQueueRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                signup: back.id,
            },
        )
        .await;
        assert!(matches!(gone, Err(ServiceError::NotFound(_))));

        // Individual games refuse team signups.
        let teamed = queue_service::join_game(
            &state,
            JoinGameRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                user: UserId::from("dave"),
                label: "Dave & Erin".into(),
                partner: Some(UserId::from("erin")),
            },
        )
        .await;
        assert!(matches!(teamed, Err(ServiceError::InvalidInput(_))));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn team_signups_cover_both_players() {
        let (state, session, _events) = started().await;
        let game = GameId::from("g1");

        join(&state, "alice", "Alice Jones").await;
        join(&state, "bob", "Bob Stone").await;

        // A guest cannot partner with themselves.
        let solo_pair = queue_service::join_game(
            &state,
            JoinGameRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                user: UserId::from("alice"),
                label: "Alice squared".into(),
                partner: Some(UserId::from("alice")),
            },
        )
        .await;
        assert!(matches!(solo_pair, Err(ServiceError::InvalidInput(_))));

        queue_service::join_game(
            &state,
            JoinGameRequest {
                token: Uuid::new_v4(),
                game: game.clone(),
                user: UserId::from("alice"),
                label: "Gift Wrappers".into(),
                partner: Some(UserId::from("bob")),
            },
        )
        .await
        .unwrap();

        // The partner counts as queued as well.
        let busy = queue_join(&state, &game, "bob", "Lone Bob").await;
        assert!(matches!(busy, Err(ServiceError::InvalidState(_))));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn profile_updates_and_notes_flow_to_subscribers() {
        let (state, session, mut events) = started().await;

        join(&state, "alice", "Alice Jones").await;

        guest_service::update_profile(
            &state,
            ProfileUpdateRequest {
                token: Uuid::new_v4(),
                user: UserId::from("alice"),
                name: Some("Alicia Jones".into()),
                language: Some(Language::Es),
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::GuestUpdated { guest }
                    if guest.name == "Alicia Jones" && guest.language == Language::Es
            )
        })
        .await;

        // Updates with nothing to change are refused up front.
        let empty = guest_service::update_profile(
            &state,
            ProfileUpdateRequest {
                token: Uuid::new_v4(),
                user: UserId::from("alice"),
                name: None,
                language: None,
            },
        )
        .await;
        assert!(matches!(empty, Err(ServiceError::InvalidInput(_))));

        guest_service::append_host_note(
            &state,
            GuestNoteRequest {
                token: Uuid::new_v4(),
                user: UserId::from("alice"),
                note: "Great sweater!".into(),
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::GuestUpdated { guest }
                    if guest.host_comment.contains("Great sweater!")
            )
        })
        .await;

        // Writes against unknown guests surface as missing documents.
        let missing = guest_service::update_profile(
            &state,
            ProfileUpdateRequest {
                token: Uuid::new_v4(),
                user: UserId::from("nobody"),
                name: Some("No Body".into()),
                language: None,
            },
        )
        .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        guest_service::remove_guest(&state, UserId::from("alice"))
            .await
            .unwrap();
        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::GuestLeft { user } if *user == UserId::from("alice"))
        })
        .await;
        assert!(guest_service::guest(&state, &UserId::from("alice")).is_err());

        session.shutdown().await;
    }

    #[tokio::test]
    async fn sweater_votes_transfer_and_replays_are_rejected() {
        let (state, session, mut events) = started().await;

        join(&state, "alice", "Alice Jones").await;
        join(&state, "bob", "Bob Stone").await;
        join(&state, "carol", "Carol Vega").await;

        let token = Uuid::new_v4();
        vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token,
                voter: UserId::from("alice"),
                target: UserId::from("bob"),
            },
        )
        .await
        .unwrap();

        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::SweaterVotesChanged { leaderboard }
                    if leaderboard
                        .first()
                        .is_some_and(|top| top.user == UserId::from("bob") && top.votes == 1)
            )
        })
        .await;

        // Replaying the same token changes nothing, whatever the payload.
        let replay = vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token,
                voter: UserId::from("alice"),
                target: UserId::from("carol"),
            },
        )
        .await;
        assert!(matches!(replay, Err(ServiceError::AlreadyApplied)));

        // Moving the vote decrements the old target and increments the new.
        vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token: Uuid::new_v4(),
                voter: UserId::from("alice"),
                target: UserId::from("carol"),
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| match event {
            PartyEvent::SweaterVotesChanged { leaderboard } => {
                let votes_of = |id: &str| {
                    leaderboard
                        .iter()
                        .find(|entry| entry.user == UserId::from(id))
                        .map(|entry| entry.votes)
                };
                votes_of("carol") == Some(1) && votes_of("bob") == Some(0)
            }
            _ => false,
        })
        .await;

        let own = vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token: Uuid::new_v4(),
                voter: UserId::from("alice"),
                target: UserId::from("alice"),
            },
        )
        .await;
        assert!(matches!(own, Err(ServiceError::InvalidInput(_))));

        let missing = vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token: Uuid::new_v4(),
                voter: UserId::from("alice"),
                target: UserId::from("nobody"),
            },
        )
        .await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn poll_answers_tally_through_the_feed() {
        let (state, session, mut events) = started().await;

        join(&state, "alice", "Alice Jones").await;
        join(&state, "bob", "Bob Stone").await;

        answer(&state, "p1", "alice", "a").await.unwrap();
        answer(&state, "p1", "bob", "b").await.unwrap();

        let changed = wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::PollTallyChanged { tally }
                    if tally.poll == PollId::from("p1") && tally.total_answers == 2
            )
        })
        .await;
        let PartyEvent::PollTallyChanged { tally } = changed else {
            unreachable!()
        };
        let option_a = tally
            .options
            .iter()
            .find(|option| option.option == OptionId::from("a"))
            .unwrap();
        assert_eq!(option_a.count, 1);
        assert_eq!(option_a.percent, 50.0);

        // Multiple choice only accepts catalog options.
        let unknown = answer(&state, "p1", "alice", "z").await;
        assert!(matches!(unknown, Err(ServiceError::InvalidInput(_))));

        // Free text accepts anything non-blank.
        answer(&state, "p3", "alice", "The brisket, obviously")
            .await
            .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::PollTallyChanged { tally }
                    if tally.poll == PollId::from("p3")
                        && tally.free_answers.iter().any(|text| text.contains("brisket"))
            )
        })
        .await;

        let missing = answer(&state, "p9", "alice", "a").await;
        assert!(matches!(missing, Err(ServiceError::NotFound(_))));

        // An external writer closing a poll is reconciled and then enforced.
        let store = state.require_store().await.unwrap();
        let mut closed = store.find_poll(PollId::from("p2")).await.unwrap().unwrap();
        closed.is_active = false;
        store
            .commit(WriteBatch::new().write(DocumentWrite::PutPoll(closed)))
            .await
            .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::PollTallyChanged { tally }
                    if tally.poll == PollId::from("p2") && !tally.is_active
            )
        })
        .await;
        let late = answer(&state, "p2", "bob", "a").await;
        assert!(matches!(late, Err(ServiceError::InvalidState(_))));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn finishing_a_hunt_fires_completion_exactly_once() {
        let (state, session, mut events) = started().await;
        let alice = UserId::from("alice");

        join(&state, "alice", "Alice Jones").await;

        for item in ["h1", "h2", "h3"] {
            mark(&state, "alice", item, Some(HuntMark::Checked(true)))
                .await
                .unwrap();
        }
        mark(&state, "alice", "h4", Some(HuntMark::Answer("1987".into())))
            .await
            .unwrap();

        let seen = collect_until(&mut events, |event| {
            matches!(
                event,
                PartyEvent::HuntCompleted { user, hunt: HuntKind::House } if *user == alice
            )
        })
        .await;
        let progressed = seen
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    PartyEvent::HuntProgressUpdated { progress, .. }
                        if progress.hunt == HuntKind::House
                )
            })
            .count();
        assert_eq!(progressed, 4);

        let progress = hunt_service::hunt_progress(&state, &alice, HuntKind::House).unwrap();
        assert!(progress.complete);
        assert_eq!(progress.found, 4);
        assert!(hunt_service::is_hunt_complete(&state, &alice, HuntKind::House).unwrap());
        assert!(!hunt_service::is_hunt_complete(&state, &alice, HuntKind::Village).unwrap());

        // Rewriting an answer on a complete hunt does not re-fire; only a
        // fresh incomplete-to-complete transition does.
        mark(&state, "alice", "h4", Some(HuntMark::Answer("1988".into())))
            .await
            .unwrap();
        mark(&state, "alice", "h1", Some(HuntMark::Checked(false)))
            .await
            .unwrap();
        let seen = collect_until(&mut events, |event| {
            matches!(
                event,
                PartyEvent::HuntProgressUpdated { progress, .. }
                    if progress.hunt == HuntKind::House && !progress.complete
            )
        })
        .await;
        assert!(
            !seen
                .iter()
                .any(|event| matches!(event, PartyEvent::HuntCompleted { .. }))
        );

        mark(&state, "alice", "h1", Some(HuntMark::Checked(true)))
            .await
            .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::HuntCompleted { user, hunt: HuntKind::House } if *user == alice
            )
        })
        .await;

        session.shutdown().await;
    }

    #[tokio::test]
    async fn reset_party_clears_guests_queues_and_answers() {
        let (state, session, mut events) = started().await;
        let game = GameId::from("g4");

        join(&state, "alice", "Alice Jones").await;
        join(&state, "bob", "Bob Stone").await;
        queue_join(&state, &game, "alice", "Alice").await.unwrap();
        answer(&state, "p1", "bob", "c").await.unwrap();
        vote_service::cast_sweater_vote(
            &state,
            SweaterVoteRequest {
                token: Uuid::new_v4(),
                voter: UserId::from("bob"),
                target: UserId::from("alice"),
            },
        )
        .await
        .unwrap();
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::SweaterVotesChanged { leaderboard }
                    if leaderboard.first().is_some_and(|top| top.votes == 1)
            )
        })
        .await;

        party_service::reset_party(&state).await.unwrap();

        let mut remaining = 2;
        wait_for(&mut events, move |event| {
            if matches!(event, PartyEvent::GuestLeft { .. }) {
                remaining -= 1;
            }
            remaining == 0
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::QueueChanged { queue }
                    if queue.game == game && queue.signups.is_empty() && queue.results.is_empty()
            )
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(
                event,
                PartyEvent::PollTallyChanged { tally }
                    if tally.poll == PollId::from("p1") && tally.total_answers == 0
            )
        })
        .await;

        assert!(guest_service::guests(&state).is_empty());
        assert!(
            queue_service::queue_summary(&state, &game)
                .unwrap()
                .signups
                .is_empty()
        );

        session.shutdown().await;
    }

    #[tokio::test]
    async fn replacing_the_store_resyncs_the_cache() {
        let (state, session, mut events) = started().await;

        join(&state, "alice", "Alice Jones").await;
        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::GuestJoined { guest } if guest.id == UserId::from("alice"))
        })
        .await;

        // A replacement backend arrives holding a different guest list. The
        // old feeds end, the pumps resubscribe, and the resync replays the
        // difference as synthetic changes.
        let replacement = MemoryPartyStore::new();
        let bob = UserEntity {
            id: UserId::from("bob"),
            name: "Bob Stone".into(),
            photo_url: None,
            language: Language::En,
            host_comment: String::new(),
            votes_received: 0,
            has_voted_for: None,
            hunt_progress: BTreeMap::new(),
            joined_at: SystemTime::now(),
        };
        replacement
            .commit(WriteBatch::new().write(DocumentWrite::PutUser(bob)))
            .await
            .unwrap();
        state.install_store(Arc::new(replacement)).await;

        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::GuestLeft { user } if *user == UserId::from("alice"))
        })
        .await;
        wait_for(&mut events, |event| {
            matches!(event, PartyEvent::GuestJoined { guest } if guest.id == UserId::from("bob"))
        })
        .await;

        assert_eq!(guest_service::guests(&state).len(), 1);

        session.shutdown().await;
    }
}
