//! Shared session state threaded through every coordinator call.

pub mod cache;
pub mod completion;
mod hub;
pub mod queue;
pub mod session;
mod tokens;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, broadcast, watch};

use crate::{
    config::CoreConfig,
    dao::{
        models::{GameId, MutationToken},
        party_store::PartyStore,
    },
    dto::events::PartyEvent,
    error::ServiceError,
};

pub use self::cache::PartyCache;
pub use self::completion::CompletionWatcher;
pub use self::hub::EventHub;
pub use self::queue::QueueHandle;
pub use self::tokens::{TokenGuard, TokenRegistry};

pub type SharedState = Arc<AppState>;

/// Central session state: the swappable store handle, the degraded flag, the
/// typed cache fed by the reconciliation pumps, the event hub, the per-game
/// queue workers, and the mutation-token registry.
pub struct AppState {
    config: CoreConfig,
    store: RwLock<Option<Arc<dyn PartyStore>>>,
    degraded: watch::Sender<bool>,
    events: EventHub,
    cache: PartyCache,
    completion: CompletionWatcher,
    queues: DashMap<GameId, QueueHandle>,
    tokens: TokenRegistry,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The session starts in degraded mode until a storage backend is installed.
    pub fn new(config: CoreConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            events: EventHub::new(config.event_capacity),
            cache: PartyCache::new(),
            completion: CompletionWatcher::new(),
            queues: DashMap::new(),
            tokens: TokenRegistry::new(config.token_ttl),
            store: RwLock::new(None),
            degraded: degraded_tx,
            config,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn PartyStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// The store handle, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_store(&self) -> Result<Arc<dyn PartyStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new storage backend and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn PartyStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Drop the storage backend and enter degraded mode.
    ///
    /// The cache and the completion watcher are cleared alongside: their
    /// contents describe a feed that no longer exists.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            *guard = None;
        }
        self.cache.clear();
        self.completion.clear();
        self.update_degraded(true);
    }

    /// Flip the degraded flag, broadcasting the transition to subscribers.
    pub fn update_degraded(&self, degraded: bool) {
        let previous = self.degraded.send_replace(degraded);
        if previous != degraded {
            self.events.broadcast(PartyEvent::Degraded { degraded });
        }
    }

    /// Whether the session currently lacks a storage backend.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Watch endpoint for degraded-mode transitions.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Hub carrying derived party events.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Subscribe to derived party events.
    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.events.subscribe()
    }

    /// Typed mirror of the store, maintained by the reconciliation pumps.
    pub fn cache(&self) -> &PartyCache {
        &self.cache
    }

    /// Edge-trigger watcher for hunt completions.
    pub fn completion(&self) -> &CompletionWatcher {
        &self.completion
    }

    /// Loaded configuration.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Claim a mutation token for the duration of one operation.
    pub fn claim_token(&self, token: MutationToken) -> Result<TokenGuard<'_>, ServiceError> {
        self.tokens.begin(token)
    }

    /// Worker handle for one game's queue, spawned lazily on first use.
    pub fn queue_handle(&self, game: &GameId) -> QueueHandle {
        self.queues
            .entry(game.clone())
            .or_insert_with(|| {
                QueueHandle::spawn(
                    game.clone(),
                    self.config.queue_depth,
                    self.config.commit_attempts,
                )
            })
            .clone()
    }
}
