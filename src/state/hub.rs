use tokio::sync::broadcast;

use crate::dto::events::PartyEvent;

/// Broadcast hub fanning party events out to every subscribed client session.
///
/// Events are only ever published by the reconciliation pumps (and the storage
/// supervisor for degradation notices), so subscribers observe the same
/// authoritative ordering the store produced.
pub struct EventHub {
    sender: broadcast::Sender<PartyEvent>,
}

impl EventHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<PartyEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: PartyEvent) {
        let _ = self.sender.send(event);
    }
}
