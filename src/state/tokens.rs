//! Replay protection for mutating requests.

use std::time::{Duration, Instant};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{dao::models::MutationToken, error::ServiceError};

const PRUNE_THRESHOLD: usize = 512;

/// Tracks mutation tokens that are in flight or were committed recently.
///
/// A token is claimed before its operation runs and released again when the
/// operation fails, so a retry after a transport error goes through while a
/// replay of a committed mutation surfaces as
/// [`ServiceError::AlreadyApplied`].
pub struct TokenRegistry {
    entries: DashMap<MutationToken, Instant>,
    ttl: Duration,
}

impl TokenRegistry {
    pub(crate) fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Claim `token` for the duration of one mutation.
    pub fn begin(&self, token: MutationToken) -> Result<TokenGuard<'_>, ServiceError> {
        self.prune();

        match self.entries.entry(token) {
            Entry::Occupied(mut held) => {
                if held.get().elapsed() < self.ttl {
                    return Err(ServiceError::AlreadyApplied);
                }
                held.insert(Instant::now());
                Ok(TokenGuard {
                    registry: self,
                    token,
                    committed: false,
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Ok(TokenGuard {
                    registry: self,
                    token,
                    committed: false,
                })
            }
        }
    }

    fn prune(&self) {
        if self.entries.len() > PRUNE_THRESHOLD {
            let ttl = self.ttl;
            self.entries.retain(|_, claimed| claimed.elapsed() < ttl);
        }
    }

    fn release(&self, token: &MutationToken) {
        self.entries.remove(token);
    }
}

/// RAII claim on a mutation token.
///
/// Dropping the guard without calling [`TokenGuard::commit`] releases the
/// claim, so a failed operation can be retried with the same token.
#[must_use]
pub struct TokenGuard<'a> {
    registry: &'a TokenRegistry,
    token: MutationToken,
    committed: bool,
}

impl TokenGuard<'_> {
    /// Keep the claim after the operation committed.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.token);
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::error::ServiceError;

    fn registry() -> TokenRegistry {
        TokenRegistry::new(Duration::from_secs(600))
    }

    #[test]
    fn committed_token_blocks_replays() {
        let registry = registry();
        let token = Uuid::new_v4();

        registry.begin(token).unwrap().commit();
        assert!(matches!(
            registry.begin(token),
            Err(ServiceError::AlreadyApplied)
        ));
    }

    #[test]
    fn released_token_can_be_retried() {
        let registry = registry();
        let token = Uuid::new_v4();

        drop(registry.begin(token).unwrap());
        assert!(registry.begin(token).is_ok());
    }

    #[test]
    fn in_flight_token_blocks_a_concurrent_duplicate() {
        let registry = registry();
        let token = Uuid::new_v4();

        let guard = registry.begin(token).unwrap();
        assert!(matches!(
            registry.begin(token),
            Err(ServiceError::AlreadyApplied)
        ));
        drop(guard);
    }

    #[test]
    fn expired_claims_are_reusable() {
        let registry = TokenRegistry::new(Duration::ZERO);
        let token = Uuid::new_v4();

        registry.begin(token).unwrap().commit();
        assert!(registry.begin(token).is_ok());
    }
}
