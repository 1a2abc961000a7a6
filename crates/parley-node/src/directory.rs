//! In-memory identity directory.

use dashmap::DashMap;
use parley_core::{Identity, IdentityDirectory, IdentityId};

/// Identity directory held in memory.
///
/// Stands in for account storage. Registration replaces any identity with
/// the same id, which is how a key rotation looks to the core: sessions
/// opened under the old key keep their recorded offers, new verifications
/// use the new key.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    identities: DashMap<IdentityId, Identity>,
}

impl MemoryDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an identity. Returns the previous entry, if any.
    pub fn register(&self, identity: Identity) -> Option<Identity> {
        tracing::debug!(id = %identity.id, username = %identity.username, "Identity registered");
        self.identities.insert(identity.id, identity)
    }

    /// Remove an identity.
    pub fn remove(&self, id: IdentityId) -> Option<Identity> {
        self.identities.remove(&id).map(|(_, identity)| identity)
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl IdentityDirectory for MemoryDirectory {
    fn resolve(&self, id: IdentityId) -> Option<Identity> {
        self.identities.get(&id).map(|entry| entry.value().clone())
    }
}
