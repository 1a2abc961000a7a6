//! Long-lived identities and the directory that resolves them.
//!
//! Identities are owned by external account storage. The core only reads
//! them: the public signing key authenticates handshake offers, the username
//! makes audit records readable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque reference to an identity (account id in the directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdentityId(pub u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "identity:{}", self.0)
    }
}

/// Ed25519 public signing key (compressed Edwards point).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicSigningKey(pub [u8; 32]);

impl PublicSigningKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicSigningKey(")?;
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..)")
    }
}

/// A registered identity: who someone is and which key speaks for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Directory reference
    pub id: IdentityId,
    /// Human-readable account name
    pub username: String,
    /// Long-term key used to sign ephemeral handshake keys
    pub signing_key: PublicSigningKey,
}

/// Identity resolution, provided by account storage.
///
/// Implementations must be cheap to call from many request tasks at once;
/// the key-exchange manager resolves on every initiate and respond.
pub trait IdentityDirectory: Send + Sync {
    /// Look up an identity. `None` if it is not registered.
    fn resolve(&self, id: IdentityId) -> Option<Identity>;
}

impl<D: IdentityDirectory + ?Sized> IdentityDirectory for std::sync::Arc<D> {
    fn resolve(&self, id: IdentityId) -> Option<Identity> {
        (**self).resolve(id)
    }
}
