//! Identity and key store.
//!
//! The core does not implement any cipher; it only multiplexes the key
//! material that out-of-band access connections are authenticated with.
//! Derived per-user keys require a platform cipher and are resolved by the
//! radio layer, so [`KeyStore::get`] answers `None` for them.

use crate::wire::DecodeError;

/// Length of all mesh keys.
pub const KEY_LEN: usize = 16;

/// Key identifier carried in access-connection handshakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyId {
    /// No authentication.
    None,
    /// The node's private key.
    Node,
    /// Shared by every node of the network.
    Network,
    /// Shared across an organization's networks.
    Organization,
    /// Derived from the user base key and a user id.
    UserDerived(u32),
}

impl KeyId {
    pub fn to_u32(self) -> u32 {
        match self {
            KeyId::None => 0,
            KeyId::Node => 1,
            KeyId::Network => 2,
            KeyId::Organization => 3,
            KeyId::UserDerived(n) => n,
        }
    }

    pub fn from_u32(v: u32) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(KeyId::None),
            1 => Ok(KeyId::Node),
            2 => Ok(KeyId::Network),
            3 => Ok(KeyId::Organization),
            n if n >= 10 => Ok(KeyId::UserDerived(n)),
            _ => Err(DecodeError::InvalidField),
        }
    }
}

/// Persisted key material of a node.
#[derive(Clone)]
pub struct KeyStore {
    node_key: [u8; KEY_LEN],
    network_key: [u8; KEY_LEN],
    organization_key: [u8; KEY_LEN],
    user_base_key: [u8; KEY_LEN],
}

impl KeyStore {
    pub fn new(
        node_key: [u8; KEY_LEN],
        network_key: [u8; KEY_LEN],
        organization_key: [u8; KEY_LEN],
        user_base_key: [u8; KEY_LEN],
    ) -> Self {
        Self {
            node_key,
            network_key,
            organization_key,
            user_base_key,
        }
    }

    /// All-zero keys, usable for unauthenticated test networks.
    pub fn unset() -> Self {
        Self::new([0; KEY_LEN], [0; KEY_LEN], [0; KEY_LEN], [0; KEY_LEN])
    }

    /// Resolve a key id to key material.
    pub fn get(&self, id: KeyId) -> Option<[u8; KEY_LEN]> {
        match id {
            KeyId::Node => Some(self.node_key),
            KeyId::Network => Some(self.network_key),
            KeyId::Organization => Some(self.organization_key),
            // Derivation needs the platform cipher.
            KeyId::None | KeyId::UserDerived(_) => None,
        }
    }

    /// The base key user keys are derived from.
    pub fn user_base_key(&self) -> &[u8; KEY_LEN] {
        &self.user_base_key
    }
}

impl core::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Never print key material.
        f.debug_struct("KeyStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_multiplexing() {
        let store = KeyStore::new([1; 16], [2; 16], [3; 16], [4; 16]);
        assert_eq!(store.get(KeyId::Node), Some([1; 16]));
        assert_eq!(store.get(KeyId::Network), Some([2; 16]));
        assert_eq!(store.get(KeyId::Organization), Some([3; 16]));
        assert_eq!(store.get(KeyId::UserDerived(11)), None);
        assert_eq!(store.get(KeyId::None), None);
    }

    #[test]
    fn test_key_id_round_trip() {
        for id in [
            KeyId::None,
            KeyId::Node,
            KeyId::Network,
            KeyId::Organization,
            KeyId::UserDerived(31),
        ] {
            assert_eq!(KeyId::from_u32(id.to_u32()).unwrap(), id);
        }
        assert!(KeyId::from_u32(7).is_err());
    }
}
