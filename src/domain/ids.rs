//! Type-safe identifiers.
//!
//! Newtype wrappers around [`uuid::Uuid`] (v4) so lobby, user, and ledger
//! identifiers cannot be confused with one another.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! uuid_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Creates a new random identifier (UUID v4).
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing [`uuid::Uuid`].
            #[must_use]
            pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner [`uuid::Uuid`].
            #[must_use]
            pub const fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_newtype! {
    /// Unique identifier for a tier lobby.
    ///
    /// Generated once at provisioning time and immutable thereafter. Used
    /// as the dictionary key in [`super::lobby_registry::LobbyRegistry`]
    /// and as an input to spin seed derivation.
    LobbyId
}

uuid_newtype! {
    /// Unique identifier for a user.
    ///
    /// Assigned by the out-of-scope authentication layer; the engine only
    /// treats it as an opaque key into wallets and seats.
    UserId
}

uuid_newtype! {
    /// Unique identifier for one ledger entry.
    ///
    /// Lobby seats reference the [`EntryId`] of the debit that paid for
    /// them, and refunds reference the debit they compensate.
    EntryId
}
