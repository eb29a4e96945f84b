//! Branded numeric identifiers.
//!
//! Rooms, agents and messages are addressed by integer keys assigned by the
//! persistence layer. Each gets its own newtype so a room id can never be
//! passed where an agent id is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw key.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// The raw key.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix($prefix).unwrap_or(s);
                raw.parse::<i64>().map(Self)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a chat room.
    RoomId,
    "room#"
);
numeric_id!(
    /// Identifier of an agent participant.
    AgentId,
    "agent#"
);
numeric_id!(
    /// Identifier of a persisted message.
    MessageId,
    "msg#"
);

/// Key of one pooled backend session: one agent speaking in one room.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionKey {
    /// Room the session belongs to.
    pub room_id: RoomId,
    /// Agent the session speaks for.
    pub agent_id: AgentId,
}

impl SessionKey {
    /// Build a key for `(room_id, agent_id)`.
    #[must_use]
    pub const fn new(room_id: RoomId, agent_id: AgentId) -> Self {
        Self { room_id, agent_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room_id, self.agent_id)
    }
}
