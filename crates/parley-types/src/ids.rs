use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares an opaque, server-assigned string identifier.
macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

opaque_id!(
    /// Server-assigned message identifier, unique per conversation.
    MessageId
);
opaque_id!(
    /// Server-assigned reaction identifier (needed to delete a reaction).
    ReactionId
);
opaque_id!(UserId);
opaque_id!(ChannelId);
opaque_id!(WorkspaceId);

/// Deserializers for id fields the backend sends either bare (`"u1"`) or as
/// the embedded entity (`{"uuid": "u1", ...}`), as its gateway does when it
/// forwards database rows unchanged. Use with `#[serde(deserialize_with)]`.
pub mod entity_ref {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ref<T> {
        Bare(T),
        Entity { uuid: T },
    }

    impl<T> Ref<T> {
        fn into_id(self) -> T {
            match self {
                Self::Bare(id) | Self::Entity { uuid: id } => id,
            }
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Ref::deserialize(deserializer).map(Ref::into_id)
    }

    /// Same, for optional fields; `null` and a missing field are `None`.
    pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<Ref<T>>::deserialize(deserializer).map(|id| id.map(Ref::into_id))
    }
}

/// Locally generated identifier for a message the server has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(Uuid);

impl PendingId {
    pub const PREFIX: &'static str = "pending-";

    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses the `pending-<uuid>` form produced by `Display`.
    pub fn parse(value: &str) -> Option<Self> {
        value
            .strip_prefix(Self::PREFIX)
            .and_then(|rest| rest.parse::<Uuid>().ok())
            .map(Self)
    }
}

impl fmt::Display for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}
