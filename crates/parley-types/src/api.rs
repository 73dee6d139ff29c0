use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, MessageId, ReactionId, UserId, entity_ref};
use crate::models::ConversationKey;

// -- Auth --

/// Bearer credential attached to every REST request and to the gateway handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn token(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

// -- Messages --

/// Message resource as the backend returns it from REST and push payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    #[serde(rename = "uuid")]
    pub id: MessageId,
    #[serde(rename = "message")]
    pub body: String,
    #[serde(rename = "source", deserialize_with = "entity_ref::deserialize")]
    pub author_id: UserId,
    #[serde(default, deserialize_with = "entity_ref::option")]
    pub destination_user: Option<UserId>,
    #[serde(default, deserialize_with = "entity_ref::option")]
    pub destination_channel: Option<ChannelId>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(rename = "date")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default, rename = "reply_to_uuid")]
    pub reply_to: Option<MessageId>,
    #[serde(default, alias = "createdReaction")]
    pub reactions: Vec<ReactionResponse>,
}

impl MessageResponse {
    /// Whether this message is part of the conversation identified by `key`.
    /// Channels match on channel id; direct messages match the unordered
    /// `(source, destination)` pair.
    pub fn belongs_to(&self, key: &ConversationKey) -> bool {
        match key {
            ConversationKey::Channel { channel, .. } => {
                self.destination_channel.as_ref() == Some(channel)
            }
            ConversationKey::Direct(pair) => match &self.destination_user {
                Some(dest) => self.destination_channel.is_none() && pair.matches(&self.author_id, dest),
                None => false,
            },
        }
    }
}

/// Payload of a `message_removed` push. The backend only guarantees the id;
/// routing fields are present when it knows them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedMessage {
    #[serde(rename = "uuid")]
    pub id: MessageId,
    #[serde(default, rename = "source", deserialize_with = "entity_ref::option")]
    pub author_id: Option<UserId>,
    #[serde(default, deserialize_with = "entity_ref::option")]
    pub destination_user: Option<UserId>,
    #[serde(default, deserialize_with = "entity_ref::option")]
    pub destination_channel: Option<ChannelId>,
}

impl RemovedMessage {
    /// Removals without routing information are accepted by every conversation;
    /// removing an id a store does not hold is a no-op.
    pub fn may_belong_to(&self, key: &ConversationKey) -> bool {
        match (key, &self.destination_channel, &self.destination_user) {
            (ConversationKey::Channel { channel, .. }, Some(dest), _) => dest == channel,
            (ConversationKey::Direct(_), Some(_), _) => false,
            (ConversationKey::Direct(pair), None, Some(dest)) => match &self.author_id {
                Some(author) => pair.matches(author, dest),
                None => pair.contains(dest),
            },
            (ConversationKey::Channel { .. }, None, Some(_)) => false,
            (_, None, None) => true,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub message: String,
    pub source_uuid: UserId,
    pub destination_uuid: String,
    pub is_public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_uuid: Option<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct EditMessageRequest {
    pub message: String,
}

// -- Reactions --

/// Reaction resource; `message` is omitted when nested inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionResponse {
    #[serde(rename = "uuid")]
    pub id: ReactionId,
    pub emoji: String,
    #[serde(rename = "user", alias = "user_uuid", deserialize_with = "entity_ref::deserialize")]
    pub user_id: UserId,
    #[serde(
        default,
        rename = "message",
        alias = "message_uuid",
        deserialize_with = "entity_ref::option"
    )]
    pub message_id: Option<MessageId>,
}

#[derive(Debug, Serialize)]
pub struct CreateReactionRequest {
    pub emoji: String,
    pub user_uuid: UserId,
    pub message_uuid: MessageId,
}
