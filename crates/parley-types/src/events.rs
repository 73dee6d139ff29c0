use std::fmt;

use serde::{Deserialize, Serialize};

use crate::api::{MessageResponse, ReactionResponse, RemovedMessage};
use crate::models::ConversationKey;

/// Events pushed by the backend over the realtime connection.
///
/// The backend's dotted event names are accepted here so the rest of the
/// client only ever sees one spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PushEvent {
    /// A message was posted
    #[serde(rename = "message_created", alias = "message.created")]
    MessageCreated(MessageResponse),

    /// A message body was edited
    #[serde(rename = "message_updated", alias = "message.updated")]
    MessageUpdated(MessageResponse),

    /// A message was deleted
    #[serde(rename = "message_removed", alias = "message.removed")]
    MessageRemoved(RemovedMessage),

    /// A reaction was added to a message
    #[serde(rename = "reaction_added", alias = "reaction.created")]
    ReactionAdded(ReactionResponse),

    /// A reaction was removed from a message
    #[serde(rename = "reaction_removed", alias = "reaction.removed")]
    ReactionRemoved(ReactionResponse),
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageCreated(_) => EventKind::MessageCreated,
            Self::MessageUpdated(_) => EventKind::MessageUpdated,
            Self::MessageRemoved(_) => EventKind::MessageRemoved,
            Self::ReactionAdded(_) => EventKind::ReactionAdded,
            Self::ReactionRemoved(_) => EventKind::ReactionRemoved,
        }
    }

    /// Whether the event may concern the conversation identified by `key`.
    /// Reaction payloads carry no conversation; they are accepted everywhere
    /// and become no-ops in stores that do not hold the target message.
    pub fn concerns(&self, key: &ConversationKey) -> bool {
        match self {
            Self::MessageCreated(msg) | Self::MessageUpdated(msg) => msg.belongs_to(key),
            Self::MessageRemoved(removed) => removed.may_belong_to(key),
            Self::ReactionAdded(_) | Self::ReactionRemoved(_) => true,
        }
    }

    /// Decodes one text frame from the realtime connection.
    pub fn from_frame(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Event kinds handlers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessageCreated,
    MessageUpdated,
    MessageRemoved,
    ReactionAdded,
    ReactionRemoved,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        Self::MessageCreated,
        Self::MessageUpdated,
        Self::MessageRemoved,
        Self::ReactionAdded,
        Self::ReactionRemoved,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message_created",
            Self::MessageUpdated => "message_updated",
            Self::MessageRemoved => "message_removed",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound frame sent from client to server.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame<'a> {
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub data: &'a serde_json::Value,
}
