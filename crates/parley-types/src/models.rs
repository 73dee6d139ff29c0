use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::{MessageResponse, ReactionResponse};
use crate::ids::{ChannelId, MessageId, PendingId, ReactionId, UserId, WorkspaceId};

// -- Conversations --

/// The two participants of a direct conversation, stored in sorted order so
/// both sides compute the same key regardless of who sent what.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn members(&self) -> (&UserId, &UserId) {
        (&self.low, &self.high)
    }

    pub fn contains(&self, user: &UserId) -> bool {
        &self.low == user || &self.high == user
    }

    /// True when `{a, b}` is this pair, in either order.
    pub fn matches(&self, a: &UserId, b: &UserId) -> bool {
        (&self.low == a && &self.high == b) || (&self.low == b && &self.high == a)
    }

    /// The participant that is not `me`. A note-to-self pair returns `me`.
    pub fn peer_of(&self, me: &UserId) -> &UserId {
        if &self.low == me { &self.high } else { &self.low }
    }
}

/// Identifies one conversation: a workspace channel or a direct pair.
///
/// Channel identity is the channel id; the workspace travels along because
/// the backend nests channel routes under it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConversationKey {
    Channel {
        workspace: WorkspaceId,
        channel: ChannelId,
    },
    Direct(DirectPair),
}

impl ConversationKey {
    pub fn channel(workspace: impl Into<WorkspaceId>, channel: impl Into<ChannelId>) -> Self {
        Self::Channel {
            workspace: workspace.into(),
            channel: channel.into(),
        }
    }

    pub fn direct(a: impl Into<UserId>, b: impl Into<UserId>) -> Self {
        Self::Direct(DirectPair::new(a.into(), b.into()))
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct(_))
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel { workspace, channel } => write!(f, "channel:{}/{}", workspace, channel),
            Self::Direct(pair) => {
                let (a, b) = pair.members();
                write!(f, "dm:{}:{}", a, b)
            }
        }
    }
}

// -- Reactions --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    /// `None` while the add is still in flight.
    pub id: Option<ReactionId>,
    pub emoji: String,
    pub user_id: UserId,
}

impl Reaction {
    pub fn new(emoji: impl Into<String>, user_id: UserId) -> Self {
        Self {
            id: None,
            emoji: emoji.into(),
            user_id,
        }
    }
}

impl From<ReactionResponse> for Reaction {
    fn from(resp: ReactionResponse) -> Self {
        Self {
            id: Some(resp.id),
            emoji: resp.emoji,
            user_id: resp.user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionOp {
    Add,
    Remove,
}

/// Reactions on one message, at most one per `(emoji, user)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSet {
    entries: BTreeMap<(String, UserId), Reaction>,
}

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the reaction unless the same user already reacted with the same
    /// emoji. A known server id fills in a provisional entry. Returns whether
    /// anything changed.
    pub fn insert(&mut self, reaction: Reaction) -> bool {
        let key = (reaction.emoji.clone(), reaction.user_id.clone());
        match self.entries.get_mut(&key) {
            Some(existing) => {
                if existing.id.is_none() && reaction.id.is_some() {
                    existing.id = reaction.id;
                    true
                } else {
                    false
                }
            }
            None => {
                self.entries.insert(key, reaction);
                true
            }
        }
    }

    pub fn remove(&mut self, emoji: &str, user_id: &UserId) -> Option<Reaction> {
        self.entries.remove(&(emoji.to_owned(), user_id.clone()))
    }

    pub fn get(&self, emoji: &str, user_id: &UserId) -> Option<&Reaction> {
        self.entries.get(&(emoji.to_owned(), user_id.clone()))
    }

    pub fn contains(&self, emoji: &str, user_id: &UserId) -> bool {
        self.get(emoji, user_id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reaction> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Per-emoji counts in emoji order, for display.
    pub fn counts(&self) -> Vec<(&str, usize)> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for ((emoji, _), _) in &self.entries {
            match counts.last_mut() {
                Some((last, n)) if *last == emoji.as_str() => *n += 1,
                _ => counts.push((emoji.as_str(), 1)),
            }
        }
        counts
    }
}

impl FromIterator<Reaction> for ReactionSet {
    fn from_iter<I: IntoIterator<Item = Reaction>>(iter: I) -> Self {
        let mut set = Self::new();
        for reaction in iter {
            set.insert(reaction);
        }
        set
    }
}

// -- Messages --

/// How a message is identified locally: by server id once confirmed,
/// by a provisional id before that.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Confirmed(MessageId),
    Pending(PendingId),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed(id) => id.fmt(f),
            Self::Pending(id) => id.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Confirmed,
    Pending,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub key: MessageKey,
    pub conversation: ConversationKey,
    pub author_id: UserId,
    pub body: String,
    pub attachment: Option<String>,
    pub reply_to: Option<MessageId>,
    /// Server timestamp once confirmed; the local clock while pending.
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub reactions: ReactionSet,
    pub status: MessageStatus,
}

impl Message {
    pub fn confirmed(resp: MessageResponse, conversation: ConversationKey) -> Self {
        Self {
            key: MessageKey::Confirmed(resp.id),
            conversation,
            author_id: resp.author_id,
            body: resp.body,
            attachment: resp.file_url,
            reply_to: resp.reply_to,
            created_at: resp.created_at,
            edited_at: resp.edited_at,
            reactions: resp.reactions.into_iter().map(Reaction::from).collect(),
            status: MessageStatus::Confirmed,
        }
    }

    pub fn pending(
        pending_id: PendingId,
        conversation: ConversationKey,
        author_id: UserId,
        body: String,
        attachment: Option<String>,
        reply_to: Option<MessageId>,
    ) -> Self {
        Self {
            key: MessageKey::Pending(pending_id),
            conversation,
            author_id,
            body,
            attachment,
            reply_to,
            created_at: Utc::now(),
            edited_at: None,
            reactions: ReactionSet::new(),
            status: MessageStatus::Pending,
        }
    }

    pub fn id(&self) -> Option<&MessageId> {
        match &self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    pub fn pending_id(&self) -> Option<PendingId> {
        match self.key {
            MessageKey::Pending(id) => Some(id),
            MessageKey::Confirmed(_) => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == MessageStatus::Confirmed
    }
}
