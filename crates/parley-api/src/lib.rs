pub mod client;
pub mod error;
pub mod messages;
pub mod reactions;
pub mod routes;

use async_trait::async_trait;

use parley_types::api::{MessageResponse, ReactionResponse};
use parley_types::{ChannelId, ConversationKey, MessageId, ReactionId, UserId, WorkspaceId};

pub use client::{ApiClient, ApiConfig};
pub use error::ApiError;

/// Content of a message about to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub body: String,
    pub attachment: Option<String>,
    pub reply_to: Option<MessageId>,
}

impl Draft {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            attachment: None,
            reply_to: None,
        }
    }
}

/// The backend's REST surface as the sync engine consumes it.
#[async_trait]
pub trait MessageApi: Send + Sync + 'static {
    /// The user every request is made as. Direct-conversation routes are
    /// derived from it.
    fn me(&self) -> &UserId;

    async fn fetch_channel_messages(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Vec<MessageResponse>, ApiError>;

    /// Messages addressed to `user`. The backend has no pair endpoint, so a
    /// direct conversation needs this for both participants.
    async fn fetch_user_messages(&self, user: &UserId) -> Result<Vec<MessageResponse>, ApiError>;

    async fn send_message(
        &self,
        key: &ConversationKey,
        draft: &Draft,
    ) -> Result<MessageResponse, ApiError>;

    async fn edit_message(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        body: &str,
    ) -> Result<MessageResponse, ApiError>;

    async fn delete_message(&self, key: &ConversationKey, id: &MessageId) -> Result<(), ApiError>;

    async fn add_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionResponse, ApiError>;

    async fn remove_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        reaction: &ReactionId,
    ) -> Result<(), ApiError>;
}
