use reqwest::Method;
use tracing::info;

use parley_types::api::{EditMessageRequest, MessageResponse, SendMessageRequest};
use parley_types::{ChannelId, ConversationKey, MessageId, UserId, WorkspaceId};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::routes;
use crate::Draft;

// -- Message calls --

impl ApiClient {
    /// GET /workspaces/{ws}/channels/{ch}/messages
    pub async fn list_channel_messages(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Vec<MessageResponse>, ApiError> {
        let key = ConversationKey::Channel {
            workspace: workspace.clone(),
            channel: channel.clone(),
        };
        let request = self.request(Method::GET, &routes::conversation(&key, self.me()));
        self.fetch(request).await
    }

    /// GET /users/{user}/messages
    pub async fn list_user_messages(&self, user: &UserId) -> Result<Vec<MessageResponse>, ApiError> {
        let request = self.request(Method::GET, &routes::user_messages(user));
        self.fetch(request).await
    }

    /// POST to the conversation's collection. Channel messages are public and
    /// addressed to the channel; direct messages are addressed to the peer.
    pub async fn post_message(
        &self,
        key: &ConversationKey,
        draft: &Draft,
    ) -> Result<MessageResponse, ApiError> {
        let (destination, is_public) = match key {
            ConversationKey::Channel { channel, .. } => (channel.to_string(), true),
            ConversationKey::Direct(pair) => (pair.peer_of(self.me()).to_string(), false),
        };
        let body = SendMessageRequest {
            message: draft.body.clone(),
            source_uuid: self.me().clone(),
            destination_uuid: destination,
            is_public,
            file_url: draft.attachment.clone(),
            reply_to_uuid: draft.reply_to.clone(),
        };

        let request = self
            .request(Method::POST, &routes::conversation(key, self.me()))
            .json(&body);
        let created: MessageResponse = self.fetch(request).await?;
        info!("Message {} sent to {}", created.id, key);
        Ok(created)
    }

    /// PUT /.../messages/{id}
    pub async fn put_message(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        body: &str,
    ) -> Result<MessageResponse, ApiError> {
        let request = self
            .request(Method::PUT, &routes::message(key, self.me(), id))
            .json(&EditMessageRequest {
                message: body.to_owned(),
            });
        self.fetch(request).await
    }

    /// DELETE /.../messages/{id}
    pub async fn remove_message(&self, key: &ConversationKey, id: &MessageId) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &routes::message(key, self.me(), id));
        self.execute(request).await?;
        info!("Message {} deleted from {}", id, key);
        Ok(())
    }
}
