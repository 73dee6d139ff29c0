use reqwest::Method;

use parley_types::api::{CreateReactionRequest, ReactionResponse};
use parley_types::{ConversationKey, MessageId, ReactionId};

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::routes;

impl ApiClient {
    /// POST /.../messages/{id}/reactions
    pub async fn post_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionResponse, ApiError> {
        let request = self
            .request(Method::POST, &routes::reactions(key, self.me(), id))
            .json(&CreateReactionRequest {
                emoji: emoji.to_owned(),
                user_uuid: self.me().clone(),
                message_uuid: id.clone(),
            });
        self.fetch(request).await
    }

    /// DELETE /.../messages/{id}/reactions/{reaction}
    pub async fn delete_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        reaction: &ReactionId,
    ) -> Result<(), ApiError> {
        let request = self.request(Method::DELETE, &routes::reaction(key, self.me(), id, reaction));
        self.execute(request).await
    }
}
