use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use parley_types::api::{Credential, MessageResponse, ReactionResponse};
use parley_types::{ChannelId, ConversationKey, MessageId, ReactionId, UserId, WorkspaceId};

use crate::error::ApiError;
use crate::{Draft, MessageApi};

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// REST client for the messaging backend, authenticated as one user.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credential: Credential,
    me: UserId,
}

impl ApiClient {
    pub fn new(config: ApiConfig, credential: Credential, me: UserId) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            credential,
            me,
        })
    }

    /// The user this client acts as.
    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .header(AUTHORIZATION, self.credential.header_value())
    }

    /// Sends the request and decodes a JSON body.
    pub(crate) async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = Self::check(request.send().await?).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Sends the request and ignores whatever body comes back.
    pub(crate) async fn execute(&self, request: RequestBuilder) -> Result<(), ApiError> {
        Self::check(request.send().await?).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let url = response.url().to_string();
        let body = response.text().await.unwrap_or_default();
        warn!("{} returned {}: {}", url, status, body);
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessageApi for ApiClient {
    fn me(&self) -> &UserId {
        &self.me
    }

    async fn fetch_channel_messages(
        &self,
        workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Vec<MessageResponse>, ApiError> {
        self.list_channel_messages(workspace, channel).await
    }

    async fn fetch_user_messages(&self, user: &UserId) -> Result<Vec<MessageResponse>, ApiError> {
        self.list_user_messages(user).await
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        draft: &Draft,
    ) -> Result<MessageResponse, ApiError> {
        self.post_message(key, draft).await
    }

    async fn edit_message(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        body: &str,
    ) -> Result<MessageResponse, ApiError> {
        self.put_message(key, id, body).await
    }

    async fn delete_message(&self, key: &ConversationKey, id: &MessageId) -> Result<(), ApiError> {
        self.remove_message(key, id).await
    }

    async fn add_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionResponse, ApiError> {
        self.post_reaction(key, id, emoji).await
    }

    async fn remove_reaction(
        &self,
        key: &ConversationKey,
        id: &MessageId,
        reaction: &ReactionId,
    ) -> Result<(), ApiError> {
        self.delete_reaction(key, id, reaction).await
    }
}
