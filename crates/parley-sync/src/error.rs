use parley_api::ApiError;
use parley_gateway::GatewayError;
use parley_types::{ConversationKey, MessageKey, PendingId};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The realtime connection could not be (re)established. Not fatal: the
    /// next explicit connect starts over.
    #[error("realtime connection unavailable: {0}")]
    Connection(#[from] GatewayError),

    /// A REST call backing an optimistic change failed. For sends the
    /// message stays in the view as failed under `pending_id`.
    #[error("request rejected: {source}")]
    SendFailed {
        pending_id: Option<PendingId>,
        #[source]
        source: ApiError,
    },

    #[error("failed to fetch conversation history: {0}")]
    Fetch(#[source] ApiError),

    #[error("message {0} not found")]
    NotFound(MessageKey),

    #[error("{0} is not a conversation of the current user")]
    NotParticipant(ConversationKey),

    #[error("conversation session closed")]
    SessionClosed,
}
