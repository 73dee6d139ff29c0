pub mod api;
pub mod events;
pub mod ids;
pub mod models;

pub use ids::{ChannelId, MessageId, PendingId, ReactionId, UserId, WorkspaceId};
pub use models::{
    ConversationKey, DirectPair, Message, MessageKey, MessageStatus, Reaction, ReactionOp,
    ReactionSet,
};
