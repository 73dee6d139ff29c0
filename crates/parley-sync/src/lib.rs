//! Keeps a live, ordered view of each open conversation consistent across
//! the initial REST fetch, optimistic local changes and realtime pushes.

pub mod error;
pub mod reconciler;
pub mod session;
pub mod store;

pub use error::SyncError;
pub use parley_api::Draft;
pub use reconciler::ConversationView;
pub use session::{ConversationSession, SyncEngine};
pub use store::{MessageStore, Upsert};
