use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

use parley_api::{Draft, MessageApi};
use parley_gateway::EventBus;
use parley_types::api::Credential;
use parley_types::{ChannelId, ConversationKey, Message, MessageId, PendingId, UserId, WorkspaceId};

use crate::error::SyncError;
use crate::reconciler::{self, Command, ConversationView, ReconcilerHandle};

/// Composition root of the sync layer: one event bus, one REST client and
/// the conversations currently open on top of them.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    bus: EventBus,
    api: Arc<dyn MessageApi>,
    me: UserId,
    sessions: Mutex<HashMap<ConversationKey, OpenConversation>>,
}

struct OpenConversation {
    handle: ReconcilerHandle,
    refs: usize,
}

impl SyncEngine {
    /// The engine acts as the user the REST client is authenticated as.
    pub fn new(bus: EventBus, api: Arc<dyn MessageApi>) -> Self {
        let me = api.me().clone();
        Self {
            inner: Arc::new(EngineInner {
                bus,
                api,
                me,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn me(&self) -> &UserId {
        &self.inner.me
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Connects the shared event bus. Safe to call again after a
    /// `Connection` error; each call starts a fresh retry budget.
    pub async fn connect(&self, credential: Credential) -> Result<(), SyncError> {
        self.inner.bus.connect(credential).await?;
        Ok(())
    }

    /// Opens a conversation, or joins it if it is already open. The
    /// conversation stays live until every session for it is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&self, key: ConversationKey) -> Result<ConversationSession, SyncError> {
        if let ConversationKey::Direct(pair) = &key {
            if !pair.contains(&self.inner.me) {
                return Err(SyncError::NotParticipant(key));
            }
        }

        let mut sessions = self.inner.sessions.lock().expect("sessions lock poisoned");
        let joined = sessions
            .get_mut(&key)
            .filter(|open| open.handle.is_alive())
            .map(|open| {
                open.refs += 1;
                open.handle.clone()
            });

        let handle = match joined {
            Some(handle) => {
                debug!("Joined open conversation {}", key);
                handle
            }
            None => {
                let handle = reconciler::spawn(
                    &self.inner.bus,
                    self.inner.api.clone(),
                    self.inner.me.clone(),
                    key.clone(),
                );
                sessions.insert(
                    key.clone(),
                    OpenConversation {
                        handle: handle.clone(),
                        refs: 1,
                    },
                );
                handle
            }
        };
        drop(sessions);

        Ok(ConversationSession {
            key,
            handle,
            engine: self.inner.clone(),
        })
    }

    pub fn open_channel(
        &self,
        workspace: impl Into<WorkspaceId>,
        channel: impl Into<ChannelId>,
    ) -> Result<ConversationSession, SyncError> {
        self.open(ConversationKey::channel(workspace, channel))
    }

    /// Opens the direct conversation between the current user and `peer`.
    pub fn open_direct(&self, peer: impl Into<UserId>) -> Result<ConversationSession, SyncError> {
        self.open(ConversationKey::direct(self.inner.me.clone(), peer))
    }

    /// Number of distinct conversations currently open.
    pub fn open_count(&self) -> usize {
        self.inner.sessions.lock().expect("sessions lock poisoned").len()
    }

    /// Closes every conversation and tears down the event bus. Outstanding
    /// sessions answer `SessionClosed` from then on.
    pub fn logout(&self) {
        let closed: Vec<OpenConversation> = self
            .inner
            .sessions
            .lock()
            .expect("sessions lock poisoned")
            .drain()
            .map(|(_, open)| open)
            .collect();
        for open in &closed {
            open.handle.shutdown();
        }
        self.inner.bus.disconnect();
        info!("Logged out, closed {} conversations", closed.len());
    }
}

impl EngineInner {
    fn release(&self, key: &ConversationKey, handle: &ReconcilerHandle) {
        let mut sessions = self.sessions.lock().expect("sessions lock poisoned");
        let Some(open) = sessions.get_mut(key) else {
            return;
        };
        // A logout may have replaced the conversation since this session opened.
        if !open.handle.same_as(handle) {
            return;
        }

        open.refs -= 1;
        if open.refs == 0 {
            if let Some(open) = sessions.remove(key) {
                open.handle.shutdown();
            }
            debug!("Last session for {} closed", key);
        }
    }
}

// -- Session --

/// One caller's view of a conversation. Dropping it (or calling `close`)
/// releases the conversation.
pub struct ConversationSession {
    key: ConversationKey,
    handle: ReconcilerHandle,
    engine: Arc<EngineInner>,
}

impl ConversationSession {
    pub fn key(&self) -> &ConversationKey {
        &self.key
    }

    /// Current messages in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.handle.view().borrow().messages.clone()
    }

    /// Live view of the conversation; changes whenever the message list does.
    pub fn watch(&self) -> watch::Receiver<ConversationView> {
        self.handle.view().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.view().borrow().loaded
    }

    /// Resolves once the first history fetch has been merged. A failed fetch
    /// leaves the conversation unloaded until `refresh` or the next resync
    /// succeeds.
    pub async fn loaded(&self) -> Result<(), SyncError> {
        let mut view = self.watch();
        view.wait_for(|view| view.loaded)
            .await
            .map(|_| ())
            .map_err(|_| SyncError::SessionClosed)
    }

    /// Sends a message. It shows up as pending right away and resolves to the
    /// confirmed message. On failure it stays visible as failed; see `retry`
    /// and `discard`.
    pub async fn send(
        &self,
        body: impl Into<String>,
        attachment: Option<String>,
    ) -> Result<Message, SyncError> {
        self.send_draft(Draft {
            body: body.into(),
            attachment,
            reply_to: None,
        })
        .await
    }

    /// Sends a message threaded under `to`.
    pub async fn reply(
        &self,
        to: MessageId,
        body: impl Into<String>,
        attachment: Option<String>,
    ) -> Result<Message, SyncError> {
        self.send_draft(Draft {
            body: body.into(),
            attachment,
            reply_to: Some(to),
        })
        .await
    }

    pub async fn send_draft(&self, draft: Draft) -> Result<Message, SyncError> {
        self.handle
            .request(|reply| Command::Send { draft, reply })
            .await
    }

    /// Re-sends a failed message under the same pending id.
    pub async fn retry(&self, pending_id: PendingId) -> Result<Message, SyncError> {
        self.handle
            .request(|reply| Command::Retry { pending_id, reply })
            .await
    }

    /// Drops a failed (or still pending) message from the view.
    pub async fn discard(&self, pending_id: PendingId) -> Result<(), SyncError> {
        self.handle
            .request(|reply| Command::Discard { pending_id, reply })
            .await
    }

    /// Edits a confirmed message. The new body shows immediately and is rolled
    /// back if the server rejects it.
    pub async fn edit(&self, id: &MessageId, body: impl Into<String>) -> Result<Message, SyncError> {
        let id = id.clone();
        let body = body.into();
        self.handle
            .request(|reply| Command::Edit { id, body, reply })
            .await
    }

    /// Deletes a confirmed message, restoring it if the server refuses.
    pub async fn delete_message(&self, id: &MessageId) -> Result<(), SyncError> {
        let id = id.clone();
        self.handle
            .request(|reply| Command::Delete { id, reply })
            .await
    }

    /// Adds the current user's `emoji` reaction, or removes it if present.
    /// Toggles on the same message and emoji run one after another.
    pub async fn toggle_reaction(&self, id: &MessageId, emoji: &str) -> Result<(), SyncError> {
        let id = id.clone();
        let emoji = emoji.to_owned();
        self.handle
            .request(|reply| Command::ToggleReaction { id, emoji, reply })
            .await
    }

    /// Re-fetches the history and merges it.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.handle
            .request(|reply| Command::Refresh { reply })
            .await
    }

    pub fn close(self) {}
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.engine.release(&self.key, &self.handle);
    }
}
