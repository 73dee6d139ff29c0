#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{Semaphore, mpsc};

use parley_api::{ApiError, Draft, MessageApi};
use parley_gateway::{Backoff, EventBus, GatewayError, Link, Peer, Transport};
use parley_sync::{ConversationSession, ConversationView, SyncEngine};
use parley_types::api::{Credential, MessageResponse, ReactionResponse, RemovedMessage};
use parley_types::events::PushEvent;
use parley_types::{ChannelId, ConversationKey, MessageId, UserId, WorkspaceId};

pub const ME: &str = "alice";
pub const PEER: &str = "bob";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn direct(author: &str, to: &str, id: &str, body: &str, secs: i64) -> MessageResponse {
    MessageResponse {
        id: MessageId::from(id),
        body: body.into(),
        author_id: UserId::from(author),
        destination_user: Some(UserId::from(to)),
        destination_channel: None,
        is_public: false,
        created_at: at(secs),
        edited_at: None,
        file_url: None,
        reply_to: None,
        reactions: Vec::new(),
    }
}

pub fn in_channel(channel: &str, author: &str, id: &str, body: &str, secs: i64) -> MessageResponse {
    MessageResponse {
        destination_user: None,
        destination_channel: Some(ChannelId::from(channel)),
        is_public: true,
        ..direct(author, "", id, body, secs)
    }
}

pub fn reaction(id: &str, message: &str, emoji: &str, user: &str) -> ReactionResponse {
    ReactionResponse {
        id: id.into(),
        emoji: emoji.into(),
        user_id: UserId::from(user),
        message_id: Some(MessageId::from(message)),
    }
}

pub fn removed(id: &str) -> RemovedMessage {
    RemovedMessage {
        id: MessageId::from(id),
        author_id: None,
        destination_user: None,
        destination_channel: None,
    }
}

pub fn ids(view: &ConversationView) -> Vec<String> {
    view.messages.iter().map(|m| m.key.to_string()).collect()
}

// -- Fake REST backend --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Fetch,
    Send,
    Edit,
    Delete,
    AddReaction,
    RemoveReaction,
}

/// In-memory backend. Calls can be held at a gate until released, and made
/// to fail.
pub struct FakeApi {
    me: UserId,
    server: Mutex<Server>,
    gates: Mutex<HashMap<Op, Arc<Semaphore>>>,
    failing: Mutex<HashSet<Op>>,
    calls: Mutex<Vec<Op>>,
}

#[derive(Default)]
struct Server {
    messages: Vec<MessageResponse>,
    next_id: u64,
    next_reaction: u64,
}

impl FakeApi {
    pub fn new(me: &str) -> Self {
        Self {
            me: UserId::from(me),
            server: Mutex::default(),
            gates: Mutex::default(),
            failing: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub fn seed(&self, message: MessageResponse) {
        self.server.lock().unwrap().messages.push(message);
    }

    pub fn remove_on_server(&self, id: &str) {
        self.server
            .lock()
            .unwrap()
            .messages
            .retain(|m| m.id.as_str() != id);
    }

    pub fn server_message(&self, id: &str) -> Option<MessageResponse> {
        self.server
            .lock()
            .unwrap()
            .messages
            .iter()
            .find(|m| m.id.as_str() == id)
            .cloned()
    }

    /// Id the next send will be assigned.
    pub fn next_message_id(&self) -> String {
        format!("m{}", self.server.lock().unwrap().next_id + 1)
    }

    /// Holds every call of `op` until `release`.
    pub fn hold(&self, op: Op) {
        self.gates
            .lock()
            .unwrap()
            .insert(op, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, op: Op) {
        if let Some(gate) = self.gates.lock().unwrap().remove(&op) {
            gate.add_permits(1_000);
        }
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn heal(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    pub fn calls(&self) -> Vec<Op> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().into_iter().filter(|c| *c == op).count()
    }

    async fn enter(&self, op: Op) -> Result<(), ApiError> {
        self.calls.lock().unwrap().push(op);
        let gate = self.gates.lock().unwrap().get(&op).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing.lock().unwrap().contains(&op) {
            return Err(ApiError::Status {
                status: 500,
                body: "injected failure".into(),
            });
        }
        Ok(())
    }
}

fn not_found() -> ApiError {
    ApiError::Status {
        status: 404,
        body: "not found".into(),
    }
}

#[async_trait]
impl MessageApi for FakeApi {
    fn me(&self) -> &UserId {
        &self.me
    }

    async fn fetch_channel_messages(
        &self,
        _workspace: &WorkspaceId,
        channel: &ChannelId,
    ) -> Result<Vec<MessageResponse>, ApiError> {
        self.enter(Op::Fetch).await?;
        let server = self.server.lock().unwrap();
        Ok(server
            .messages
            .iter()
            .filter(|m| m.destination_channel.as_ref() == Some(channel))
            .cloned()
            .collect())
    }

    async fn fetch_user_messages(&self, user: &UserId) -> Result<Vec<MessageResponse>, ApiError> {
        self.enter(Op::Fetch).await?;
        let server = self.server.lock().unwrap();
        Ok(server
            .messages
            .iter()
            .filter(|m| m.destination_user.as_ref() == Some(user))
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        key: &ConversationKey,
        draft: &Draft,
    ) -> Result<MessageResponse, ApiError> {
        self.enter(Op::Send).await?;
        let mut server = self.server.lock().unwrap();
        server.next_id += 1;
        let n = server.next_id;
        let id = format!("m{}", n);
        let mut created = match key {
            ConversationKey::Channel { channel, .. } => {
                in_channel(channel.as_str(), self.me.as_str(), &id, &draft.body, 1_000 + n as i64)
            }
            ConversationKey::Direct(pair) => direct(
                self.me.as_str(),
                pair.peer_of(&self.me).as_str(),
                &id,
                &draft.body,
                1_000 + n as i64,
            ),
        };
        created.file_url = draft.attachment.clone();
        created.reply_to = draft.reply_to.clone();
        server.messages.push(created.clone());
        Ok(created)
    }

    async fn edit_message(
        &self,
        _key: &ConversationKey,
        id: &MessageId,
        body: &str,
    ) -> Result<MessageResponse, ApiError> {
        self.enter(Op::Edit).await?;
        let mut server = self.server.lock().unwrap();
        let message = server
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(not_found)?;
        message.body = body.to_owned();
        message.edited_at = Some(at(5_000));
        Ok(message.clone())
    }

    async fn delete_message(&self, _key: &ConversationKey, id: &MessageId) -> Result<(), ApiError> {
        self.enter(Op::Delete).await?;
        let mut server = self.server.lock().unwrap();
        let before = server.messages.len();
        server.messages.retain(|m| &m.id != id);
        if server.messages.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn add_reaction(
        &self,
        _key: &ConversationKey,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionResponse, ApiError> {
        self.enter(Op::AddReaction).await?;
        let mut server = self.server.lock().unwrap();
        server.next_reaction += 1;
        let created = reaction(
            &format!("r{}", server.next_reaction),
            id.as_str(),
            emoji,
            self.me.as_str(),
        );
        let message = server
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(not_found)?;
        message.reactions.push(created.clone());
        Ok(created)
    }

    async fn remove_reaction(
        &self,
        _key: &ConversationKey,
        id: &MessageId,
        reaction: &parley_types::ReactionId,
    ) -> Result<(), ApiError> {
        self.enter(Op::RemoveReaction).await?;
        let mut server = self.server.lock().unwrap();
        let message = server
            .messages
            .iter_mut()
            .find(|m| &m.id == id)
            .ok_or_else(not_found)?;
        message.reactions.retain(|r| &r.id != reaction);
        Ok(())
    }
}

// -- Fake realtime transport --

pub struct FakeTransport {
    refuse: AtomicU32,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            refuse: AtomicU32::new(0),
            peers,
        });
        (transport, rx)
    }

    /// Refuses the next `n` connection attempts.
    pub fn refuse(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _credential: &Credential) -> Result<Link, GatewayError> {
        if self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GatewayError::Unavailable("connection refused".into()));
        }
        let (link, peer) = Link::pair();
        let _ = self.peers.send(peer);
        Ok(link)
    }
}

// -- Harness --

pub struct Harness {
    pub engine: SyncEngine,
    pub api: Arc<FakeApi>,
    pub transport: Arc<FakeTransport>,
    peers: mpsc::UnboundedReceiver<Peer>,
    server: Option<Peer>,
}

impl Harness {
    /// An engine for `ME` whose bus is connected to a fake server.
    pub async fn connected() -> Self {
        let api = Arc::new(FakeApi::new(ME));
        let (transport, mut peers) = FakeTransport::new();
        let bus = EventBus::new(
            transport.clone(),
            Backoff {
                base: Duration::from_millis(50),
                ceiling: Duration::from_secs(1),
                max_attempts: 5,
                jitter: false,
            },
        );
        bus.connect(Credential::bearer("token")).await.unwrap();
        let server = peers.recv().await;

        Self {
            engine: SyncEngine::new(bus, api.clone()),
            api,
            transport,
            peers,
            server,
        }
    }

    pub fn push(&self, event: PushEvent) {
        let frame = serde_json::to_string(&event).unwrap();
        self.server
            .as_ref()
            .expect("no live link")
            .to_client
            .send(frame)
            .unwrap();
    }

    /// Server side drops the realtime connection.
    pub fn drop_link(&mut self) {
        self.server = None;
    }

    /// Waits for the client to reconnect and adopts the new link.
    pub async fn accept(&mut self) {
        self.server = self.peers.recv().await;
    }

    /// Returns once every event pushed so far has been applied to `session`:
    /// a marker message is pushed after them, observed, then removed again.
    pub async fn flush(&self, session: &ConversationSession) {
        static MARKERS: AtomicU64 = AtomicU64::new(0);
        let id = format!("marker-{}", MARKERS.fetch_add(1, Ordering::Relaxed));
        let me = UserId::from(ME);
        let marker = match session.key() {
            ConversationKey::Channel { channel, .. } => {
                in_channel(channel.as_str(), PEER, &id, "marker", 999_999)
            }
            ConversationKey::Direct(pair) => {
                direct(pair.peer_of(&me).as_str(), ME, &id, "marker", 999_999)
            }
        };

        self.push(PushEvent::MessageCreated(marker));
        until(session, |v| ids(v).contains(&id)).await;
        self.push(PushEvent::MessageRemoved(removed(&id)));
        until(session, |v| !ids(v).contains(&id)).await;
    }
}

/// Waits until the session's view satisfies `pred`.
pub async fn until(
    session: &ConversationSession,
    pred: impl FnMut(&ConversationView) -> bool,
) -> ConversationView {
    let mut view = session.watch();
    tokio::time::timeout(Duration::from_secs(10), view.wait_for(pred))
        .await
        .expect("timed out waiting for the conversation view")
        .expect("conversation closed")
        .clone()
}
