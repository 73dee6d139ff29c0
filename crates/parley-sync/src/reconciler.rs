use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use parley_api::{ApiError, Draft, MessageApi};
use parley_gateway::{BusSignal, EventBus, Subscription};
use parley_types::api::{MessageResponse, ReactionResponse};
use parley_types::events::{EventKind, PushEvent};
use parley_types::{
    ConversationKey, Message, MessageId, MessageKey, MessageStatus, PendingId, Reaction, ReactionOp,
    UserId,
};

use crate::error::SyncError;
use crate::store::MessageStore;

pub(crate) type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// What a conversation looks like right now.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationView {
    /// Confirmed, pending and failed messages in display order.
    pub messages: Vec<Message>,
    /// Set once the first history fetch has been merged.
    pub loaded: bool,
}

// -- Commands --

pub(crate) enum Command {
    Send {
        draft: Draft,
        reply: Reply<Message>,
    },
    Retry {
        pending_id: PendingId,
        reply: Reply<Message>,
    },
    Discard {
        pending_id: PendingId,
        reply: Reply<()>,
    },
    Edit {
        id: MessageId,
        body: String,
        reply: Reply<Message>,
    },
    Delete {
        id: MessageId,
        reply: Reply<()>,
    },
    ToggleReaction {
        id: MessageId,
        emoji: String,
        reply: Reply<()>,
    },
    Refresh {
        reply: Reply<()>,
    },
    Push(PushEvent),
    Completed(Completion),
    Shutdown,
}

/// A REST call finished. Posted back to the inbox so the store is only ever
/// touched from the reconciler task.
pub(crate) enum Completion {
    Fetched {
        generation: u64,
        mark: u64,
        result: Result<Vec<MessageResponse>, ApiError>,
        reply: Option<Reply<()>>,
    },
    Sent {
        pending_id: PendingId,
        result: Result<MessageResponse, ApiError>,
        reply: Reply<Message>,
    },
    Edited {
        id: MessageId,
        /// The body the edit asked for.
        body: String,
        previous: Message,
        result: Result<MessageResponse, ApiError>,
        reply: Reply<Message>,
    },
    Deleted {
        previous: Message,
        result: Result<(), ApiError>,
        reply: Reply<()>,
    },
    Reacted {
        id: MessageId,
        emoji: String,
        /// The reaction a remove took away, `None` for an add.
        previous: Option<Reaction>,
        result: Result<Option<ReactionResponse>, ApiError>,
        reply: Reply<()>,
    },
}

impl Completion {
    /// Answers the caller directly once the conversation has been closed.
    /// The network call already happened; only the store update is skipped.
    fn abandon(self, key: &ConversationKey) {
        match self {
            Self::Fetched { reply, .. } => {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(SyncError::SessionClosed));
                }
            }
            Self::Sent {
                pending_id,
                result,
                reply,
            } => {
                let _ = reply.send(
                    result
                        .map(|resp| Message::confirmed(resp, key.clone()))
                        .map_err(|source| SyncError::SendFailed {
                            pending_id: Some(pending_id),
                            source,
                        }),
                );
            }
            Self::Edited { result, reply, .. } => {
                let _ = reply.send(
                    result
                        .map(|resp| Message::confirmed(resp, key.clone()))
                        .map_err(rejected),
                );
            }
            Self::Deleted { result, reply, .. } => {
                let _ = reply.send(result.map_err(rejected));
            }
            Self::Reacted { result, reply, .. } => {
                let _ = reply.send(result.map(|_| ()).map_err(rejected));
            }
        }
    }
}

fn rejected(source: ApiError) -> SyncError {
    SyncError::SendFailed {
        pending_id: None,
        source,
    }
}

// -- Handle --

/// Sending side of one reconciler plus its published view.
#[derive(Clone)]
pub(crate) struct ReconcilerHandle {
    tx: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<ConversationView>,
}

impl ReconcilerHandle {
    pub(crate) async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .map_err(|_| SyncError::SessionClosed)?;
        rx.await.map_err(|_| SyncError::SessionClosed)?
    }

    pub(crate) fn view(&self) -> &watch::Receiver<ConversationView> {
        &self.view
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    pub(crate) fn same_as(&self, other: &ReconcilerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// Starts the reconciler task for `key`: subscribes to the bus, then issues
/// the initial history fetch.
pub(crate) fn spawn(
    bus: &EventBus,
    api: Arc<dyn MessageApi>,
    me: UserId,
    key: ConversationKey,
) -> ReconcilerHandle {
    let (tx, inbox) = mpsc::unbounded_channel();
    let (view_tx, view) = watch::channel(ConversationView::default());

    // Subscribe before fetching so nothing pushed during the fetch is lost.
    let signals = bus.signals();
    let subscriptions = EventKind::ALL
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            let key = key.clone();
            bus.subscribe(kind, move |event| {
                if event.concerns(&key) {
                    let _ = tx.send(Command::Push(event.clone()));
                }
            })
        })
        .collect();

    let reconciler = Reconciler {
        key,
        me,
        api,
        store: MessageStore::new(),
        view_tx,
        tx: tx.clone(),
        inbox,
        signals: Some(signals),
        _subscriptions: subscriptions,
        loaded: false,
        fetch_generation: 0,
        applied_generation: 0,
        toggles: HashMap::new(),
    };
    tokio::spawn(reconciler.run());

    ReconcilerHandle { tx, view }
}

// -- Reconciler --

/// Owns one conversation's store. Push events, caller commands and REST
/// completions all arrive through one inbox and are applied in order.
struct Reconciler {
    key: ConversationKey,
    me: UserId,
    api: Arc<dyn MessageApi>,
    store: MessageStore,
    view_tx: watch::Sender<ConversationView>,
    tx: mpsc::UnboundedSender<Command>,
    inbox: mpsc::UnboundedReceiver<Command>,
    signals: Option<broadcast::Receiver<BusSignal>>,
    _subscriptions: Vec<Subscription>,
    loaded: bool,
    fetch_generation: u64,
    applied_generation: u64,
    /// In-flight reaction toggles and the callers queued behind them.
    toggles: HashMap<(MessageId, String), VecDeque<Reply<()>>>,
}

impl Reconciler {
    async fn run(mut self) {
        info!("Opened conversation {}", self.key);
        self.start_fetch(None);

        loop {
            tokio::select! {
                command = self.inbox.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                signal = next_signal(&mut self.signals) => self.on_signal(signal),
            }
        }

        self.shutdown();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Send { draft, reply } => self.send(draft, reply),
            Command::Retry { pending_id, reply } => self.retry(pending_id, reply),
            Command::Discard { pending_id, reply } => {
                let result = match self.store.remove_pending(pending_id) {
                    Some(_) => {
                        self.publish();
                        Ok(())
                    }
                    None => Err(SyncError::NotFound(MessageKey::Pending(pending_id))),
                };
                let _ = reply.send(result);
            }
            Command::Edit { id, body, reply } => self.edit(id, body, reply),
            Command::Delete { id, reply } => self.delete(id, reply),
            Command::ToggleReaction { id, emoji, reply } => self.toggle_reaction(id, emoji, reply),
            Command::Refresh { reply } => self.start_fetch(Some(reply)),
            Command::Push(event) => self.apply_event(event),
            Command::Completed(completion) => self.complete(completion),
            Command::Shutdown => {}
        }
    }

    fn on_signal(&mut self, signal: Result<BusSignal, RecvError>) {
        match signal {
            Ok(BusSignal::Resynced) => {
                info!("Resyncing {} after reconnect", self.key);
                self.start_fetch(None);
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!("Missed {} bus signals for {}, resyncing", missed, self.key);
                self.start_fetch(None);
            }
            Err(RecvError::Closed) => {
                debug!("Event bus gone, {} stops listening for resyncs", self.key);
                self.signals = None;
            }
        }
    }

    fn shutdown(mut self) {
        // Calls still in flight answer their callers themselves from here on.
        self.inbox.close();
        while let Ok(command) = self.inbox.try_recv() {
            if let Command::Completed(completion) = command {
                completion.abandon(&self.key);
            }
        }
        info!("Closed conversation {}", self.key);
    }

    fn publish(&self) {
        self.view_tx.send_replace(ConversationView {
            messages: self.store.snapshot(),
            loaded: self.loaded,
        });
    }

    /// Runs a REST call off the reconciler task and posts its completion back.
    fn spawn_call<F>(&self, call: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.tx.clone();
        let key = self.key.clone();
        tokio::spawn(async move {
            let completion = call.await;
            if let Err(mpsc::error::SendError(Command::Completed(orphan))) =
                tx.send(Command::Completed(completion))
            {
                orphan.abandon(&key);
            }
        });
    }

    fn complete(&mut self, completion: Completion) {
        match completion {
            Completion::Fetched {
                generation,
                mark,
                result,
                reply,
            } => {
                let outcome = self.merge_history(generation, mark, result);
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            Completion::Sent {
                pending_id,
                result,
                reply,
            } => {
                let _ = reply.send(self.resolve_send(pending_id, result));
            }
            Completion::Edited {
                id,
                body,
                previous,
                result,
                reply,
            } => {
                let _ = reply.send(self.resolve_edit(id, &body, previous, result));
            }
            Completion::Deleted {
                previous,
                result,
                reply,
            } => {
                let _ = reply.send(self.resolve_delete(previous, result));
            }
            Completion::Reacted {
                id,
                emoji,
                previous,
                result,
                reply,
            } => {
                let outcome = self.resolve_toggle(&id, &emoji, previous, result);
                let _ = reply.send(outcome);
                self.next_toggle(id, emoji);
            }
        }
    }

    // -- History --

    fn start_fetch(&mut self, reply: Option<Reply<()>>) {
        self.fetch_generation += 1;
        let generation = self.fetch_generation;
        let mark = self.store.mark();
        let api = self.api.clone();
        let key = self.key.clone();
        let me = self.me.clone();
        debug!("Fetching history for {} (generation {})", key, generation);

        self.spawn_call(async move {
            let result = fetch_history(api.as_ref(), &key, &me).await;
            Completion::Fetched {
                generation,
                mark,
                result,
                reply,
            }
        });
    }

    fn merge_history(
        &mut self,
        generation: u64,
        mark: u64,
        result: Result<Vec<MessageResponse>, ApiError>,
    ) -> Result<(), SyncError> {
        let history = match result {
            Ok(history) => history,
            Err(e) => {
                warn!("Failed to fetch history for {}: {}", self.key, e);
                return Err(SyncError::Fetch(e));
            }
        };

        if generation < self.applied_generation {
            debug!("Dropping stale history for {} (generation {})", self.key, generation);
            return Ok(());
        }
        self.applied_generation = generation;

        let mut present = HashSet::with_capacity(history.len());
        let mut merged = 0usize;
        for resp in history {
            present.insert(resp.id.clone());
            if self
                .store
                .merge_fetched(Message::confirmed(resp, self.key.clone()), mark)
                .changed()
            {
                merged += 1;
            }
        }
        let pruned = self.store.prune_missing(&present, mark);

        if !self.loaded {
            self.loaded = true;
            info!("Loaded {} messages for {}", present.len(), self.key);
        } else {
            debug!(
                "Resynced {}: {} merged, {} pruned",
                self.key,
                merged,
                pruned.len()
            );
        }
        self.publish();
        Ok(())
    }

    // -- Push events --

    fn apply_event(&mut self, event: PushEvent) {
        let kind = event.kind();
        let changed = match event {
            // Already known from REST or an earlier push.
            PushEvent::MessageCreated(resp) if self.store.contains(&resp.id) => false,
            PushEvent::MessageCreated(resp) => {
                let message = Message::confirmed(resp, self.key.clone());
                match self.own_echo(&message) {
                    Some(pending_id) => {
                        debug!("{} confirmed by push as {:?} in {}", pending_id, message.id(), self.key);
                        self.store.resolve_pending(pending_id, message).changed()
                    }
                    None => self.store.upsert(message).changed(),
                }
            }
            PushEvent::MessageUpdated(resp) => match self.store.get(&resp.id) {
                Some(existing) => {
                    let updated = with_update(existing, resp);
                    self.store.upsert(updated).changed()
                }
                None => {
                    debug!("Ignoring update for unknown message {} in {}", resp.id, self.key);
                    false
                }
            },
            PushEvent::MessageRemoved(removed) => self.store.remove(&removed.id).is_some(),
            PushEvent::ReactionAdded(resp) => self.apply_pushed_reaction(resp, ReactionOp::Add),
            PushEvent::ReactionRemoved(resp) => self.apply_pushed_reaction(resp, ReactionOp::Remove),
        };

        trace!("Applied {} to {} (changed: {})", kind, self.key, changed);
        if changed {
            self.publish();
        }
    }

    /// The pending send a pushed message of ours confirms, if it beat the
    /// REST reply here.
    fn own_echo(&self, message: &Message) -> Option<PendingId> {
        if message.author_id != self.me {
            return None;
        }
        self.store.pending_match(message)
    }

    fn apply_pushed_reaction(&mut self, resp: ReactionResponse, op: ReactionOp) -> bool {
        let Some(message_id) = resp.message_id.clone() else {
            debug!("Dropping reaction {} without a message id", resp.id);
            return false;
        };
        self.store.apply_reaction(&message_id, Reaction::from(resp), op)
    }

    // -- Sends --

    fn send(&mut self, draft: Draft, reply: Reply<Message>) {
        let pending_id = PendingId::generate();
        self.store.upsert_pending(Message::pending(
            pending_id,
            self.key.clone(),
            self.me.clone(),
            draft.body.clone(),
            draft.attachment.clone(),
            draft.reply_to.clone(),
        ));
        self.publish();
        debug!("Sending {} to {}", pending_id, self.key);
        self.submit(pending_id, draft, reply);
    }

    fn retry(&mut self, pending_id: PendingId, reply: Reply<Message>) {
        let draft = match self.store.get_pending(pending_id) {
            Some(message) if message.status == MessageStatus::Failed => Draft {
                body: message.body.clone(),
                attachment: message.attachment.clone(),
                reply_to: message.reply_to.clone(),
            },
            _ => {
                let _ = reply.send(Err(SyncError::NotFound(MessageKey::Pending(pending_id))));
                return;
            }
        };
        self.store.set_pending_status(pending_id, MessageStatus::Pending);
        self.publish();
        info!("Retrying {} in {}", pending_id, self.key);
        self.submit(pending_id, draft, reply);
    }

    fn submit(&self, pending_id: PendingId, draft: Draft, reply: Reply<Message>) {
        let api = self.api.clone();
        let key = self.key.clone();
        self.spawn_call(async move {
            let result = api.send_message(&key, &draft).await;
            Completion::Sent {
                pending_id,
                result,
                reply,
            }
        });
    }

    fn resolve_send(
        &mut self,
        pending_id: PendingId,
        result: Result<MessageResponse, ApiError>,
    ) -> Result<Message, SyncError> {
        match result {
            Ok(resp) => {
                let id = resp.id.clone();
                let confirmed = Message::confirmed(resp, self.key.clone());
                self.store.resolve_pending(pending_id, confirmed.clone());
                self.publish();
                debug!("{} confirmed as {} in {}", pending_id, id, self.key);
                Ok(self.store.get(&id).cloned().unwrap_or(confirmed))
            }
            Err(e) => {
                warn!("Send {} to {} failed: {}", pending_id, self.key, e);
                if self.store.mark_failed(pending_id) {
                    self.publish();
                }
                Err(SyncError::SendFailed {
                    pending_id: Some(pending_id),
                    source: e,
                })
            }
        }
    }

    // -- Edits and deletes --

    fn edit(&mut self, id: MessageId, body: String, reply: Reply<Message>) {
        let Some(previous) = self.store.get(&id).cloned() else {
            let _ = reply.send(Err(SyncError::NotFound(MessageKey::Confirmed(id))));
            return;
        };

        let mut optimistic = previous.clone();
        optimistic.body = body.clone();
        optimistic.edited_at = Some(Utc::now());
        self.store.upsert(optimistic);
        self.publish();

        let api = self.api.clone();
        let key = self.key.clone();
        self.spawn_call(async move {
            let result = api.edit_message(&key, &id, &body).await;
            Completion::Edited {
                id,
                body,
                previous,
                result,
                reply,
            }
        });
    }

    fn resolve_edit(
        &mut self,
        id: MessageId,
        body: &str,
        previous: Message,
        result: Result<MessageResponse, ApiError>,
    ) -> Result<Message, SyncError> {
        let Some(current) = self.store.get(&id) else {
            // Removed while the edit was in flight.
            return result
                .map(|resp| Message::confirmed(resp, self.key.clone()))
                .map_err(rejected);
        };

        match result {
            Ok(resp) => {
                let updated = with_update(current, resp);
                self.store.upsert(updated.clone());
                self.publish();
                Ok(updated)
            }
            Err(e) => {
                // A pushed update since the optimistic edit is newer than both.
                if current.body != body {
                    warn!("Edit of {} in {} failed, keeping newer server copy: {}", id, self.key, e);
                    return Err(rejected(e));
                }
                warn!("Edit of {} in {} failed, rolling back: {}", id, self.key, e);
                let mut restored = current.clone();
                restored.body = previous.body;
                restored.edited_at = previous.edited_at;
                if self.store.upsert(restored).changed() {
                    self.publish();
                }
                Err(rejected(e))
            }
        }
    }

    fn delete(&mut self, id: MessageId, reply: Reply<()>) {
        let Some(previous) = self.store.remove(&id) else {
            let _ = reply.send(Err(SyncError::NotFound(MessageKey::Confirmed(id))));
            return;
        };
        self.publish();

        let api = self.api.clone();
        let key = self.key.clone();
        self.spawn_call(async move {
            let result = api.delete_message(&key, &id).await;
            Completion::Deleted {
                previous,
                result,
                reply,
            }
        });
    }

    fn resolve_delete(&mut self, previous: Message, result: Result<(), ApiError>) -> Result<(), SyncError> {
        let Err(e) = result else {
            return Ok(());
        };
        let id = previous.id().cloned();
        warn!(
            "Delete of {} in {} failed, restoring: {}",
            previous.key, self.key, e
        );
        if id.is_some_and(|id| !self.store.contains(&id)) {
            self.store.upsert(previous);
            self.publish();
        }
        Err(rejected(e))
    }

    // -- Reactions --

    fn toggle_reaction(&mut self, id: MessageId, emoji: String, reply: Reply<()>) {
        match self.toggles.get_mut(&(id.clone(), emoji.clone())) {
            Some(queue) => {
                trace!("Queueing toggle of {} on {}", emoji, id);
                queue.push_back(reply);
            }
            None => self.start_toggle(id, emoji, reply),
        }
    }

    /// Flips the current user's `emoji` reaction on `id`. Registers the
    /// toggle as in flight unless it failed before reaching the network.
    fn start_toggle(&mut self, id: MessageId, emoji: String, reply: Reply<()>) {
        let Some(message) = self.store.get(&id) else {
            let _ = reply.send(Err(SyncError::NotFound(MessageKey::Confirmed(id))));
            return;
        };
        let existing = message.reactions.get(&emoji, &self.me).cloned();
        let api = self.api.clone();
        let key = self.key.clone();

        match existing {
            Some(reaction) => {
                let Some(reaction_id) = reaction.id.clone() else {
                    let _ = reply.send(Err(SyncError::NotFound(MessageKey::Confirmed(id))));
                    return;
                };
                self.store.apply_reaction(&id, reaction.clone(), ReactionOp::Remove);
                self.toggles.insert((id.clone(), emoji.clone()), VecDeque::new());
                self.publish();

                self.spawn_call(async move {
                    let result = api.remove_reaction(&key, &id, &reaction_id).await;
                    Completion::Reacted {
                        id,
                        emoji,
                        previous: Some(reaction),
                        result: result.map(|()| None),
                        reply,
                    }
                });
            }
            None => {
                self.store.apply_reaction(
                    &id,
                    Reaction::new(emoji.clone(), self.me.clone()),
                    ReactionOp::Add,
                );
                self.toggles.insert((id.clone(), emoji.clone()), VecDeque::new());
                self.publish();

                self.spawn_call(async move {
                    let result = api.add_reaction(&key, &id, &emoji).await;
                    Completion::Reacted {
                        id,
                        emoji,
                        previous: None,
                        result: result.map(Some),
                        reply,
                    }
                });
            }
        }
    }

    fn resolve_toggle(
        &mut self,
        id: &MessageId,
        emoji: &str,
        previous: Option<Reaction>,
        result: Result<Option<ReactionResponse>, ApiError>,
    ) -> Result<(), SyncError> {
        match result {
            Ok(Some(created)) => {
                // Fills in the server id of the provisional reaction.
                if self.store.apply_reaction(id, Reaction::from(created), ReactionOp::Add) {
                    self.publish();
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Reaction {} on {} failed, rolling back: {}", emoji, id, e);
                let changed = match previous {
                    Some(removed) => self.store.apply_reaction(id, removed, ReactionOp::Add),
                    None => self.store.apply_reaction(
                        id,
                        Reaction::new(emoji, self.me.clone()),
                        ReactionOp::Remove,
                    ),
                };
                if changed {
                    self.publish();
                }
                Err(rejected(e))
            }
        }
    }

    /// Starts the next queued toggle for `(id, emoji)`, if any.
    fn next_toggle(&mut self, id: MessageId, emoji: String) {
        let slot = (id, emoji);
        let mut queue = self.toggles.remove(&slot).unwrap_or_default();
        let (id, emoji) = slot;

        while let Some(reply) = queue.pop_front() {
            self.start_toggle(id.clone(), emoji.clone(), reply);
            if let Some(in_flight) = self.toggles.get_mut(&(id.clone(), emoji.clone())) {
                in_flight.extend(queue);
                return;
            }
        }
    }
}

async fn next_signal(
    signals: &mut Option<broadcast::Receiver<BusSignal>>,
) -> Result<BusSignal, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Fetches a conversation's history in `created_at` order. Direct
/// conversations need both single-sided fetches, filtered to the pair.
async fn fetch_history(
    api: &dyn MessageApi,
    key: &ConversationKey,
    me: &UserId,
) -> Result<Vec<MessageResponse>, ApiError> {
    let mut history = match key {
        ConversationKey::Channel { workspace, channel } => {
            api.fetch_channel_messages(workspace, channel).await?
        }
        ConversationKey::Direct(pair) => {
            let peer = pair.peer_of(me);
            let (to_me, to_peer) = tokio::try_join!(
                api.fetch_user_messages(me),
                api.fetch_user_messages(peer)
            )?;
            to_me
                .into_iter()
                .chain(to_peer)
                .filter(|msg| msg.belongs_to(key))
                .collect()
        }
    };
    history.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(history)
}

/// Applies an edit from the server onto the local copy. Reactions are
/// tracked separately and kept.
fn with_update(existing: &Message, resp: MessageResponse) -> Message {
    let mut updated = existing.clone();
    updated.body = resp.body;
    updated.attachment = resp.file_url;
    updated.reply_to = resp.reply_to;
    updated.created_at = resp.created_at;
    updated.edited_at = resp.edited_at;
    updated
}
