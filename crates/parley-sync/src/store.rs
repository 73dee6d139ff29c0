use std::collections::{HashMap, HashSet};

use parley_types::{Message, MessageId, MessageKey, MessageStatus, PendingId, Reaction, ReactionOp};

/// What an `upsert` did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Replaced,
    Unchanged,
}

impl Upsert {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

#[derive(Debug, Clone)]
struct Entry {
    message: Message,
    /// Insertion sequence, breaks `created_at` ties.
    seq: u64,
    /// Clock value when the message entered the store.
    inserted: u64,
    /// Clock value of the last local or pushed change, if any.
    modified: Option<u64>,
}

/// Ordered, deduplicated messages of one conversation.
///
/// Confirmed messages are keyed by server id, provisional ones by pending id;
/// a message lives in exactly one of the two maps. Every change ticks a
/// store-wide clock so a history fetch can tell which entries changed after
/// it was issued.
#[derive(Debug, Default)]
pub struct MessageStore {
    confirmed: HashMap<MessageId, Entry>,
    pending: HashMap<PendingId, Entry>,
    clock: u64,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a confirmed message or replaces the one with the same id. A
    /// replacement keeps its place unless `created_at` moved.
    pub fn upsert(&mut self, message: Message) -> Upsert {
        self.put(message, true)
    }

    /// Merges one message from a history fetch issued at `mark`. Entries
    /// changed since then are newer than the fetched copy and are left alone.
    pub fn merge_fetched(&mut self, message: Message, mark: u64) -> Upsert {
        let newer = message
            .id()
            .and_then(|id| self.confirmed.get(id))
            .and_then(|entry| entry.modified)
            .is_some_and(|modified| modified >= mark);
        if newer {
            return Upsert::Unchanged;
        }
        self.put(message, false)
    }

    fn put(&mut self, message: Message, touch: bool) -> Upsert {
        let MessageKey::Confirmed(id) = message.key.clone() else {
            return self.upsert_pending(message);
        };

        let now = self.tick();
        match self.confirmed.get_mut(&id) {
            Some(entry) if entry.message == message => Upsert::Unchanged,
            Some(entry) => {
                if entry.message.created_at != message.created_at {
                    entry.seq = now;
                }
                entry.message = message;
                if touch {
                    entry.modified = Some(now);
                }
                Upsert::Replaced
            }
            None => {
                self.confirmed.insert(id, Entry::new(message, now));
                Upsert::Inserted
            }
        }
    }

    /// Inserts or replaces a provisional message.
    pub fn upsert_pending(&mut self, message: Message) -> Upsert {
        let MessageKey::Pending(pending_id) = message.key else {
            return self.upsert(message);
        };

        let now = self.tick();
        match self.pending.get_mut(&pending_id) {
            Some(entry) if entry.message == message => Upsert::Unchanged,
            Some(entry) => {
                entry.message = message;
                entry.modified = Some(now);
                Upsert::Replaced
            }
            None => {
                self.pending.insert(pending_id, Entry::new(message, now));
                Upsert::Inserted
            }
        }
    }

    /// Swaps a provisional message for its confirmed version. When the
    /// confirmed id is already present (its push event won the race) the
    /// provisional entry is dropped and the existing message kept.
    pub fn resolve_pending(&mut self, pending_id: PendingId, confirmed: Message) -> Upsert {
        let provisional = self.pending.remove(&pending_id);
        let Some(id) = confirmed.id().cloned() else {
            return Upsert::Unchanged;
        };

        if self.confirmed.contains_key(&id) {
            return if provisional.is_some() {
                Upsert::Replaced
            } else {
                Upsert::Unchanged
            };
        }

        let now = self.tick();
        let mut entry = Entry::new(confirmed, now);
        // Take over the provisional slot so equal timestamps keep their order.
        if let Some(provisional) = provisional {
            entry.seq = provisional.seq;
        }
        self.confirmed.insert(id, entry);
        Upsert::Inserted
    }

    /// The oldest in-flight send that `confirmed` could be the server copy
    /// of: same author, body, attachment and reply target.
    pub fn pending_match(&self, confirmed: &Message) -> Option<PendingId> {
        self.pending
            .iter()
            .filter(|(_, entry)| {
                let pending = &entry.message;
                pending.status == MessageStatus::Pending
                    && pending.author_id == confirmed.author_id
                    && pending.body == confirmed.body
                    && pending.attachment == confirmed.attachment
                    && pending.reply_to == confirmed.reply_to
            })
            .min_by_key(|(_, entry)| entry.seq)
            .map(|(pending_id, _)| *pending_id)
    }

    pub fn set_pending_status(&mut self, pending_id: PendingId, status: MessageStatus) -> bool {
        let now = self.tick();
        match self.pending.get_mut(&pending_id) {
            Some(entry) if entry.message.status != status => {
                entry.message.status = status;
                entry.modified = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn mark_failed(&mut self, pending_id: PendingId) -> bool {
        self.set_pending_status(pending_id, MessageStatus::Failed)
    }

    pub fn remove_pending(&mut self, pending_id: PendingId) -> Option<Message> {
        self.pending.remove(&pending_id).map(|entry| entry.message)
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        self.confirmed.remove(id).map(|entry| entry.message)
    }

    /// Adds or removes one reaction on a confirmed message. Reactions for
    /// messages the store has not seen are dropped.
    pub fn apply_reaction(&mut self, id: &MessageId, reaction: Reaction, op: ReactionOp) -> bool {
        let now = self.tick();
        let Some(entry) = self.confirmed.get_mut(id) else {
            return false;
        };
        let reactions = &mut entry.message.reactions;
        let changed = match op {
            ReactionOp::Add => reactions.insert(reaction),
            ReactionOp::Remove => reactions
                .remove(&reaction.emoji, &reaction.user_id)
                .is_some(),
        };
        if changed {
            entry.modified = Some(now);
        }
        changed
    }

    /// Drops confirmed messages whose id is not in `present`, as long as they
    /// were inserted before `mark` and not changed since. Returns the removed
    /// ids.
    pub fn prune_missing(&mut self, present: &HashSet<MessageId>, mark: u64) -> Vec<MessageId> {
        let stale: Vec<MessageId> = self
            .confirmed
            .iter()
            .filter(|(id, entry)| {
                entry.inserted < mark
                    && entry.modified.is_none_or(|modified| modified < mark)
                    && !present.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.confirmed.remove(id);
        }
        stale
    }

    /// Current contents in display order: `created_at` ascending, then
    /// insertion order.
    pub fn snapshot(&self) -> Vec<Message> {
        let mut entries: Vec<&Entry> = self.confirmed.values().chain(self.pending.values()).collect();
        entries.sort_by(|a, b| {
            a.message
                .created_at
                .cmp(&b.message.created_at)
                .then(a.seq.cmp(&b.seq))
        });
        entries.into_iter().map(|entry| entry.message.clone()).collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.confirmed.get(id).map(|entry| &entry.message)
    }

    pub fn get_pending(&self, pending_id: PendingId) -> Option<&Message> {
        self.pending.get(&pending_id).map(|entry| &entry.message)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.confirmed.contains_key(id)
    }

    /// Clock value the next change will receive. Pass it to `merge_fetched`
    /// and `prune_missing` for a fetch issued now.
    pub fn mark(&self) -> u64 {
        self.clock
    }

    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tick(&mut self) -> u64 {
        let now = self.clock;
        self.clock += 1;
        now
    }
}

impl Entry {
    fn new(message: Message, now: u64) -> Self {
        Self {
            message,
            seq: now,
            inserted: now,
            modified: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use parley_types::api::MessageResponse;
    use parley_types::{ConversationKey, UserId};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn key() -> ConversationKey {
        ConversationKey::direct("alice", "bob")
    }

    fn confirmed(id: &str, body: &str, secs: i64) -> Message {
        Message::confirmed(
            MessageResponse {
                id: MessageId::from(id),
                body: body.into(),
                author_id: UserId::from("bob"),
                destination_user: Some(UserId::from("alice")),
                destination_channel: None,
                is_public: false,
                created_at: at(secs),
                edited_at: None,
                file_url: None,
                reply_to: None,
                reactions: Vec::new(),
            },
            key(),
        )
    }

    fn pending(body: &str) -> Message {
        Message::pending(
            PendingId::generate(),
            key(),
            UserId::from("alice"),
            body.into(),
            None,
            None,
        )
    }

    fn bodies(store: &MessageStore) -> Vec<String> {
        store.snapshot().into_iter().map(|m| m.body).collect()
    }

    #[test]
    fn repeated_upserts_keep_one_entry_with_the_last_version() {
        let mut store = MessageStore::new();
        assert_eq!(store.upsert(confirmed("m1", "first", 0)), Upsert::Inserted);
        assert_eq!(store.upsert(confirmed("m1", "second", 0)), Upsert::Replaced);
        assert_eq!(store.upsert(confirmed("m1", "second", 0)), Upsert::Unchanged);

        assert_eq!(store.len(), 1);
        assert_eq!(bodies(&store), ["second"]);
    }

    #[test]
    fn snapshot_orders_by_created_at_then_insertion() {
        let mut store = MessageStore::new();
        store.upsert(confirmed("m3", "late", 30));
        store.upsert(confirmed("m1", "tie-a", 10));
        store.upsert(confirmed("m2", "tie-b", 10));
        store.upsert(confirmed("m0", "early", 0));

        assert_eq!(bodies(&store), ["early", "tie-a", "tie-b", "late"]);
    }

    #[test]
    fn replacement_keeps_position_unless_timestamp_moves() {
        let mut store = MessageStore::new();
        store.upsert(confirmed("m1", "a", 10));
        store.upsert(confirmed("m2", "b", 10));

        store.upsert(confirmed("m1", "a edited", 10));
        assert_eq!(bodies(&store), ["a edited", "b"]);

        // Same timestamp as before, but now re-sequenced after m2.
        store.upsert(confirmed("m1", "a moved", 11));
        store.upsert(confirmed("m1", "a moved", 10));
        assert_eq!(bodies(&store), ["b", "a moved"]);
    }

    #[test]
    fn resolve_pending_replaces_the_provisional_entry() {
        let mut store = MessageStore::new();
        let provisional = pending("hi");
        let pending_id = provisional.pending_id().unwrap();
        store.upsert_pending(provisional);

        let outcome = store.resolve_pending(pending_id, confirmed("m1", "hi", 0));

        assert_eq!(outcome, Upsert::Inserted);
        assert_eq!(store.len(), 1);
        assert!(store.get_pending(pending_id).is_none());
        assert!(store.get(&MessageId::from("m1")).unwrap().is_confirmed());
    }

    #[test]
    fn resolve_pending_discards_when_push_arrived_first() {
        let mut store = MessageStore::new();
        let provisional = pending("hi");
        let pending_id = provisional.pending_id().unwrap();
        store.upsert_pending(provisional);
        store.upsert(confirmed("m1", "hi (from push)", 0));

        store.resolve_pending(pending_id, confirmed("m1", "hi", 0));

        assert_eq!(store.len(), 1);
        assert_eq!(bodies(&store), ["hi (from push)"]);
    }

    #[test]
    fn pending_match_finds_the_oldest_in_flight_copy() {
        let mut store = MessageStore::new();
        let other = pending("something else");
        let first = pending("hi");
        let second = pending("hi");
        let failed = pending("hi");
        let (first_id, failed_id) = (first.pending_id().unwrap(), failed.pending_id().unwrap());
        store.upsert_pending(failed);
        store.mark_failed(failed_id);
        store.upsert_pending(other);
        store.upsert_pending(first);
        store.upsert_pending(second);

        let mut echo = confirmed("m1", "hi", 0);
        echo.author_id = UserId::from("alice");
        assert_eq!(store.pending_match(&echo), Some(first_id));

        // Someone else saying the same thing is not our echo.
        assert_eq!(store.pending_match(&confirmed("m2", "hi", 0)), None);
    }

    #[test]
    fn failed_sends_are_retained() {
        let mut store = MessageStore::new();
        let provisional = pending("hi");
        let pending_id = provisional.pending_id().unwrap();
        store.upsert_pending(provisional);

        assert!(store.mark_failed(pending_id));
        assert!(!store.mark_failed(pending_id));
        assert_eq!(store.get_pending(pending_id).unwrap().status, MessageStatus::Failed);
        assert_eq!(store.len(), 1);

        assert!(store.remove_pending(pending_id).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn reactions_apply_once_and_only_to_known_messages() {
        let mut store = MessageStore::new();
        store.upsert(confirmed("m1", "hi", 0));
        let id = MessageId::from("m1");
        let thumbs = Reaction::new("👍", UserId::from("alice"));

        assert!(store.apply_reaction(&id, thumbs.clone(), ReactionOp::Add));
        assert!(!store.apply_reaction(&id, thumbs.clone(), ReactionOp::Add));
        assert_eq!(store.get(&id).unwrap().reactions.len(), 1);

        assert!(!store.apply_reaction(&MessageId::from("unseen"), thumbs.clone(), ReactionOp::Add));

        assert!(store.apply_reaction(&id, thumbs.clone(), ReactionOp::Remove));
        assert!(!store.apply_reaction(&id, thumbs, ReactionOp::Remove));
        assert!(store.get(&id).unwrap().reactions.is_empty());
    }

    #[test]
    fn prune_spares_entries_touched_after_the_mark() {
        let mut store = MessageStore::new();
        store.upsert(confirmed("kept", "a", 0));
        store.upsert(confirmed("deleted", "b", 1));
        store.upsert(confirmed("edited", "c", 2));
        let mark = store.mark();
        store.upsert(confirmed("arrived-later", "d", 3));
        store.upsert(confirmed("edited", "c2", 2));
        store.upsert_pending(pending("e"));

        let present: HashSet<MessageId> = [MessageId::from("kept")].into_iter().collect();
        let removed = store.prune_missing(&present, mark);

        assert_eq!(removed, vec![MessageId::from("deleted")]);
        assert_eq!(store.len(), 4);
        assert!(store.contains(&MessageId::from("arrived-later")));
        assert!(store.contains(&MessageId::from("edited")));
    }

    #[test]
    fn fetched_copy_does_not_overwrite_newer_changes() {
        let mut store = MessageStore::new();
        store.upsert(confirmed("m1", "old", 0));
        store.upsert(confirmed("m2", "old", 1));
        let mark = store.mark();
        store.upsert(confirmed("m1", "pushed edit", 0));

        assert_eq!(store.merge_fetched(confirmed("m1", "old", 0), mark), Upsert::Unchanged);
        assert_eq!(store.merge_fetched(confirmed("m2", "fresh", 1), mark), Upsert::Replaced);
        assert_eq!(store.merge_fetched(confirmed("m3", "new", 2), mark), Upsert::Inserted);

        assert_eq!(bodies(&store), ["pushed edit", "fresh", "new"]);
    }

    #[test]
    fn fetched_copy_replaces_a_message_only_inserted_since_the_mark() {
        let mut store = MessageStore::new();
        let mark = store.mark();
        store.upsert(confirmed("m1", "as pushed", 0));

        let mut fetched = confirmed("m1", "as pushed", 0);
        fetched
            .reactions
            .insert(Reaction::new("👍", UserId::from("bob")));
        assert_eq!(store.merge_fetched(fetched, mark), Upsert::Replaced);
        assert_eq!(store.get(&MessageId::from("m1")).unwrap().reactions.len(), 1);
    }
}
