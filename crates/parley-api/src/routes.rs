//! REST paths, relative to the API base URL.

use parley_types::{ConversationKey, MessageId, ReactionId, UserId};

/// Collection path for a conversation. Direct conversations are addressed
/// by the peer: the backend files a private message under its recipient.
pub fn conversation(key: &ConversationKey, me: &UserId) -> String {
    match key {
        ConversationKey::Channel { workspace, channel } => {
            format!("workspaces/{}/channels/{}/messages", workspace, channel)
        }
        ConversationKey::Direct(pair) => user_messages(pair.peer_of(me)),
    }
}

pub fn user_messages(user: &UserId) -> String {
    format!("users/{}/messages", user)
}

pub fn message(key: &ConversationKey, me: &UserId, id: &MessageId) -> String {
    format!("{}/{}", conversation(key, me), id)
}

pub fn reactions(key: &ConversationKey, me: &UserId, id: &MessageId) -> String {
    format!("{}/reactions", message(key, me, id))
}

pub fn reaction(key: &ConversationKey, me: &UserId, id: &MessageId, reaction: &ReactionId) -> String {
    format!("{}/{}", reactions(key, me, id), reaction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_routes_nest_under_workspace() {
        let key = ConversationKey::channel("w1", "c1");
        let me = UserId::from("alice");
        assert_eq!(conversation(&key, &me), "workspaces/w1/channels/c1/messages");
        assert_eq!(
            reaction(&key, &me, &MessageId::from("m1"), &ReactionId::from("r1")),
            "workspaces/w1/channels/c1/messages/m1/reactions/r1"
        );
    }

    #[test]
    fn direct_routes_address_the_peer() {
        let key = ConversationKey::direct("bob", "alice");
        assert_eq!(conversation(&key, &UserId::from("alice")), "users/bob/messages");
        assert_eq!(conversation(&key, &UserId::from("bob")), "users/alice/messages");
        assert_eq!(
            message(&key, &UserId::from("alice"), &MessageId::from("m1")),
            "users/bob/messages/m1"
        );
    }
}
