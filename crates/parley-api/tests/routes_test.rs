use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use parley_api::{ApiClient, ApiConfig, ApiError, Draft, MessageApi};
use parley_types::api::Credential;
use parley_types::{ChannelId, ConversationKey, MessageId, ReactionId, UserId, WorkspaceId};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    authorization: Option<String>,
    body: Value,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn message_json(id: &str, source: &str, destination_user: Option<&str>, channel: Option<&str>) -> Value {
    json!({
        "uuid": id,
        "message": "hello",
        "source": source,
        "destination_user": destination_user,
        "destination_channel": channel,
        "is_public": channel.is_some(),
        "date": "2024-05-01T12:00:00Z",
        "createdReaction": [
            { "uuid": "r1", "emoji": "👍", "user": "bob" }
        ]
    })
}

/// Records every request and answers with canned payloads by route shape.
async fn backend(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = uri.path().to_owned();
    log.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    });

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    match (method.as_str(), segments.as_slice()) {
        ("GET", ["users", "ghost", "messages"]) => {
            (StatusCode::NOT_FOUND, "no such user").into_response()
        }
        ("GET", ["users", user, "messages"]) => {
            axum::Json(json!([message_json("m1", "bob", Some(*user), None)])).into_response()
        }
        ("GET", ["workspaces", _, "channels", ch, "messages"]) => {
            axum::Json(json!([message_json("m2", "bob", None, Some(*ch))])).into_response()
        }
        ("POST", [.., "reactions"]) => {
            axum::Json(json!({ "uuid": "r9", "emoji": "🎉", "user_uuid": "alice", "message_uuid": "m1" }))
                .into_response()
        }
        ("POST", ["users", peer, "messages"]) => {
            axum::Json(message_json("m3", "alice", Some(*peer), None)).into_response()
        }
        ("POST", ["workspaces", _, "channels", ch, "messages"]) => {
            axum::Json(message_json("m4", "alice", None, Some(*ch))).into_response()
        }
        ("PUT", [.., id]) => axum::Json(message_json(id, "alice", Some("bob"), None)).into_response(),
        ("DELETE", _) => StatusCode::NO_CONTENT.into_response(),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

async fn serve() -> (ApiClient, Log) {
    let log: Log = Arc::default();
    let app = Router::new().fallback(backend).with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = ApiClient::new(
        ApiConfig::new(format!("http://{}/", addr)),
        Credential::bearer("secret"),
        UserId::from("alice"),
    )
    .unwrap();
    (client, log)
}

fn last(log: &Log) -> Recorded {
    log.lock().unwrap().last().cloned().unwrap()
}

#[tokio::test]
async fn fetch_user_messages_sends_bearer_and_decodes() {
    let (client, log) = serve().await;

    let messages = client.fetch_user_messages(&UserId::from("bob")).await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, MessageId::from("m1"));
    assert_eq!(messages[0].reactions[0].emoji, "👍");
    let req = last(&log);
    assert_eq!(req.method, Method::GET);
    assert_eq!(req.path, "/users/bob/messages");
    assert_eq!(req.authorization.as_deref(), Some("Bearer secret"));
}

#[tokio::test]
async fn fetch_channel_messages_uses_workspace_route() {
    let (client, log) = serve().await;

    let messages = client
        .fetch_channel_messages(&WorkspaceId::from("w1"), &ChannelId::from("general"))
        .await
        .unwrap();

    assert_eq!(messages[0].destination_channel, Some(ChannelId::from("general")));
    assert_eq!(last(&log).path, "/workspaces/w1/channels/general/messages");
}

#[tokio::test]
async fn direct_send_is_private_and_addressed_to_peer() {
    let (client, log) = serve().await;
    let key = ConversationKey::direct("bob", "alice");
    let draft = Draft {
        body: "hi bob".into(),
        attachment: None,
        reply_to: Some(MessageId::from("m1")),
    };

    let created = client.send_message(&key, &draft).await.unwrap();

    assert_eq!(created.id, MessageId::from("m3"));
    let req = last(&log);
    assert_eq!(req.method, Method::POST);
    assert_eq!(req.path, "/users/bob/messages");
    assert_eq!(req.body["message"], "hi bob");
    assert_eq!(req.body["source_uuid"], "alice");
    assert_eq!(req.body["destination_uuid"], "bob");
    assert_eq!(req.body["is_public"], false);
    assert_eq!(req.body["reply_to_uuid"], "m1");
    assert!(req.body.get("file_url").is_none());
}

#[tokio::test]
async fn channel_send_is_public() {
    let (client, log) = serve().await;
    let key = ConversationKey::channel("w1", "general");
    let draft = Draft {
        body: "hello all".into(),
        attachment: Some("https://files.example/a.png".into()),
        reply_to: None,
    };

    client.send_message(&key, &draft).await.unwrap();

    let req = last(&log);
    assert_eq!(req.path, "/workspaces/w1/channels/general/messages");
    assert_eq!(req.body["destination_uuid"], "general");
    assert_eq!(req.body["is_public"], true);
    assert_eq!(req.body["file_url"], "https://files.example/a.png");
}

#[tokio::test]
async fn edit_and_delete_target_the_message() {
    let (client, log) = serve().await;
    let key = ConversationKey::direct("alice", "bob");
    let id = MessageId::from("m7");

    let edited = client.edit_message(&key, &id, "fixed").await.unwrap();
    assert_eq!(edited.id, id);
    let req = last(&log);
    assert_eq!(req.method, Method::PUT);
    assert_eq!(req.path, "/users/bob/messages/m7");
    assert_eq!(req.body["message"], "fixed");

    client.delete_message(&key, &id).await.unwrap();
    let req = last(&log);
    assert_eq!(req.method, Method::DELETE);
    assert_eq!(req.path, "/users/bob/messages/m7");
}

#[tokio::test]
async fn reactions_round_trip_through_nested_routes() {
    let (client, log) = serve().await;
    let key = ConversationKey::channel("w1", "general");
    let id = MessageId::from("m1");

    let reaction = client.add_reaction(&key, &id, "🎉").await.unwrap();
    assert_eq!(reaction.id, ReactionId::from("r9"));
    assert_eq!(reaction.user_id, UserId::from("alice"));
    let req = last(&log);
    assert_eq!(req.path, "/workspaces/w1/channels/general/messages/m1/reactions");
    assert_eq!(req.body["emoji"], "🎉");
    assert_eq!(req.body["user_uuid"], "alice");
    assert_eq!(req.body["message_uuid"], "m1");

    client.remove_reaction(&key, &id, &reaction.id).await.unwrap();
    let req = last(&log);
    assert_eq!(req.method, Method::DELETE);
    assert_eq!(req.path, "/workspaces/w1/channels/general/messages/m1/reactions/r9");
}

#[tokio::test]
async fn error_status_is_surfaced() {
    let (client, _log) = serve().await;

    let err = client
        .fetch_user_messages(&UserId::from("ghost"))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(matches!(err, ApiError::Status { status: 404, ref body } if body == "no such user"));
}
