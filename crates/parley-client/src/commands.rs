use parley_sync::{ConversationSession, Draft};
use parley_types::{MessageId, PendingId};

pub const HELP: &str = "\
  <text>                      send a message
  /reply <id> <text>          reply to a message
  /attach <url> <text>        send a message with an attachment
  /react <id> <emoji>         toggle your reaction
  /edit <id> <text>           edit one of your messages
  /delete <id>                delete one of your messages
  /retry <pending-id>         re-send a failed message
  /discard <pending-id>       drop a failed message
  /refresh                    re-fetch the history
  /quit                       leave";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(Draft),
    React { id: MessageId, emoji: String },
    Edit { id: MessageId, body: String },
    Delete(MessageId),
    Retry(PendingId),
    Discard(PendingId),
    Refresh,
    Help,
    Quit,
}

/// Parses one line typed at the prompt. Blank lines yield `Ok(None)`.
pub fn parse(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Send(Draft::text(line))));
    };

    let (name, rest) = split_word(command);
    let input = match name {
        "reply" => {
            let (id, body) = id_and_text(rest, "/reply <id> <text>")?;
            Input::Send(Draft {
                body,
                attachment: None,
                reply_to: Some(id),
            })
        }
        "attach" => {
            let (url, body) = split_word(rest);
            if url.is_empty() {
                return Err("usage: /attach <url> <text>".into());
            }
            Input::Send(Draft {
                body: body.to_owned(),
                attachment: Some(url.to_owned()),
                reply_to: None,
            })
        }
        "react" => {
            let (id, emoji) = id_and_text(rest, "/react <id> <emoji>")?;
            Input::React { id, emoji }
        }
        "edit" => {
            let (id, body) = id_and_text(rest, "/edit <id> <text>")?;
            Input::Edit { id, body }
        }
        "delete" => Input::Delete(single_id(rest, "/delete <id>")?),
        "retry" => Input::Retry(pending(rest)?),
        "discard" => Input::Discard(pending(rest)?),
        "refresh" => Input::Refresh,
        "help" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => return Err(format!("unknown command /{} (try /help)", other)),
    };
    Ok(Some(input))
}

fn split_word(text: &str) -> (&str, &str) {
    match text.trim().split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text.trim(), ""),
    }
}

fn id_and_text(rest: &str, usage: &str) -> Result<(MessageId, String), String> {
    match split_word(rest) {
        (id, text) if !id.is_empty() && !text.is_empty() => {
            Ok((MessageId::from(id), text.to_owned()))
        }
        _ => Err(format!("usage: {}", usage)),
    }
}

fn single_id(rest: &str, usage: &str) -> Result<MessageId, String> {
    match split_word(rest) {
        (id, "") if !id.is_empty() => Ok(MessageId::from(id)),
        _ => Err(format!("usage: {}", usage)),
    }
}

fn pending(rest: &str) -> Result<PendingId, String> {
    PendingId::parse(rest.trim()).ok_or_else(|| format!("not a pending id: {}", rest.trim()))
}

/// Runs one parsed command against the session and returns a status line
/// for the user, if there is anything worth saying.
pub async fn execute(session: &ConversationSession, input: Input) -> anyhow::Result<Option<String>> {
    let note = match input {
        Input::Send(draft) => {
            let sent = session.send_draft(draft).await?;
            Some(format!("sent {}", sent.key))
        }
        Input::React { id, emoji } => {
            session.toggle_reaction(&id, &emoji).await?;
            None
        }
        Input::Edit { id, body } => {
            session.edit(&id, body).await?;
            None
        }
        Input::Delete(id) => {
            session.delete_message(&id).await?;
            Some(format!("deleted {}", id))
        }
        Input::Retry(pending_id) => {
            let sent = session.retry(pending_id).await?;
            Some(format!("sent {}", sent.key))
        }
        Input::Discard(pending_id) => {
            session.discard(pending_id).await?;
            Some(format!("discarded {}", pending_id))
        }
        Input::Refresh => {
            session.refresh().await?;
            Some(format!("{} messages", session.messages().len()))
        }
        Input::Help => Some(HELP.to_owned()),
        Input::Quit => None,
    };
    Ok(note)
}
