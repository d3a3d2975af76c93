//! Inbound frame handling for one connection.
//!
//! Frames from a single connection are handled strictly one at a time, in
//! arrival order; the reader awaits each call before reading the next frame.

use serde_json::json;

use crate::notify::kind;
use crate::AppState;

use super::connection::{Connection, OutboundFrame};
use super::events::{
    ClientFrame, DirectMessageFrame, FrameError, GroupMessageFrame, ServerFrame, TypingFrame,
};
use super::shortcodes;

pub const NOT_RELATED: &str = "You are not allowed to message this user.";
pub const NOT_A_MEMBER: &str = "You are not a member of this group.";

/// Classify one text frame and dispatch it. Never fails the connection.
pub async fn handle_text(state: &AppState, conn: &Connection, text: &str) {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(FrameError::UnknownType(frame_type)) => {
            tracing::warn!(user_id = conn.user_id, frame_type = %frame_type, "unknown frame type ignored");
            return;
        }
        Err(FrameError::Malformed(err)) => {
            tracing::debug!(user_id = conn.user_id, error = %err, "malformed frame dropped");
            return;
        }
    };

    match frame {
        ClientFrame::Message {
            receiver_id,
            content,
        } => direct_message(state, conn, receiver_id, &content).await,
        ClientFrame::GroupMessage { group_id, content } => {
            group_message(state, conn, group_id, &content).await
        }
        ClientFrame::Typing { receiver_id } => {
            relay_typing(state, conn, receiver_id, ServerFrame::Typing)
        }
        ClientFrame::StopTyping { receiver_id } => {
            relay_typing(state, conn, receiver_id, ServerFrame::StopTyping)
        }
        ClientFrame::UserListRequest => state.presence.broadcast().await,
    }
}

async fn direct_message(state: &AppState, conn: &Connection, receiver_id: i64, content: &str) {
    let sender_id = conn.user_id;
    match state.store.are_related(sender_id, receiver_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(sender_id, receiver_id, "direct message rejected");
            conn.send(&ServerFrame::error(NOT_RELATED));
            return;
        }
        Err(err) => {
            tracing::error!(sender_id, receiver_id, error = %err, "relationship check failed");
            return;
        }
    }

    let content = shortcodes::expand(content);
    let message = match state
        .store
        .insert_direct_message(sender_id, receiver_id, &content)
        .await
    {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(sender_id, receiver_id, error = %err, "failed to persist direct message");
            return;
        }
    };

    let frame = ServerFrame::Message(DirectMessageFrame {
        id: message.id,
        content: message.content.clone(),
        sender_id,
        sender_name: conn.nickname.clone(),
        receiver_id,
        created_at: message.created_at,
    });
    let Some(outbound) = OutboundFrame::encode(&frame) else {
        return;
    };

    if let Some(receiver) = state.registry.get(receiver_id) {
        receiver.deliver(outbound.clone());
        receiver.send(&ServerFrame::NewMessageNotification {
            sender_id,
            sender_name: conn.nickname.clone(),
            content: message.content.clone(),
        });
    }

    let preview = shortcodes::preview(&message.content, state.config.relay.preview_max_chars);
    state
        .notifier
        .notify(
            receiver_id,
            Some(sender_id),
            kind::NEW_MESSAGE,
            json!({
                "message_id": message.id,
                "conversation_id": receiver_id,
                "preview": preview,
                "url": "/chat",
            }),
        )
        .await;

    conn.deliver(outbound);
}

async fn group_message(state: &AppState, conn: &Connection, group_id: i64, content: &str) {
    let sender_id = conn.user_id;
    match state.store.is_group_member(group_id, sender_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(sender_id, group_id, "group message rejected");
            conn.send(&ServerFrame::error(NOT_A_MEMBER));
            return;
        }
        Err(err) => {
            tracing::error!(sender_id, group_id, error = %err, "membership check failed");
            return;
        }
    }

    let content = shortcodes::expand(content);
    let message = match state
        .store
        .insert_group_message(group_id, sender_id, &content)
        .await
    {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(sender_id, group_id, error = %err, "failed to persist group message");
            return;
        }
    };

    let frame = ServerFrame::GroupMessage(GroupMessageFrame {
        id: message.id,
        group_id,
        content: message.content.clone(),
        sender_id,
        sender_name: conn.nickname.clone(),
    });
    let Some(outbound) = OutboundFrame::encode(&frame) else {
        return;
    };

    let members = match state.store.group_members_except(group_id, sender_id).await {
        Ok(members) => members,
        Err(err) => {
            tracing::error!(group_id, error = %err, "failed to list group members");
            Vec::new()
        }
    };

    let preview = shortcodes::preview(&message.content, state.config.relay.preview_max_chars);
    let url = format!("/groups/{group_id}");
    for member_id in members {
        state.registry.deliver(member_id, outbound.clone());
        state
            .notifier
            .notify(
                member_id,
                Some(sender_id),
                kind::GROUP_MESSAGE,
                json!({
                    "message_id": message.id,
                    "group_id": group_id,
                    "preview": preview,
                    "url": url,
                }),
            )
            .await;
    }

    conn.deliver(outbound);

    state
        .notifier
        .notify(
            sender_id,
            Some(sender_id),
            kind::GROUP_MESSAGE_SENT,
            json!({
                "message_id": message.id,
                "group_id": group_id,
            }),
        )
        .await;
}

fn relay_typing(
    state: &AppState,
    conn: &Connection,
    receiver_id: i64,
    wrap: fn(TypingFrame) -> ServerFrame,
) {
    let frame = wrap(TypingFrame {
        sender_id: conn.user_id,
        sender_name: conn.nickname.clone(),
        receiver_id,
    });
    state.registry.send(receiver_id, &frame);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::Config;
    use crate::db::memory::MemoryStore;

    fn setup() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.add_user(1, "amy", None);
        store.add_user(2, "bob", None);
        store.add_user(3, "cat", None);
        let state = AppState::new(store.clone(), Config::for_tests());
        (state, store)
    }

    fn connect(state: &AppState, user_id: i64, nickname: &str) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        let (conn, rx) = Connection::new(user_id, nickname, 32, Duration::from_millis(50));
        state.registry.register(conn.clone());
        (conn, rx)
    }

    async fn next(rx: &mut mpsc::Receiver<OutboundFrame>) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("queue closed");
        serde_json::from_str(frame.text.as_str()).unwrap()
    }

    /// Collects frames until the queue stays quiet briefly.
    async fn drain(rx: &mut mpsc::Receiver<OutboundFrame>) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            frames.push(serde_json::from_str(frame.text.as_str()).unwrap());
        }
        frames
    }

    #[tokio::test]
    async fn related_direct_message_is_delivered_notified_and_echoed() {
        let (state, store) = setup();
        store.follow(1, 2);
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"message","receiver_id":"2","content":":smile: hi"}"#).await;

        let delivered = next(&mut bob_rx).await;
        assert_eq!(delivered["type"], "message");
        assert_eq!(delivered["content"], "😄 hi");
        assert_eq!(delivered["sender_id"], "1");
        assert_eq!(delivered["sender_name"], "amy");
        assert_eq!(delivered["receiver_id"], "2");

        let hint = next(&mut bob_rx).await;
        assert_eq!(hint["type"], "new_message_notification");
        assert_eq!(hint["content"], "😄 hi");

        let realtime = next(&mut bob_rx).await;
        assert_eq!(realtime["type"], "notification");
        assert_eq!(realtime["notification_type"], "new_message");
        assert_eq!(realtime["data"]["preview"], "😄 hi");
        assert_eq!(realtime["data"]["actor_nickname"], "amy");

        let echoed = next(&mut amy_rx).await;
        assert_eq!(echoed, delivered);

        assert_eq!(store.direct_messages().len(), 1);
        let notes = store.notifications_for(2);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].type_, "new_message");
        assert_eq!(notes[0].actor_id, Some(1));
    }

    #[tokio::test]
    async fn unrelated_direct_message_yields_single_error() {
        let (state, store) = setup();
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"message","receiver_id":2,"content":"hi"}"#).await;

        let frames = drain(&mut amy_rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "error");
        assert_eq!(frames[0]["content"], NOT_RELATED);
        assert!(drain(&mut bob_rx).await.is_empty());
        assert!(store.direct_messages().is_empty());
        assert!(store.notifications_for(2).is_empty());
        assert!(!amy.is_closed());
    }

    #[tokio::test]
    async fn offline_receiver_still_gets_durable_notification() {
        let (state, store) = setup();
        store.follow(2, 1);
        let (amy, mut amy_rx) = connect(&state, 1, "amy");

        handle_text(&state, &amy, r#"{"type":"message","receiver_id":2,"content":"later"}"#).await;

        assert_eq!(next(&mut amy_rx).await["type"], "message");
        assert_eq!(store.notifications_for(2).len(), 1);
    }

    #[tokio::test]
    async fn preview_is_capped() {
        let (state, store) = setup();
        store.follow(1, 2);
        let (amy, _amy_rx) = connect(&state, 1, "amy");
        let long = "x".repeat(300);
        let frame = json!({ "type": "message", "receiver_id": 2, "content": long }).to_string();

        handle_text(&state, &amy, &frame).await;

        let notes = store.notifications_for(2);
        assert_eq!(notes[0].data["preview"].as_str().unwrap().chars().count(), 140);
        assert_eq!(store.direct_messages()[0].content.len(), 300);
    }

    #[tokio::test]
    async fn group_message_fans_out_to_other_members() {
        let (state, store) = setup();
        for user in [1, 2, 3] {
            store.add_group_member(9, user);
        }
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"group_message","group_id":"9","content":"hey all"}"#).await;

        let delivered = next(&mut bob_rx).await;
        assert_eq!(delivered["type"], "group_message");
        assert_eq!(delivered["group_id"], 9);
        assert_eq!(delivered["content"], "hey all");

        let mine = drain(&mut amy_rx).await;
        assert_eq!(mine[0], delivered);
        assert!(mine
            .iter()
            .any(|f| f["type"] == "notification" && f["notification_type"] == "group_message_sent"));

        assert_eq!(store.notifications_for(2).len(), 1);
        assert_eq!(store.notifications_for(3).len(), 1);
        assert_eq!(store.notifications_for(3)[0].data["url"], "/groups/9");
        let sent = store.notifications_for(1);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_, "group_message_sent");
    }

    #[tokio::test]
    async fn non_member_group_message_is_rejected_before_persistence() {
        let (state, store) = setup();
        store.add_group_member(9, 2);
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"group_message","group_id":9,"content":"let me in"}"#).await;

        let frames = drain(&mut amy_rx).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["content"], NOT_A_MEMBER);
        assert!(drain(&mut bob_rx).await.is_empty());
        assert!(store.group_messages().is_empty());
    }

    #[tokio::test]
    async fn typing_reaches_connected_receiver_only() {
        let (state, _store) = setup();
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"typing","receiver_id":2}"#).await;
        handle_text(&state, &amy, r#"{"type":"stop_typing","receiver_id":3}"#).await;

        let typing = next(&mut bob_rx).await;
        assert_eq!(typing["type"], "typing");
        assert_eq!(typing["sender_name"], "amy");
        assert!(drain(&mut amy_rx).await.is_empty());
    }

    #[tokio::test]
    async fn user_list_request_broadcasts_to_everyone() {
        let (state, _store) = setup();
        let (amy, mut amy_rx) = connect(&state, 1, "amy");
        let (_bob, mut bob_rx) = connect(&state, 2, "bob");

        handle_text(&state, &amy, r#"{"type":"user_list_request"}"#).await;

        assert_eq!(next(&mut amy_rx).await["type"], "user_list");
        assert_eq!(next(&mut bob_rx).await["type"], "user_list");
    }

    #[tokio::test]
    async fn junk_frames_are_ignored() {
        let (state, store) = setup();
        store.follow(1, 2);
        let (amy, mut amy_rx) = connect(&state, 1, "amy");

        handle_text(&state, &amy, "not json").await;
        handle_text(&state, &amy, r#"{"type":"dance"}"#).await;
        handle_text(&state, &amy, r#"{"type":"message","receiver_id":"bob","content":"x"}"#).await;

        assert!(drain(&mut amy_rx).await.is_empty());
        assert!(store.direct_messages().is_empty());
        assert!(!amy.is_closed());
    }
}
