use anyhow::Result;
use async_trait::async_trait;
use sable_core::{
    ChannelEvent, ChannelHandle, ChannelState, ChatClient, MessageKind, ScriptedTransport, Session,
    SessionStore, StoreUpdate, Transport, TurnError, TurnRequest,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

/// Transport whose channel never produces anything, keeping a turn pending.
#[derive(Default)]
struct StallTransport {
    held: Mutex<Vec<UnboundedSender<ChannelEvent>>>,
}

#[async_trait]
impl Transport for StallTransport {
    async fn start_turn(&self, _request: TurnRequest) -> Result<ChannelHandle> {
        let (tx, rx) = unbounded_channel();
        let _ = tx.send(ChannelEvent::State(ChannelState::Connecting));
        self.held.lock().expect("lock").push(tx);
        Ok(ChannelHandle::from_events(rx))
    }
}

#[test]
fn a_full_turn_reconciles_every_event_in_order() {
    let runtime = test_runtime();
    let script = json!([
        {"type": "plan", "content": "thinking"},
        {"type": "tool_execution", "tool": "search", "result": {"hits": 3}},
        {"type": "completion", "content": "done"},
    ])
    .to_string();
    let transport = Arc::new(ScriptedTransport::new(vec![script]));
    let client = ChatClient::new(SessionStore::new(), transport.clone());
    let mut updates = client.store().subscribe();

    let summary = runtime
        .block_on(client.send_turn("hi", "session-1"))
        .expect("turn completes");

    assert_eq!(summary.appended, 3);
    let messages = client.store().messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].kind, Some(MessageKind::Plan));
    assert_eq!(messages[0].content, "thinking");
    assert_eq!(messages[1].kind, Some(MessageKind::Tool));
    assert_eq!(messages[1].content, "Tool: search\nResult: {\"hits\":3}");
    assert_eq!(messages[2].kind, Some(MessageKind::Response));
    assert_eq!(messages[2].content, "done");
    assert!(!client.store().is_streaming());

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].content, "hi");
    assert_eq!(requests[0].session_id, "session-1");

    assert_eq!(updates.try_recv().expect("update"), StoreUpdate::Streaming(true));
    for message in &messages {
        assert_eq!(
            updates.try_recv().expect("update"),
            StoreUpdate::Appended {
                id: message.id.clone()
            }
        );
    }
    assert_eq!(
        updates.try_recv().expect("update"),
        StoreUpdate::Streaming(false)
    );
}

#[test]
fn a_close_without_completion_fails_and_keeps_the_partial_turn() {
    let runtime = test_runtime();
    let client = ChatClient::scripted(vec![r#"{"type":"plan","content":"thinking"}"#.into()]);

    let err = runtime
        .block_on(client.send_turn("hi", "session-1"))
        .expect_err("no completion arrived");

    assert!(matches!(err, TurnError::Incomplete { appended: 1 }));
    let messages = client.store().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, Some(MessageKind::Plan));
    assert!(!client.store().is_streaming());
}

#[test]
fn a_tool_error_does_not_terminate_the_turn() {
    let runtime = test_runtime();
    let script = json!([
        {"type": "tool_error", "error": "search timed out"},
        {"type": "completion", "content": "recovered"},
    ])
    .to_string();
    let client = ChatClient::scripted(vec![script]);

    let summary = runtime
        .block_on(client.send_turn("hi", "session-1"))
        .expect("turn completes past the tool error");

    assert_eq!(summary.appended, 2);
    let messages = client.store().messages();
    assert_eq!(messages[0].kind, Some(MessageKind::Error));
    assert_eq!(messages[0].content, "search timed out");
    assert_eq!(messages[1].kind, Some(MessageKind::Response));
}

#[test]
fn a_transport_fault_surfaces_as_a_failed_turn() {
    let runtime = test_runtime();
    let transport = Arc::new(ScriptedTransport::faulty(vec![
        r#"{"type":"plan","content":"thinking"}"#.into(),
    ]));
    let client = ChatClient::new(SessionStore::new(), transport);

    let err = runtime
        .block_on(client.send_turn("hi", "session-1"))
        .expect_err("fault before completion");

    assert!(matches!(err, TurnError::Transport(_)));
    assert_eq!(client.store().messages().len(), 1);
    assert!(!client.store().is_streaming());
}

#[test]
fn a_second_turn_is_rejected_while_one_is_streaming() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let client = ChatClient::new(SessionStore::new(), Arc::new(StallTransport::default()));

        let racing = client.clone();
        let first = tokio::spawn(async move { racing.send_turn("first", "session-1").await });
        while !client.store().is_streaming() {
            tokio::task::yield_now().await;
        }

        let err = client
            .send_turn("second", "session-1")
            .await
            .expect_err("turn already in flight");
        assert!(matches!(err, TurnError::TurnInFlight));

        first.abort();
    });
}

#[test]
fn message_ids_stay_unique_across_consecutive_turns() {
    let runtime = test_runtime();
    // The scripted transport replays the same frames for every turn.
    let script = json!([
        {"type": "plan", "content": "thinking"},
        {"type": "completion", "content": "done"},
    ])
    .to_string();
    let client = ChatClient::scripted(vec![script]);

    runtime
        .block_on(client.send_turn("first", "session-1"))
        .expect("first turn");
    runtime
        .block_on(client.send_turn("second", "session-1"))
        .expect("second turn");

    let mut ids: Vec<String> = client.store().messages().into_iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 4);
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4, "ids must not collide across turns");
}

#[test]
fn clear_session_empties_the_store() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let client = ChatClient::scripted(vec![r#"{"type":"completion","content":"done"}"#.into()]);
        client
            .initialize_session(Session::new("session-1".to_string(), "To clear"))
            .await;
        client.send_turn("hi", "session-1").await.expect("turn");
        assert!(!client.store().messages().is_empty());

        client.clear_session().await.expect("clear succeeds");
        assert!(client.store().messages().is_empty());
    });
}

#[test]
fn clear_session_propagates_remote_failures() {
    struct FailingHistory;

    #[async_trait]
    impl sable_core::MessageHistory for FailingHistory {
        async fn fetch(&self, _session_id: &str) -> Result<Vec<sable_core::Message>> {
            Ok(Vec::new())
        }

        async fn clear(&self, _session_id: &str) -> Result<()> {
            Err(anyhow::anyhow!("history backend unavailable"))
        }
    }

    let runtime = test_runtime();
    runtime.block_on(async {
        let client = ChatClient::with_history(
            SessionStore::new(),
            Arc::new(ScriptedTransport::new(Vec::new())),
            Arc::new(FailingHistory),
        );
        client
            .initialize_session(Session::new("session-1".to_string(), "Sticky"))
            .await;

        client
            .clear_session()
            .await
            .expect_err("remote clear failure must propagate");
    });
}
