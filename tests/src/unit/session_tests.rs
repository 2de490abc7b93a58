use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sable_core::{
    EmptyHistory, Message, MessageHistory, MessageKind, Session, SessionStore, StoreUpdate,
};
use uuid::Uuid;

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

struct FailingHistory;

#[async_trait]
impl MessageHistory for FailingHistory {
    async fn fetch(&self, _session_id: &str) -> Result<Vec<Message>> {
        Err(anyhow!("history backend unavailable"))
    }

    async fn clear(&self, _session_id: &str) -> Result<()> {
        Err(anyhow!("history backend unavailable"))
    }
}

struct CannedHistory(Vec<Message>);

#[async_trait]
impl MessageHistory for CannedHistory {
    async fn fetch(&self, _session_id: &str) -> Result<Vec<Message>> {
        Ok(self.0.clone())
    }

    async fn clear(&self, _session_id: &str) -> Result<()> {
        Ok(())
    }
}

#[test]
fn clear_then_initialize_yields_an_empty_idle_store() {
    let runtime = test_runtime();
    let store = SessionStore::new();
    store.clear();
    runtime.block_on(store.initialize(Session::new(Uuid::new_v4().to_string(), "Fresh"), &EmptyHistory));

    assert!(store.messages().is_empty());
    assert!(!store.is_streaming());
}

#[test]
fn initialize_replaces_the_list_with_prior_history() {
    let runtime = test_runtime();
    let store = SessionStore::new();
    store.add_message(Message::assistant("stale-0", MessageKind::Response, "old"));

    let history = CannedHistory(vec![
        Message::user("u-0", "hello"),
        Message::assistant("response-0", MessageKind::Response, "hi there"),
    ]);
    runtime.block_on(store.initialize(Session::new("s-1".to_string(), "Restored"), &history));

    let messages = store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, "u-0");
    assert_eq!(messages[1].id, "response-0");
    assert_eq!(store.session().map(|s| s.name), Some("Restored".to_string()));
}

#[test]
fn failed_history_load_degrades_to_an_empty_list() {
    let runtime = test_runtime();
    let store = SessionStore::new();
    store.add_message(Message::user("u-0", "hello"));

    runtime.block_on(store.initialize(Session::new("s-1".to_string(), "Degraded"), &FailingHistory));

    assert!(store.messages().is_empty());
    assert!(store.session().is_some());
}

#[test]
fn subscribers_see_the_replacement() {
    let runtime = test_runtime();
    let store = SessionStore::new();
    let mut updates = store.subscribe();

    runtime.block_on(store.initialize(Session::new("s-1".to_string(), "Watched"), &EmptyHistory));

    assert_eq!(updates.try_recv().expect("update"), StoreUpdate::Replaced);
}
