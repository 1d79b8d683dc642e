//! Unit tests for the connection registry

use super::*;
use proptest::prelude::*;

fn session(identity: &str) -> (AgentSession, mpsc::Receiver<Outgoing>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
    (AgentSession::new(identity, tx), rx)
}

#[tokio::test]
async fn test_register_and_lookup() {
    let registry = ConnectionRegistry::new();
    let (s, _rx) = session("edge-01");
    let id = s.session_id;

    assert!(registry.register(s).await.is_none());

    assert!(registry.is_online("edge-01").await);
    assert_eq!(registry.lookup("edge-01").await.unwrap().session_id, id);
    assert_eq!(registry.count().await, 1);
    assert!(registry.lookup("edge-02").await.is_none());
    assert!(!registry.is_online("edge-02").await);
}

#[tokio::test]
async fn test_replacement_closes_old_session() {
    let registry = ConnectionRegistry::new();
    let (first, mut first_rx) = session("edge-01");
    let first_id = first.session_id;
    let first_token = first.shutdown_token();
    let (second, _second_rx) = session("edge-01");
    let second_id = second.session_id;

    registry.register(first).await;
    let replaced = registry.register(second).await.unwrap();

    assert_eq!(replaced.session_id, first_id);
    assert_eq!(first_rx.recv().await, Some(Outgoing::Close));
    assert!(first_token.is_cancelled());
    assert_eq!(registry.count().await, 1);
    assert_eq!(registry.lookup("edge-01").await.unwrap().session_id, second_id);
}

#[tokio::test]
async fn test_stale_close_does_not_evict_replacement() {
    let registry = ConnectionRegistry::new();
    let (first, _rx1) = session("edge-01");
    let first_id = first.session_id;
    let (second, _rx2) = session("edge-01");

    registry.register(first).await;
    registry.register(second).await;

    assert!(!registry.unregister_session("edge-01", first_id).await);
    assert!(registry.is_online("edge-01").await);
}

#[tokio::test]
async fn test_unregister() {
    let registry = ConnectionRegistry::new();
    let (s, _rx) = session("edge-01");
    let id = s.session_id;
    registry.register(s).await;

    assert!(registry.unregister_session("edge-01", id).await);
    assert!(!registry.is_online("edge-01").await);
    assert!(registry.unregister("edge-01").await.is_none());
}

#[tokio::test]
async fn test_closed_transport_is_offline() {
    let registry = ConnectionRegistry::new();
    let (s, rx) = session("edge-01");
    registry.register(s).await;

    drop(rx);

    assert!(!registry.is_online("edge-01").await);
    assert!(registry.lookup("edge-01").await.is_some());
}

#[tokio::test]
async fn test_list_online_sorted() {
    let registry = ConnectionRegistry::new();
    let mut receivers = Vec::new();
    for name in ["gamma", "alpha", "beta"] {
        let (s, rx) = session(name);
        receivers.push(rx);
        registry.register(s).await;
    }

    assert_eq!(registry.list_online().await, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn test_send_text_after_close_fails() {
    let (s, mut rx) = session("edge-01");
    s.send_text("hello".to_string()).unwrap();
    s.close();

    assert!(s.send_text("again".to_string()).is_err());
    assert_eq!(rx.recv().await, Some(Outgoing::Text("hello".to_string())));
    assert_eq!(rx.recv().await, Some(Outgoing::Close));
}

proptest! {
    #[test]
    fn test_at_most_one_session_per_identity(names in prop::collection::vec("[a-d]", 1..40)) {
        tokio_test::block_on(async {
            let registry = ConnectionRegistry::new();
            let mut receivers = Vec::new();
            let mut last = HashMap::new();

            for name in &names {
                let (s, rx) = session(name);
                last.insert(name.clone(), s.session_id);
                receivers.push(rx);
                registry.register(s).await;
            }

            prop_assert_eq!(registry.count().await, last.len());
            for (name, id) in &last {
                prop_assert_eq!(registry.lookup(name).await.unwrap().session_id, *id);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
