//! Message correlation, transcript snapshots and shared backend setup.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use conclave::{
    BackendCache, BackendFactory, CallLedger, Context, Message, MockBackend, ProtocolError,
    ProviderBackend, ProviderConfig, ToolCall,
};
use serde_json::json;

#[test]
fn call_ids_are_unique() {
    let ids: HashSet<String> = (0..1_000)
        .map(|_| Message::forward("a", "b", "x").call_id.as_str().to_string())
        .collect();
    assert_eq!(ids.len(), 1_000);
}

#[test]
fn return_without_forward_is_rejected() {
    let ledger = CallLedger::new();
    let stray = Message::reply_to(&Message::forward("a", "b", "never issued"), "answer");

    let err = ledger.complete(&stray).unwrap_err();
    assert!(matches!(err, ProtocolError::UnmatchedReturn { .. }));
    assert!(ledger.messages().is_empty());
}

#[test]
fn forward_then_return_closes_the_call() {
    let ledger = CallLedger::new();
    let forward = Message::forward("a", "b", "question");
    ledger.issue(&forward).unwrap();
    assert_eq!(ledger.outstanding(), 1);

    let ret = Message::reply_to(&forward, "answer");
    assert_eq!(ret.sender, "b");
    assert_eq!(ret.receiver, "a");
    let matched = ledger.complete(&ret).unwrap();
    assert_eq!(matched.call_id, forward.call_id);
    assert_eq!(ledger.outstanding(), 0);

    // A second return for the same call has nothing left to match.
    assert!(matches!(
        ledger.complete(&ret),
        Err(ProtocolError::UnmatchedReturn { .. })
    ));
}

#[test]
fn context_snapshots_are_detached() {
    let mut context = Context::new("system");
    context.add_user("hi", Vec::new());

    let mut snapshot = context.messages();
    snapshot.clear();
    assert_eq!(context.len(), 1);

    context.add_assistant_tool_calls(
        vec![ToolCall::from_value("t1", "lookup", json!({"q": "x"}))],
        None,
    );
    let mut snapshot = context.messages();
    snapshot[1].tool_calls.clear();
    assert_eq!(context.messages()[1].tool_calls.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_use_configures_once() {
    let built = Arc::new(AtomicUsize::new(0));
    let backend: Arc<dyn ProviderBackend> = Arc::new(MockBackend::new());
    let counter = Arc::clone(&built);
    let factory = BackendFactory::new().with("mock", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&backend))
    });
    let cache = Arc::new(BackendCache::new(factory));
    let provider = ProviderConfig::new("shared", "mock", "sk-test");

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let provider = provider.clone();
            tokio::spawn(async move { cache.get(&provider).await.map(|_| ()) })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(cache.is_configured("shared"));

    cache.clear();
    assert!(!cache.is_configured("shared"));
    cache.get(&provider).await.unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
}
