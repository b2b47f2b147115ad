use std::collections::BTreeMap;
use std::sync::Arc;

use tracing_test::traced_test;

use crate::errors::Error;
use crate::node::Action;
use crate::store::FakeStore;
use crate::store::SetOptions;
use crate::store::Store;
use crate::writer::Writer;

fn writer(store: &Arc<FakeStore>, ttl: Option<u64>) -> Writer {
    Writer::new(store.clone() as Arc<dyn Store>, ttl)
}

fn desired(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(path, value)| (path.to_string(), value.to_string()))
        .collect()
}

/// External lease refresh by another writer maintaining the same node.
async fn external_refresh(store: &FakeStore, path: &str, ttl: u64) {
    let options = SetOptions {
        refresh: true,
        ttl: Some(ttl),
        prev_exist: Some(true),
        ..SetOptions::default()
    };
    store.set(path, options).await.unwrap();
}

#[tokio::test]
async fn test_refresh_without_ttl_is_an_error() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, None);

    assert!(matches!(writer.refresh().await, Err(Error::Invalid(_))));
}

#[tokio::test]
async fn test_update_writes_a_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    assert_eq!(store.logs(), vec![(Action::Set, "/kontena/test1".to_string())]);
    assert_eq!(
        store.nodes().get("/kontena/test1").map(String::as_str),
        Some(r#"{"test":1}"#)
    );
    assert!(writer.shared("/kontena/test1").is_none());
}

#[tokio::test]
async fn test_update_overrides_a_conflicting_node() {
    let store = Arc::new(FakeStore::new());
    store.load_with_ttl([("/kontena/test1", r#"{"test":0}"#)], Some(30));
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    // the value changed, so this was a genuine takeover, not sharing
    assert!(writer.shared("/kontena/test1").is_none());
    assert_eq!(
        store.nodes().get("/kontena/test1").map(String::as_str),
        Some(r#"{"test":1}"#)
    );
}

#[tokio::test]
#[traced_test]
async fn test_update_detects_a_shared_node() {
    let store = Arc::new(FakeStore::new());
    store.load_with_ttl([("/kontena/test1", r#"{"test":1}"#)], Some(30));
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    assert!(writer.shared("/kontena/test1").is_some());
    assert!(logs_contain("set /kontena/test1: shared"));
}

#[tokio::test]
async fn test_refresh_with_nothing_tracked_does_nothing() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer.refresh().await.unwrap();

    assert!(!store.modified());
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));
    let nodes = desired(&[("/kontena/test1", r#"{"test":1}"#)]);

    writer.update(nodes.clone()).await.unwrap();
    writer.update(nodes).await.unwrap();

    assert_eq!(store.logs(), vec![(Action::Set, "/kontena/test1".to_string())]);
}

#[tokio::test]
async fn test_update_rewrites_a_changed_value() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    writer
        .update(desired(&[("/kontena/test1", r#"{"test":2}"#)]))
        .await
        .unwrap();

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::Set, "/kontena/test1".to_string()),
        ]
    );
    assert_eq!(
        store.nodes().get("/kontena/test1").map(String::as_str),
        Some(r#"{"test":2}"#)
    );
}

#[tokio::test]
async fn test_update_deletes_a_dropped_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    writer.update(BTreeMap::new()).await.unwrap();

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::CompareAndDelete, "/kontena/test1".to_string()),
        ]
    );
    assert!(store.nodes().is_empty());
}

#[tokio::test]
async fn test_update_replaces_a_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    writer
        .update(desired(&[("/kontena/test2", r#"{"test":2}"#)]))
        .await
        .unwrap();

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::Set, "/kontena/test2".to_string()),
            (Action::CompareAndDelete, "/kontena/test1".to_string()),
        ]
    );
    assert_eq!(
        store.nodes().into_keys().collect::<Vec<_>>(),
        vec!["/kontena/test2"]
    );
}

#[tokio::test]
async fn test_refresh_keeps_the_node_alive() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    store.tick(20);
    writer.refresh().await.unwrap();
    store.tick(20);

    // the refresh itself is not logged
    assert_eq!(store.logs(), vec![(Action::Set, "/kontena/test1".to_string())]);
    assert_eq!(store.nodes().len(), 1);
}

#[tokio::test]
async fn test_refresh_of_an_expired_node_surfaces_not_found() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    store.tick(30);

    let error = writer.refresh().await.unwrap_err();
    assert!(error.is_not_found());
    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::Expire, "/kontena/test1".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_refresh_of_an_overwritten_node_surfaces_test_failed() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    // external write conflict
    store
        .set("/kontena/test1", SetOptions::value("lollerskates"))
        .await
        .unwrap();

    assert!(matches!(writer.refresh().await, Err(Error::TestFailed(_))));
}

#[tokio::test]
async fn test_refresh_detects_a_concurrent_refresh() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    external_refresh(&store, "/kontena/test1", 30).await;

    writer.refresh().await.unwrap();
    assert!(writer.shared("/kontena/test1").is_some());
}

#[tokio::test]
async fn test_clear_removes_tracked_nodes() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    writer.clear().await.unwrap();

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::CompareAndDelete, "/kontena/test1".to_string()),
        ]
    );
    assert!(store.nodes().is_empty());
}

#[tokio::test]
async fn test_clear_removes_a_refreshed_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    writer.refresh().await.unwrap();
    writer.clear().await.unwrap();

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::CompareAndDelete, "/kontena/test1".to_string()),
        ]
    );
    assert!(store.nodes().is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_clear_leaves_an_externally_modified_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = writer(&store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();

    store
        .set("/kontena/test1", SetOptions::value(r#"{"test":2}"#))
        .await
        .unwrap();

    // the compare-and-delete precondition fails and is swallowed
    writer.clear().await.unwrap();
    assert!(logs_contain("remove /kontena/test1"));

    assert_eq!(
        store.logs(),
        vec![
            (Action::Set, "/kontena/test1".to_string()),
            (Action::Set, "/kontena/test1".to_string()),
        ]
    );
    assert_eq!(
        store.nodes().get("/kontena/test1").map(String::as_str),
        Some(r#"{"test":2}"#)
    );
}

/// Shared-node timeline: our write, an external refresh, and our refresh
/// that first observes the sharing.
async fn shared_node(store: &Arc<FakeStore>) -> Writer {
    let mut writer = writer(store, Some(30));

    writer
        .update(desired(&[("/kontena/test1", r#"{"test":1}"#)]))
        .await
        .unwrap();
    external_refresh(store, "/kontena/test1", 30).await;
    writer.refresh().await.unwrap();

    assert!(writer.shared("/kontena/test1").is_some());
    writer
}

#[tokio::test]
async fn test_clear_does_not_remove_a_shared_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = shared_node(&store).await;

    writer.clear().await.unwrap();

    assert_eq!(
        store.nodes().get("/kontena/test1").map(String::as_str),
        Some(r#"{"test":1}"#)
    );
}

#[tokio::test]
async fn test_refresh_keeps_a_concurrently_refreshed_node_shared() {
    let store = Arc::new(FakeStore::new());
    let mut writer = shared_node(&store).await;

    // not yet enough for the co-owner lease to lapse
    store.tick(20);
    writer.refresh().await.unwrap();
    assert!(writer.shared("/kontena/test1").is_some());

    external_refresh(&store, "/kontena/test1", 30).await;

    // the old claim would have lapsed, but the co-owner renewed it
    store.tick(20);
    writer.refresh().await.unwrap();
    assert!(writer.shared("/kontena/test1").is_some());
}

#[tokio::test]
async fn test_refresh_unmarks_a_lapsed_shared_node() {
    let store = Arc::new(FakeStore::new());
    let mut writer = shared_node(&store).await;

    store.tick(20);
    writer.refresh().await.unwrap();
    assert!(writer.shared("/kontena/test1").is_some());

    // the co-owner never renewed; its recorded claim has lapsed
    store.tick(20);
    writer.refresh().await.unwrap();
    assert!(writer.shared("/kontena/test1").is_none());
}
