//! StorageBackend records, versioning and periodic sync.

use std::time::Duration;

use gitstore::backend::{Record, VERBOSE_NAME};
use serde_json::json;

use crate::helpers::{
    Fixture, PrefixOwner, commit_to_remote, commits_touching, eventually, head_id, remote_log,
};

fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

#[tokio::test]
async fn create_refuses_existing_path() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let a1 = record(json!({"id": "a1", "title": "first"}));

    backend.create("items/a1", &a1, None).await.unwrap();
    let err = backend.create("items/a1", &a1, None).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(backend.read("items/a1").await.unwrap(), a1);
}

#[tokio::test]
async fn missing_record_is_not_found() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;

    let err = backend.read("items/nope").await.unwrap_err();

    assert!(err.is_not_found());
}

#[tokio::test]
async fn commit_leaves_other_paths_uncommitted() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);

    backend
        .create("items/a1", &record(json!({"id": "a1"})), None)
        .await
        .unwrap();
    backend
        .create("items/a2", &record(json!({"id": "a2"})), None)
        .await
        .unwrap();

    let count = backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(backend.list_uncommitted().await.unwrap(), vec!["items/a2"]);
    assert!(backend.engine().is_push_pending());
    assert!(backend.check_uncommitted().await.unwrap());

    let again = backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn commit_resets_unowned_changes() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    fx.write("stray/file.json", "{}");
    fx.write("README.md", "scribbled");

    backend
        .create("items/a1", &record(json!({"id": "a1"})), None)
        .await
        .unwrap();
    backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();

    assert!(fx.read("stray/file.json").is_none());
    assert_eq!(fx.read("README.md").as_deref(), Some("seed\n"));
    assert_eq!(commits_touching(&fx.work_dir, "stray/file.json"), 0);
}

#[tokio::test]
async fn dropped_manager_no_longer_owns_paths() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    drop(items);
    fx.write("items/a1", "{}");

    let orphaned = backend.reset_orphaned_file_changes().await.unwrap();

    assert_eq!(orphaned, vec!["items/a1"]);
}

#[tokio::test]
async fn delete_then_commit_removes_from_history() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    backend
        .create("items/a1", &record(json!({"id": "a1"})), None)
        .await
        .unwrap();
    backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();

    backend.delete("items/a1").await.unwrap();
    assert!(fx.read("items/a1").is_none());
    assert_eq!(backend.list_uncommitted().await.unwrap(), vec!["items/a1"]);

    let count = backend
        .commit(&["items/a1".to_string()], "delete item a1")
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert!(backend.list_uncommitted().await.unwrap().is_empty());
    assert_eq!(commits_touching(&fx.work_dir, "items/a1"), 2);
}

#[tokio::test]
async fn discard_restores_committed_state() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    let original = record(json!({"id": "a1", "title": "original"}));
    backend.create("items/a1", &original, None).await.unwrap();
    backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();

    backend
        .update("items/a1", &record(json!({"id": "a1", "title": "edited"})), None)
        .await
        .unwrap();
    backend
        .create("items/a2", &record(json!({"id": "a2"})), None)
        .await
        .unwrap();

    let mut reset = backend
        .discard(&["items/a1".to_string(), "items/a2".to_string()])
        .await
        .unwrap();
    reset.sort();

    assert_eq!(reset, vec!["items/a1", "items/a2"]);
    assert_eq!(backend.read("items/a1").await.unwrap(), original);
    assert!(backend.read("items/a2").await.unwrap_err().is_not_found());
    assert!(!backend.check_uncommitted().await.unwrap());
}

#[tokio::test]
async fn directory_records_are_listed_once() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let meta = vec!["title".to_string()];
    let a1 = record(json!({"id": "a1", "title": "hello", "body": "text"}));

    backend.create("items/a1", &a1, Some(&meta)).await.unwrap();

    assert!(fx.work_dir.join("items/a1/meta.yaml").exists());
    assert!(fx.work_dir.join("items/a1/body.yaml").exists());
    assert_eq!(backend.list_uncommitted().await.unwrap(), vec!["items/a1"]);
    assert_eq!(backend.count_uncommitted().await.unwrap(), 2);
    assert_eq!(backend.read("items/a1").await.unwrap(), a1);
}

#[tokio::test]
async fn index_is_keyed_by_id_field() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    for (path, id) in [("items/x", "a1"), ("items/y", "a2"), ("items/z", "a3")] {
        backend
            .create(path, &record(json!({ "code": id })), None)
            .await
            .unwrap();
    }
    backend
        .create("items/w", &record(json!({"other": true})), None)
        .await
        .unwrap();

    let index = backend.get_index("items", "code", None).await.unwrap();
    assert_eq!(index.keys().collect::<Vec<_>>(), vec!["a1", "a2", "a3"]);

    let only = vec!["x".to_string(), "z".to_string()];
    let index = backend.get_index("items", "code", Some(&only)).await.unwrap();
    assert_eq!(index.keys().collect::<Vec<_>>(), vec!["a1", "a3"]);

    assert_eq!(
        backend.list_ids("items").await.unwrap(),
        vec!["w", "x", "y", "z"]
    );
}

#[tokio::test]
async fn past_versions_are_readable() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    let meta = vec!["title".to_string()];
    let v1 = record(json!({"id": "a1", "title": "v1", "body": "one"}));
    let v2 = record(json!({"id": "a1", "title": "v2", "body": "two"}));

    backend.create("items/a1", &v1, Some(&meta)).await.unwrap();
    backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();
    let first = head_id(&fx.work_dir);
    backend.update("items/a1", &v2, Some(&meta)).await.unwrap();
    backend
        .commit(&["items/a1".to_string()], "update item a1")
        .await
        .unwrap();

    assert_eq!(backend.read_version("items/a1", &first).await.unwrap(), v1);
    assert_eq!(backend.read("items/a1").await.unwrap(), v2);
}

#[tokio::test]
async fn committed_records_reach_the_remote() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);
    backend
        .create("items/a1", &record(json!({"id": "a1"})), None)
        .await
        .unwrap();
    backend
        .commit(&["items/a1".to_string()], "create item a1")
        .await
        .unwrap();

    let outcome = backend.synchronize().await.unwrap();

    assert!(outcome.completed);
    assert_eq!(remote_log(&fx.remote)[0], "create item a1");
}

#[tokio::test]
async fn managers_hear_about_synchronized_data() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    let items = PrefixOwner::new("items");
    backend.register_manager(&items);

    backend.synchronize().await.unwrap();
    assert_eq!(items.notifications(), 1);

    fx.write("items/a1", "{}");
    let outcome = backend.synchronize().await.unwrap();
    assert!(!outcome.possibly_mutated_data);
    assert_eq!(items.notifications(), 1);
}

#[tokio::test]
async fn describe_reports_remote_and_status() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;

    let description = backend.describe();

    assert_eq!(description.verbose_name, VERBOSE_NAME);
    assert_eq!(description.repo_url, fx.repo_url());
    assert_eq!(description.username, "tester");
    assert!(description.status.is_online);
}

#[tokio::test]
async fn init_schedules_and_stop_cancels_timer() {
    let fx = Fixture::new();
    let backend = fx.ready_backend().await;
    assert!(backend.is_scheduled());

    backend.init(false).await.unwrap();
    assert!(backend.is_scheduled());

    backend.stop();
    assert!(!backend.is_scheduled());
}

#[tokio::test]
async fn timer_pulls_remote_changes() {
    let fx = Fixture::new();
    let backend = fx.backend_with_interval(Duration::from_millis(100));
    backend
        .set_password(Some(crate::helpers::PASSWORD.to_string()))
        .await;
    backend.init(false).await.unwrap();

    commit_to_remote(&fx.remote, "remote.txt", "theirs", "remote change");

    assert!(
        eventually(Duration::from_secs(10), || fx.read("remote.txt").is_some()).await,
        "periodic sync never pulled the remote commit"
    );
    backend.stop();
}
