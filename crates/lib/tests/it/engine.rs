//! SyncEngine against a real bare remote.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gitstore::sync::{Status, StatusRelativeToLocal, StatusReporter, SyncError};
use gitstore::{SyncEngine, SyncOutcome};

use crate::helpers::{
    Fixture, PASSWORD, commit_to_remote, commits_touching, head_id, local_log, remote_log,
};

const SKIPPED: SyncOutcome = SyncOutcome {
    completed: false,
    possibly_mutated_data: false,
};

const COMPLETED: SyncOutcome = SyncOutcome {
    completed: true,
    possibly_mutated_data: true,
};

#[tokio::test]
async fn synchronize_clones_missing_working_copy() {
    let fx = Fixture::new();
    let engine = fx.engine();
    engine.set_password(Some(PASSWORD.to_string())).await;
    assert!(!engine.is_initialized());

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, COMPLETED);
    assert!(engine.is_initialized());
    assert_eq!(fx.read("README.md").as_deref(), Some("seed\n"));

    let status = engine.status();
    assert!(status.is_online);
    assert_eq!(status.status_relative_to_local, StatusRelativeToLocal::Updated);
    assert!(status.last_synchronized.is_some());
    assert!(!status.is_pulling);
    assert!(!status.is_pushing);
}

#[tokio::test]
async fn init_is_a_no_op_for_matching_working_copy() {
    let fx = Fixture::new();
    let engine = fx.engine();

    assert!(engine.init(false).await.unwrap());
    assert!(!engine.init(false).await.unwrap());
    assert!(engine.is_using_remote_url(&fx.repo_url()).unwrap());
}

#[tokio::test]
async fn init_reclones_when_origin_points_elsewhere() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("stray.txt", "left behind");

    engine
        .config_set("remote.origin.url", "/nowhere/else.git")
        .unwrap();
    assert!(!engine.is_using_remote_url(&fx.repo_url()).unwrap());

    assert!(engine.init(false).await.unwrap());
    assert!(engine.is_using_remote_url(&fx.repo_url()).unwrap());
    assert!(fx.read("stray.txt").is_none());
}

#[tokio::test]
async fn init_force_reset_wipes_local_commits() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("note.txt", "draft");
    engine
        .stage_and_commit(&["note.txt"], "local only", false)
        .await
        .unwrap();

    assert!(engine.init(true).await.unwrap());

    assert!(fx.read("note.txt").is_none());
    assert!(engine.list_local_commits().unwrap().is_empty());
}

#[tokio::test]
async fn failed_initialization_leaves_no_working_copy() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.repo_url = fx.path("missing.git").to_string_lossy().into_owned();
    let engine = SyncEngine::new(config);

    let err = engine.init(false).await.unwrap_err();

    assert!(err.is_initialization_error());
    assert!(!fx.work_dir.exists());
}

#[tokio::test]
async fn uncommitted_changes_block_pull() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    commit_to_remote(&fx.remote, "remote.txt", "from elsewhere", "remote change");
    fx.write("items/a1", "{}");

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, SKIPPED);
    assert!(fx.read("remote.txt").is_none());
    let status = engine.status();
    assert!(status.has_local_changes);
    assert!(!status.is_pulling);
}

#[tokio::test]
async fn missing_password_skips_without_network() {
    let fx = Fixture::new();
    let engine = fx.engine();
    engine.force_initialize().await.unwrap();
    commit_to_remote(&fx.remote, "remote.txt", "from elsewhere", "remote change");

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, SKIPPED);
    assert!(engine.status().needs_password);
    assert!(fx.read("remote.txt").is_none());
}

#[tokio::test]
async fn pull_fast_forwards_remote_commits() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    commit_to_remote(&fx.remote, "remote.txt", "from elsewhere", "remote change");

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, COMPLETED);
    assert_eq!(fx.read("remote.txt").as_deref(), Some("from elsewhere"));
    assert_eq!(local_log(&fx.work_dir)[0], "remote change");
}

#[tokio::test]
async fn committed_changes_are_pushed() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a1", r#"{"id":"a1"}"#);

    let count = engine
        .stage_and_commit(&["items/a1"], "create item a1", false)
        .await
        .unwrap();
    assert_eq!(count, 1);
    engine.request_push().await;
    assert_eq!(
        engine.status().status_relative_to_local,
        StatusRelativeToLocal::Behind
    );
    assert_eq!(engine.list_local_commits().unwrap(), vec!["create item a1"]);

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, COMPLETED);
    assert!(!engine.is_push_pending());
    assert_eq!(remote_log(&fx.remote)[0], "create item a1");
    assert!(engine.list_local_commits().unwrap().is_empty());
    assert_eq!(
        engine.status().status_relative_to_local,
        StatusRelativeToLocal::Updated
    );
}

#[tokio::test]
async fn local_commits_are_pushed_without_explicit_request() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("note.txt", "hello");
    engine
        .stage_and_commit(&["note.txt"], "add note", false)
        .await
        .unwrap();
    assert!(!engine.is_push_pending());

    engine.synchronize().await.unwrap();

    assert_eq!(remote_log(&fx.remote)[0], "add note");
}

#[tokio::test]
async fn divergence_is_reported_and_push_withheld() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("local.txt", "mine");
    engine
        .stage_and_commit(&["local.txt"], "local change", false)
        .await
        .unwrap();
    engine.request_push().await;
    commit_to_remote(&fx.remote, "remote.txt", "theirs", "remote change");

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, SKIPPED);
    let status = engine.status();
    assert_eq!(status.status_relative_to_local, StatusRelativeToLocal::Diverged);
    assert!(!status.is_pulling);
    assert!(!status.is_pushing);
    assert!(engine.is_push_pending());
    assert!(!remote_log(&fx.remote).contains(&"local change".to_string()));
}

#[tokio::test]
async fn unreachable_remote_marks_offline() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    std::fs::remove_dir_all(&fx.remote).unwrap();

    let outcome = engine.synchronize().await.unwrap();

    assert_eq!(outcome, SKIPPED);
    let status = engine.status();
    assert!(!status.is_online);
    assert!(status.last_synchronized.is_some());
}

#[tokio::test]
async fn busy_lock_skips_the_cycle() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    commit_to_remote(&fx.remote, "remote.txt", "theirs", "remote change");

    let guard = engine.lock().try_acquire().unwrap();
    let outcome = engine.synchronize().await.unwrap();
    drop(guard);

    assert_eq!(outcome, SKIPPED);
    assert!(fx.read("remote.txt").is_none());

    assert_eq!(engine.synchronize().await.unwrap(), COMPLETED);
    assert!(fx.read("remote.txt").is_some());
}

#[tokio::test]
async fn commit_takes_only_selected_paths() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a1", "one");
    fx.write("items/a2", "two");
    fx.write("other/b1", "three");

    let count = engine
        .stage_and_commit(&["items/a1"], "just a1", false)
        .await
        .unwrap();

    assert_eq!(count, 1);
    let remaining = engine.list_changed_files(&["."]).unwrap();
    assert_eq!(remaining, vec!["items/a2", "other/b1"]);
    assert_eq!(commits_touching(&fx.work_dir, "items/a2"), 0);
}

#[tokio::test]
async fn committing_twice_is_idempotent() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a1", "one");

    assert_eq!(
        engine
            .stage_and_commit(&["items/a1"], "first", false)
            .await
            .unwrap(),
        1
    );
    let head = head_id(&fx.work_dir);
    assert_eq!(
        engine
            .stage_and_commit(&["items/a1"], "second", false)
            .await
            .unwrap(),
        0
    );
    assert_eq!(head_id(&fx.work_dir), head);
}

#[tokio::test]
async fn removals_are_committed() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    std::fs::remove_file(fx.work_dir.join("README.md")).unwrap();

    let count = engine
        .stage_and_commit(&["README.md"], "drop readme", true)
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert!(engine.list_changed_files(&["."]).unwrap().is_empty());
    assert!(
        engine
            .read_file_at_commit("README.md", "HEAD")
            .unwrap_err()
            .git_code()
            .is_some()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_of_same_path_produce_one_commit() {
    let fx = Fixture::new();
    let engine = Arc::new(fx.ready_engine().await);
    fx.write("items/a1", "one");

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.stage_and_commit(&["items/a1"], "msg", false).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.stage_and_commit(&["items/a1"], "msg", false).await }
    });

    let committed: usize = [first.await.unwrap(), second.await.unwrap()]
        .into_iter()
        .map(|r| r.unwrap())
        .sum();

    assert_eq!(committed, 1);
    assert_eq!(commits_touching(&fx.work_dir, "items/a1"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_either_succeed_or_fail_on_lock() {
    const WRITERS: usize = 6;
    let fx = Fixture::new();
    let engine = Arc::new(fx.ready_engine().await);
    for i in 0..WRITERS {
        fx.write(&format!("items/a{i}"), &i.to_string());
    }

    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let path = format!("items/a{i}");
                engine
                    .stage_and_commit(&[path.as_str()], &format!("create item a{i}"), false)
                    .await
            })
        })
        .collect();

    let mut committed = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(count) => committed += count,
            Err(e) if e.is_lock_error() => refused += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(committed + refused, WRITERS);
    assert_eq!(engine.list_local_commits().unwrap().len(), committed);
    assert_eq!(
        engine.list_changed_files(&["items"]).unwrap().len(),
        refused
    );
}

#[tokio::test]
async fn commit_matches_paths_literally() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a", "plain");
    fx.write("items/[ab]", "bracketed");

    let count = engine
        .stage_and_commit(&["items/[ab]"], "create item [ab]", false)
        .await
        .unwrap();

    assert_eq!(count, 1);
    assert_eq!(engine.list_changed_files(&["."]).unwrap(), vec!["items/a"]);
    assert_eq!(commits_touching(&fx.work_dir, "items/a"), 0);
    assert_eq!(commits_touching(&fx.work_dir, "items/[ab]"), 1);
}

#[tokio::test]
async fn reset_matches_paths_literally() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a", "v1");
    fx.write("items/[ab]", "v1");
    engine
        .stage_and_commit(&["items"], "two items", false)
        .await
        .unwrap();
    fx.write("items/a", "v2");
    fx.write("items/[ab]", "v2");

    let reset = engine.reset_files(Some(&["items/[ab]"][..])).await.unwrap();

    assert_eq!(reset, vec!["items/[ab]"]);
    assert_eq!(fx.read("items/[ab]").as_deref(), Some("v1"));
    assert_eq!(fx.read("items/a").as_deref(), Some("v2"));
    assert_eq!(engine.list_changed_files(&["."]).unwrap(), vec!["items/a"]);
}

/// Head commit, changed paths and their contents.
fn working_copy_state(
    fx: &Fixture,
    engine: &SyncEngine,
) -> (String, Vec<(String, Option<String>)>) {
    let changed = engine
        .list_changed_files(&["."])
        .unwrap()
        .into_iter()
        .map(|path| {
            let content = fx.read(&path);
            (path, content)
        })
        .collect();
    (head_id(&fx.work_dir), changed)
}

/// Retry `op` while it fails only because the staging lock was contended.
async fn until_locked<T, F, Fut>(mut op: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, SyncError>>,
{
    loop {
        match op().await {
            Ok(value) => return value,
            Err(e) if e.is_lock_error() => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sync_commit_and_discard_never_overlap() {
    const ITEMS: usize = 4;
    let fx = Fixture::new();
    let engine = Arc::new(fx.ready_engine().await);
    for i in 0..ITEMS {
        fx.write(&format!("items/a{i}"), "draft");
    }
    fx.write("scratch/s1", "throwaway");

    let committer = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            for i in 0..ITEMS {
                let path = format!("items/a{i}");
                let paths = [path.as_str()];
                let message = format!("create item a{i}");
                until_locked(|| engine.stage_and_commit(&paths, &message, false)).await;
            }
        }
    });
    let discarder = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            let scratch = ["scratch"];
            until_locked(|| engine.reset_files(Some(&scratch[..]))).await
        }
    });
    let syncer = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move {
            for _ in 0..10 {
                engine.synchronize().await.unwrap();
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
        }
    });

    // While the lock is held here, no guarded body may touch the working copy.
    for _ in 0..10 {
        let guard = until_locked(|| engine.lock().acquire()).await;
        let before = working_copy_state(&fx, &engine);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(working_copy_state(&fx, &engine), before);
        drop(guard);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    committer.await.unwrap();
    assert_eq!(discarder.await.unwrap(), vec!["scratch/s1"]);
    syncer.await.unwrap();

    for i in 0..ITEMS {
        assert_eq!(commits_touching(&fx.work_dir, &format!("items/a{i}")), 1);
    }
    assert!(fx.read("scratch/s1").is_none());
    assert_eq!(engine.synchronize().await.unwrap(), COMPLETED);
    assert!(remote_log(&fx.remote).contains(&"create item a3".to_string()));
}

#[tokio::test]
async fn failed_cycle_does_not_stay_pulling() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    std::fs::write(fx.work_dir.join(".git/refs/heads/main"), "not a commit id\n").unwrap();

    assert!(engine.synchronize().await.is_err());

    assert!(!engine.status().is_pulling);
}

#[tokio::test]
async fn no_paths_is_rejected() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;

    let err = engine
        .stage_and_commit::<&str>(&[], "nothing", false)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NoPathsGiven));
}

#[tokio::test]
async fn missing_identity_marks_misconfigured() {
    let fx = Fixture::new();
    let mut config = fx.config();
    config.author_name = String::new();
    let engine = SyncEngine::new(config);
    engine.force_initialize().await.unwrap();
    fx.write("items/a1", "one");

    let err = engine
        .stage_and_commit(&["items/a1"], "create item a1", false)
        .await
        .unwrap_err();

    assert!(err.is_misconfigured());
    assert!(engine.status().is_misconfigured);
}

#[tokio::test]
async fn reset_files_restores_and_removes() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("README.md", "changed");
    fx.write("items/new/body.yaml", "{}");

    let mut reset = engine.reset_files(Some(&["."][..])).await.unwrap();
    reset.sort();

    assert_eq!(reset, vec!["README.md", "items/new/body.yaml"]);
    assert_eq!(fx.read("README.md").as_deref(), Some("seed\n"));
    assert!(!fx.work_dir.join("items").exists());
}

#[tokio::test]
async fn orphaned_changes_are_reset() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write("items/a1", "owned");
    fx.write("junk/x.txt", "nobody's");
    fx.write("README.md", "scribbled");

    let mut orphaned = engine
        .reset_orphaned_file_changes(|path| path.starts_with("items/"))
        .await
        .unwrap();
    orphaned.sort();

    assert_eq!(orphaned, vec!["README.md", "junk/x.txt"]);
    assert_eq!(fx.read("items/a1").as_deref(), Some("owned"));
    assert!(fx.read("junk/x.txt").is_none());
    assert_eq!(fx.read("README.md").as_deref(), Some("seed\n"));
}

#[tokio::test]
async fn os_artifacts_are_ignored_and_cleaned() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    fx.write(".DS_Store", "clutter");

    assert!(engine.list_changed_files(&["."]).unwrap().is_empty());
    assert!(!engine.check_uncommitted().await.unwrap());

    assert_eq!(engine.synchronize().await.unwrap(), COMPLETED);
    assert!(fx.read(".DS_Store").is_none());
}

#[tokio::test]
async fn file_contents_readable_at_past_commit() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    let before = head_id(&fx.work_dir);
    fx.write("README.md", "second version\n");
    engine
        .stage_and_commit(&["README.md"], "edit readme", false)
        .await
        .unwrap();

    assert_eq!(
        engine.read_file_at_commit("README.md", &before).unwrap(),
        b"seed\n"
    );
    assert_eq!(
        engine.read_file_at_commit("README.md", "HEAD").unwrap(),
        b"second version\n"
    );
}

#[derive(Default)]
struct Recorder(Mutex<Vec<Status>>);

#[async_trait]
impl StatusReporter for Recorder {
    async fn report(&self, status: &Status) -> gitstore::Result<()> {
        self.0.lock().unwrap().push(status.clone());
        Ok(())
    }
}

#[tokio::test]
async fn reporter_sees_every_mutation() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let engine = SyncEngine::new(fx.config()).with_reporter(recorder.clone());
    engine.set_password(Some(PASSWORD.to_string())).await;

    engine.synchronize().await.unwrap();

    let seen = recorder.0.lock().unwrap().clone();
    assert!(seen.iter().any(|s| s.is_pulling));
    let last = seen.last().unwrap();
    assert_eq!(last, &engine.status());
    assert_eq!(last.status_relative_to_local, StatusRelativeToLocal::Updated);
}

#[tokio::test]
async fn subscribers_observe_changes() {
    let fx = Fixture::new();
    let engine = fx.ready_engine().await;
    let mut rx = engine.subscribe();
    rx.borrow_and_update();

    engine.request_push().await;

    assert!(rx.has_changed().unwrap());
    assert_eq!(
        rx.borrow_and_update().status_relative_to_local,
        StatusRelativeToLocal::Behind
    );
}

#[tokio::test]
async fn second_device_receives_first_devices_push() {
    let fx = Fixture::new();
    let first = fx.ready_engine().await;
    let second = SyncEngine::new(fx.config_at(fx.path("second")));
    second.set_password(Some(PASSWORD.to_string())).await;
    second.force_initialize().await.unwrap();

    fx.write("items/a1", "shared");
    first
        .stage_and_commit(&["items/a1"], "create item a1", false)
        .await
        .unwrap();
    first.request_push().await;
    assert_eq!(first.synchronize().await.unwrap(), COMPLETED);

    assert_eq!(second.synchronize().await.unwrap(), COMPLETED);
    assert_eq!(
        std::fs::read_to_string(fx.path("second").join("items/a1")).unwrap(),
        "shared"
    );
}
