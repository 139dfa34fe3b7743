//! Tests for the fetch coordinator
//!
//! Deduplication, worker-pool queueing and cooperative stop, driven by a
//! scripted in-memory fetcher.

mod common;

use common::{eventually, payload, temp_dir, Script, ScriptedFetcher};
use core_preload::cache::{CacheDirectory, DirectoryOptions, EntryState};
use core_preload::{CacheKey, FetchCoordinator, FetchOutcome, FetchStatus, ResolvedSource};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn source(url: &str) -> ResolvedSource {
    ResolvedSource {
        key: CacheKey::new(url),
        url: url.to_string(),
        backup_urls: Vec::new(),
    }
}

async fn open_dir() -> (Arc<CacheDirectory>, PathBuf) {
    let root = temp_dir("preload-fetch");
    let dir = CacheDirectory::open(&root, DirectoryOptions::default().with_bounds(1 << 24, 100))
        .await
        .unwrap();
    (dir, root)
}

#[tokio::test]
async fn test_same_key_shares_one_download() {
    let (dir, root) = open_dir().await;
    let url = "https://cdn.example.com/shared.mp4";
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        url,
        Script::Gated {
            data: payload(4_000),
            chunk: 1_000,
            gate: gate.clone(),
        },
    );

    let coordinator = FetchCoordinator::new(fetcher.clone(), 4, 1_000, Handle::current());
    let first = coordinator.submit(dir.clone(), source(url), 4_000);
    let second = coordinator.submit(dir.clone(), source(url), 4_000);

    assert!(!first.is_deduplicated());
    assert!(second.is_deduplicated());
    assert_eq!(coordinator.inflight_count(), 1);
    assert!(coordinator.is_inflight(dir.root(), &CacheKey::new(url)));

    gate.add_permits(4);
    let (a, b) = tokio::join!(first.wait(), second.wait());

    assert_eq!(a.entry().unwrap().downloaded_bytes, 4_000);
    assert_eq!(b.entry().unwrap().state, EntryState::Complete);
    assert_eq!(fetcher.calls_for(url), vec![0]);
    assert_eq!(coordinator.inflight_count(), 0);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_larger_limit_extends_running_download() {
    let (dir, root) = open_dir().await;
    let url = "https://cdn.example.com/extended.mp4";
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        url,
        Script::Gated {
            data: payload(4_000),
            chunk: 1_000,
            gate: gate.clone(),
        },
    );

    let coordinator = FetchCoordinator::new(fetcher.clone(), 4, 1_000, Handle::current());
    let small = coordinator.submit(dir.clone(), source(url), 2_000);
    let large = coordinator.submit(dir.clone(), source(url), 4_000);
    let covered = coordinator.submit(dir.clone(), source(url), 3_000);

    assert!(!large.is_deduplicated());
    assert!(covered.is_deduplicated());
    assert_eq!(coordinator.inflight_count(), 1);

    gate.add_permits(4);
    let (a, b, c) = tokio::join!(small.wait(), large.wait(), covered.wait());

    assert_eq!(a.entry().unwrap().downloaded_bytes, 2_000);
    assert_eq!(b.entry().unwrap().downloaded_bytes, 4_000);
    assert_eq!(b.entry().unwrap().state, EntryState::Complete);
    assert_eq!(c.entry().unwrap().downloaded_bytes, 4_000);
    assert_eq!(fetcher.calls_for(url), vec![0, 2_000]);
    assert_eq!(coordinator.inflight_count(), 0);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_cancelled_caller_submits_nothing() {
    let (dir, root) = open_dir().await;
    let url = "https://cdn.example.com/skipped.mp4";
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(url, payload(1_000), 500);

    let coordinator = FetchCoordinator::new(fetcher.clone(), 1, 500, Handle::current());
    let batch = CancellationToken::new();
    batch.cancel();

    let handle = coordinator.submit_unless_cancelled(dir.clone(), source(url), 1_000, &batch);
    assert!(handle.is_none());
    assert_eq!(coordinator.inflight_count(), 0);

    let live = CancellationToken::new();
    let handle = coordinator
        .submit_unless_cancelled(dir.clone(), source(url), 1_000, &live)
        .unwrap();
    assert!(handle.wait().await.is_completed());
    assert_eq!(fetcher.calls_for(url), vec![0]);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_same_key_in_other_directory_is_separate() {
    let (dir_a, root_a) = open_dir().await;
    let (dir_b, root_b) = open_dir().await;
    let url = "https://cdn.example.com/twice.mp4";
    let fetcher = ScriptedFetcher::new();
    fetcher.serve(url, payload(500), 100);

    let coordinator = FetchCoordinator::new(fetcher.clone(), 2, 100, Handle::current());
    let a = coordinator.submit(dir_a.clone(), source(url), 500);
    let b = coordinator.submit(dir_b.clone(), source(url), 500);
    assert!(!b.is_deduplicated());

    assert!(a.wait().await.is_completed());
    assert!(b.wait().await.is_completed());
    assert_eq!(fetcher.calls_for(url).len(), 2);

    std::fs::remove_dir_all(root_a).ok();
    std::fs::remove_dir_all(root_b).ok();
}

#[tokio::test]
async fn test_queued_tasks_start_in_submission_order() {
    let (dir, root) = open_dir().await;
    let gate = Arc::new(Semaphore::new(0));
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        "https://cdn.example.com/first.mp4",
        Script::Gated {
            data: payload(100),
            chunk: 100,
            gate: gate.clone(),
        },
    );
    for name in ["second", "third", "fourth"] {
        fetcher.serve(&format!("https://cdn.example.com/{name}.mp4"), payload(100), 100);
    }

    let coordinator = FetchCoordinator::new(fetcher.clone(), 1, 100, Handle::current());
    let handles: Vec<_> = ["first", "second", "third", "fourth"]
        .iter()
        .map(|name| {
            coordinator.submit(
                dir.clone(),
                source(&format!("https://cdn.example.com/{name}.mp4")),
                100,
            )
        })
        .collect();

    assert!(eventually(|| fetcher.calls().len() == 1).await);
    assert_eq!(coordinator.available_workers(), 0);
    assert!(matches!(handles[3].status(), FetchStatus::Queued));

    gate.add_permits(1);
    for handle in handles {
        assert!(handle.wait().await.is_completed());
    }

    let order: Vec<String> = fetcher.calls().into_iter().map(|(url, _)| url).collect();
    assert_eq!(
        order,
        vec![
            "https://cdn.example.com/first.mp4",
            "https://cdn.example.com/second.mp4",
            "https://cdn.example.com/third.mp4",
            "https://cdn.example.com/fourth.mp4",
        ]
    );
    assert_eq!(coordinator.available_workers(), 1);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_stop_all_cancels_running_and_queued() {
    let (dir, root) = open_dir().await;
    let running_url = "https://cdn.example.com/running.mp4";
    let queued_url = "https://cdn.example.com/queued.mp4";
    let gate = Arc::new(Semaphore::new(1));
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        running_url,
        Script::Gated {
            data: payload(3_000),
            chunk: 1_000,
            gate: gate.clone(),
        },
    );
    fetcher.serve(queued_url, payload(3_000), 1_000);

    let coordinator = FetchCoordinator::new(fetcher.clone(), 1, 1_000, Handle::current());
    let running = coordinator.submit(dir.clone(), source(running_url), 3_000);
    let queued = coordinator.submit(dir.clone(), source(queued_url), 3_000);

    let running_key = CacheKey::new(running_url);
    assert!(eventually(|| dir
        .lookup(&running_key)
        .is_some_and(|entry| entry.downloaded_bytes == 1_000))
    .await);

    let stopped = coordinator.stop_all().await;
    assert_eq!(stopped, 2);
    assert_eq!(coordinator.inflight_count(), 0);

    match running.wait().await {
        FetchOutcome::Cancelled(Some(entry)) => {
            assert_eq!(entry.state, EntryState::Partial);
            assert_eq!(entry.downloaded_bytes, 1_000);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(matches!(queued.wait().await, FetchOutcome::Cancelled(None)));
    assert!(fetcher.calls_for(queued_url).is_empty());
    assert!(!dir.is_writing(&running_key));

    // The coordinator keeps working after a stop and resumes the partial entry.
    gate.add_permits(2);
    let resumed = coordinator.submit(dir.clone(), source(running_url), 3_000);
    assert!(!resumed.is_deduplicated());
    let entry = resumed.wait().await.entry().cloned().unwrap();
    assert_eq!(entry.state, EntryState::Complete);
    assert_eq!(fetcher.calls_for(running_url), vec![0, 1_000]);

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_unsized_source_completes_when_exhausted() {
    let (dir, root) = open_dir().await;
    let url = "https://cdn.example.com/live.mp4";
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        url,
        Script::ServeUnsized {
            data: payload(2_500),
            chunk: 1_000,
        },
    );

    let coordinator = FetchCoordinator::new(fetcher, 1, 1_000, Handle::current());
    let outcome = coordinator.submit(dir.clone(), source(url), 10_000).wait().await;

    let entry = outcome.entry().unwrap();
    assert_eq!(entry.state, EntryState::Complete);
    assert_eq!(entry.total_bytes, Some(2_500));

    std::fs::remove_dir_all(root).ok();
}

#[tokio::test]
async fn test_stream_error_keeps_stored_prefix() {
    let (dir, root) = open_dir().await;
    let url = "https://cdn.example.com/flaky.mp4";
    let fetcher = ScriptedFetcher::new();
    fetcher.script(
        url,
        Script::BreakAt {
            data: payload(5_000),
            chunk: 1_000,
            fail_at: 2_000,
        },
    );

    let coordinator = FetchCoordinator::new(fetcher, 1, 1_000, Handle::current());
    let outcome = coordinator.submit(dir.clone(), source(url), 5_000).wait().await;

    assert!(matches!(outcome, FetchOutcome::Failed(_)));
    let entry = dir.lookup(&CacheKey::new(url)).unwrap();
    assert_eq!(entry.state, EntryState::Failed);
    assert_eq!(entry.downloaded_bytes, 2_000);

    std::fs::remove_dir_all(root).ok();
}
