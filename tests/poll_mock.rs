// tests/poll_mock.rs
//
// Polling backend over the in-memory filesystem with paused time, so every
// tick is deterministic.

mod common;
use crate::common::{init_tracing, mock_poll_registry, EventRecorder};

use std::time::Duration;

use sharenotify::fs::mock::MockFileSystem;
use sharenotify::{Action, ChangeMask, EventLoop, NotifyContext, ScopeConfig};

/// Advance past the next poll tick.
async fn tick(event_loop: &EventLoop) {
    event_loop
        .run_until(tokio::time::sleep(Duration::from_millis(110)))
        .await;
}

fn export_fs() -> MockFileSystem {
    let fs = MockFileSystem::new();
    fs.add_dir("/export/public");
    fs
}

#[tokio::test(start_paused = true)]
async fn created_file_is_reported_within_two_hundred_ms() {
    init_tracing();
    let fs = export_fs();
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx =
        NotifyContext::create(&registry, &ScopeConfig::with_backend("poll-100ms"), &event_loop)
            .unwrap();

    let recorder = EventRecorder::new();
    ctx.watch(
        "/export/public",
        ChangeMask::CREATED | ChangeMask::DELETED,
        false,
        recorder.callback(),
    )
    .unwrap();

    fs.write_file("/export/public/a.txt", b"a");
    event_loop
        .run_until(tokio::time::sleep(Duration::from_millis(200)))
        .await;
    assert_eq!(recorder.actions(), vec![(Action::Created, "a.txt".to_string())]);

    fs.remove("/export/public/a.txt");
    tick(&event_loop).await;
    assert_eq!(recorder.actions()[1], (Action::Deleted, "a.txt".to_string()));
    assert_eq!(recorder.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn disjoint_filters_fire_independently() {
    let fs = export_fs();
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let created = EventRecorder::new();
    let deleted = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::CREATED, false, created.callback())
        .unwrap();
    ctx.watch("/export/public", ChangeMask::DELETED, false, deleted.callback())
        .unwrap();
    // One native root serves both entries.
    assert_eq!(ctx.stats().native_resources, 2);

    fs.write_file("/export/public/f", b"x");
    tick(&event_loop).await;
    assert_eq!(created.len(), 1);
    assert!(deleted.is_empty());

    fs.remove("/export/public/f");
    tick(&event_loop).await;
    assert_eq!(created.len(), 1);
    assert_eq!(deleted.actions(), vec![(Action::Deleted, "f".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn rewrite_is_reported_as_modified() {
    let fs = export_fs();
    fs.write_file("/export/public/f", b"one");
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let recorder = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::ALL, false, recorder.callback())
        .unwrap();

    fs.write_file("/export/public/f", b"two");
    tick(&event_loop).await;
    assert_eq!(recorder.actions(), vec![(Action::Modified, "f".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn opposite_changes_within_one_interval_cancel_out() {
    let fs = export_fs();
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let recorder = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::ALL, false, recorder.callback())
        .unwrap();

    fs.write_file("/export/public/tmp", b"x");
    fs.remove("/export/public/tmp");
    tick(&event_loop).await;
    assert!(recorder.is_empty());
}

#[tokio::test(start_paused = true)]
async fn upgrading_to_recursive_keeps_pending_top_level_changes() {
    let fs = export_fs();
    fs.add_dir("/export/public/sub");
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let flat = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::CREATED, false, flat.callback())
        .unwrap();

    // Happens before the second entry deepens the snapshot.
    fs.write_file("/export/public/top", b"x");

    let deep = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::CREATED, true, deep.callback())
        .unwrap();
    fs.write_file("/export/public/sub/inner", b"y");

    tick(&event_loop).await;
    assert_eq!(flat.actions(), vec![(Action::Created, "top".to_string())]);
    assert_eq!(
        deep.actions(),
        vec![
            (Action::Created, "sub/inner".to_string()),
            (Action::Created, "top".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unreadable_root_delivers_a_single_overflow() {
    let fs = export_fs();
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let recorder = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::CREATED, false, recorder.callback())
        .unwrap();

    fs.set_unreadable("/export/public", true);
    tick(&event_loop).await;
    tick(&event_loop).await;
    assert_eq!(recorder.actions(), vec![(Action::Overflow, String::new())]);
    assert_eq!(ctx.stats().overflows_delivered, 1);

    fs.set_unreadable("/export/public", false);
    fs.write_file("/export/public/back", b"x");
    tick(&event_loop).await;
    assert_eq!(recorder.actions()[1], (Action::Created, "back".to_string()));
}

#[tokio::test(start_paused = true)]
async fn max_roots_option_caps_polled_roots() {
    let fs = export_fs();
    fs.add_dir("/export/other");
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let scope = ScopeConfig::default().option("max_roots", "1");
    let mut ctx = NotifyContext::create(&registry, &scope, &event_loop).unwrap();

    ctx.watch("/export/public", ChangeMask::ALL, false, |_| {}).unwrap();
    let err = ctx
        .watch("/export/other", ChangeMask::ALL, false, |_| {})
        .unwrap_err();
    assert!(matches!(err, sharenotify::NotifyError::ResourceExhausted(_)));
}

#[tokio::test(start_paused = true)]
async fn failed_recursive_upgrade_is_rolled_back() {
    let fs = export_fs();
    fs.write_file("/export/public/sub/old", b"x");
    let registry = mock_poll_registry(&fs);
    let event_loop = EventLoop::new();
    let mut ctx = NotifyContext::create(&registry, &ScopeConfig::default(), &event_loop).unwrap();

    let flat = EventRecorder::new();
    ctx.watch("/export/public", ChangeMask::ALL, false, flat.callback())
        .unwrap();

    fs.set_unreadable("/export/public", true);
    let deep = EventRecorder::new();
    let err = ctx
        .watch("/export/public", ChangeMask::ALL, true, deep.callback())
        .unwrap_err();
    assert!(matches!(err, sharenotify::NotifyError::PathUnavailable { .. }));
    assert_eq!(ctx.stats().active_watches, 1);

    fs.set_unreadable("/export/public", false);
    tick(&event_loop).await;
    assert!(flat.is_empty());

    // The root stayed flat: a fresh recursive entry baselines nested files.
    ctx.watch("/export/public", ChangeMask::ALL, true, deep.callback())
        .unwrap();
    fs.write_file("/export/public/sub/new", b"y");
    tick(&event_loop).await;
    assert_eq!(deep.actions(), vec![(Action::Created, "sub/new".to_string())]);
    assert!(flat.is_empty());
}
