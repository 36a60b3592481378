#![allow(dead_code)]

pub use sharenotify_test_utils::builders;
pub use sharenotify_test_utils::{init_tracing, wait_for, with_timeout, EventRecorder};

use std::sync::Arc;
use std::time::Duration;

use sharenotify::backend::{PollConfig, StubController};
use sharenotify::fs::mock::MockFileSystem;
use sharenotify::{BackendKind, BackendRegistry};

/// Registry with one stub backend named `"stub"`.
pub fn stub_registry() -> (BackendRegistry, StubController) {
    let controller = StubController::new();
    let mut registry = BackendRegistry::new();
    registry
        .register("stub", BackendKind::Stub(controller.clone()))
        .expect("register stub");
    (registry, controller)
}

/// Registry with a `"poll-100ms"` backend reading the real filesystem.
pub fn poll_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .register(
            "poll-100ms",
            BackendKind::Polling(PollConfig::new(Duration::from_millis(100))),
        )
        .expect("register poll-100ms");
    registry
}

/// Registry with a `"poll-100ms"` backend reading `fs`.
pub fn mock_poll_registry(fs: &MockFileSystem) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .register(
            "poll-100ms",
            BackendKind::Polling(
                PollConfig::new(Duration::from_millis(100)).with_filesystem(Arc::new(fs.clone())),
            ),
        )
        .expect("register poll-100ms");
    registry
}
