pub mod builders;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use std::time::Duration;

use sharenotify::{Action, NotifyEvent};
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Records every event delivered to the callbacks it hands out.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Rc<RefCell<Vec<NotifyEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A watch callback appending to this recorder.
    pub fn callback(&self) -> impl Fn(&NotifyEvent) + 'static + use<> {
        let events = Rc::clone(&self.events);
        move |event: &NotifyEvent| events.borrow_mut().push(event.clone())
    }

    pub fn events(&self) -> Vec<NotifyEvent> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// `(action, path)` pairs in delivery order.
    pub fn actions(&self) -> Vec<(Action, String)> {
        self.events
            .borrow()
            .iter()
            .map(|e| (e.action, e.path.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

/// Poll `cond` every 10ms until it holds or `limit` elapses. Returns whether
/// it held.
///
/// Must run inside `EventLoop::run_until` so the sources feeding `cond`
/// make progress while waiting.
pub async fn wait_for<F>(limit: Duration, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
