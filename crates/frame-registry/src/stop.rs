use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cooperative stop signal a worker checks between iterations and on every
/// queue/reconnect timeout, per §5. `notify` lets a sleeping worker wake
/// immediately instead of riding out its wait.
#[derive(Clone)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn signal(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless stopped first, in which case return
    /// immediately.
    pub async fn wait(&self, duration: std::time::Duration) {
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.notify.notified() => {}
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
