// JobQueue shutdown signal, generalized from a single stop/run boolean to
// the three levels §4.4 requires: `soft` (drain naturally), `normal` (drain
// running, fail buffered), `hard` (fail everything immediately).
//
// Built on a `tokio::sync::watch` channel carrying `ShutdownLevel` rather
// than a plain stop/run boolean.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownLevel {
    #[default]
    Running,
    Soft,
    Normal,
    Hard,
}

impl ShutdownLevel {
    pub fn is_shutdown(self) -> bool {
        self != ShutdownLevel::Running
    }
}

/// Shutdown signal for graceful JobQueue termination.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<ShutdownLevel>,
}

impl ShutdownToken {
    pub fn level(&self) -> ShutdownLevel {
        *self.rx.borrow()
    }

    pub fn is_shutdown(&self) -> bool {
        self.level().is_shutdown()
    }

    /// Wait for the level to change.
    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Shutdown sender, held by whatever calls `stopJobs` / process-signal
/// handling on the worker host.
pub struct ShutdownSender {
    tx: watch::Sender<ShutdownLevel>,
}

impl ShutdownSender {
    pub fn shutdown(&self, level: ShutdownLevel) {
        let _ = self.tx.send(level);
    }
}

pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(ShutdownLevel::Running);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
