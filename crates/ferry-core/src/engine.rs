//! Engine context and cooperative shutdown.
//!
//! Configuration, the shared store, the dataset-repository client, and the
//! plugin registry are wired together once at startup and passed explicitly
//! to every operation; nothing in the engine reaches for process globals.
//! Tests build a context over in-memory fakes.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::dataset::DatasetRepository;
use crate::kv::KvStore;
use crate::plugin::PluginRegistry;

/// Sender side of the process-wide stop broadcast.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Fire the stop signal. Every [`Shutdown`] observer transitions to
    /// drain-and-exit; firing twice is harmless.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    /// Subscribe a new observer.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observer side of the stop broadcast.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a connected handle/observer pair.
    pub fn new_pair() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    /// Whether the stop signal has fired.
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the stop signal fires.
    ///
    /// Resolves immediately when it already has, or when the handle was
    /// dropped (a vanished handle means the process is coming down).
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Everything an engine operation needs, wired once at startup.
///
/// Clones are cheap and share the same store, repository, and stop signal;
/// background tasks take their own clone.
#[derive(Clone)]
pub struct Engine {
    pub config: Arc<Config>,
    pub store: Arc<dyn KvStore>,
    pub repo: Arc<dyn DatasetRepository>,
    pub plugins: PluginRegistry,
    pub shutdown: Shutdown,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        repo: Arc<dyn DatasetRepository>,
        plugins: PluginRegistry,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            repo,
            plugins,
            shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_reaches_every_observer() {
        let (handle, shutdown) = Shutdown::new_pair();
        let mut a = shutdown.clone();
        let mut b = handle.subscribe();
        assert!(!a.is_stopped());

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), a.cancelled())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.cancelled())
            .await
            .unwrap();
        assert!(shutdown.is_stopped());
    }

    #[tokio::test]
    async fn dropped_handle_counts_as_stop() {
        let (handle, mut shutdown) = Shutdown::new_pair();
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_after_stop() {
        let (handle, mut shutdown) = Shutdown::new_pair();
        handle.stop();
        shutdown.cancelled().await;
    }
}
