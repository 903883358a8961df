//! Cache entry lifecycle signals.
//!
//! The cache owns an [`EntrySignals`] per entry and hands out
//! [`EntryLifecycle`] receivers. `loaded` resolves once initial data is in
//! (or fails); `removed` resolves on eviction. A `loaded` wait on an entry
//! evicted before its data arrived never resolves, so callers race the two.

use tokio::sync::watch;

/// Progress of an entry's initial fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Pending,
    Loaded,
    Failed(String),
}

/// Resolves when initial data is available.
#[derive(Debug, Clone)]
pub struct LoadSignal {
    rx: watch::Receiver<LoadState>,
}

impl LoadSignal {
    /// Wait for the initial fetch to settle.
    ///
    /// Returns `Err(reason)` if it failed. Pends forever if the entry is
    /// dropped while still pending.
    pub async fn wait(&mut self) -> Result<(), String> {
        loop {
            let state = self.rx.borrow_and_update().clone();
            match state {
                LoadState::Loaded => return Ok(()),
                LoadState::Failed(reason) => return Err(reason),
                LoadState::Pending => {}
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    pub fn current(&self) -> LoadState {
        self.rx.borrow().clone()
    }
}

/// Resolves when the entry is evicted.
#[derive(Debug, Clone)]
pub struct RemovalSignal {
    rx: watch::Receiver<bool>,
}

impl RemovalSignal {
    /// Wait for eviction. A dropped sender counts as eviction.
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn is_removed(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Receiver half handed to the synchronizer when an entry is created.
#[derive(Debug, Clone)]
pub struct EntryLifecycle {
    pub loaded: LoadSignal,
    pub removed: RemovalSignal,
}

/// Sender half held by the cache.
#[derive(Debug)]
pub struct EntrySignals {
    loaded: watch::Sender<LoadState>,
    removed: watch::Sender<bool>,
}

impl EntrySignals {
    pub fn new() -> Self {
        let (loaded, _) = watch::channel(LoadState::Pending);
        let (removed, _) = watch::channel(false);
        Self { loaded, removed }
    }

    pub fn subscribe(&self) -> EntryLifecycle {
        EntryLifecycle {
            loaded: LoadSignal {
                rx: self.loaded.subscribe(),
            },
            removed: RemovalSignal {
                rx: self.removed.subscribe(),
            },
        }
    }

    pub fn mark_loaded(&self) {
        self.loaded.send_replace(LoadState::Loaded);
    }

    pub fn mark_failed(&self, reason: impl Into<String>) {
        self.loaded.send_replace(LoadState::Failed(reason.into()));
    }

    pub fn mark_removed(&self) {
        self.removed.send_replace(true);
    }

    pub fn load_state(&self) -> LoadState {
        self.loaded.borrow().clone()
    }
}

impl Default for EntrySignals {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_loaded_resolves_after_mark() {
        let signals = EntrySignals::new();
        let mut lifecycle = signals.subscribe();
        assert_eq!(lifecycle.loaded.current(), LoadState::Pending);

        let waiter = tokio::spawn(async move { lifecycle.loaded.wait().await });
        signals.mark_loaded();
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_loaded_reports_failure() {
        let signals = EntrySignals::new();
        let mut lifecycle = signals.subscribe();
        signals.mark_failed("503");
        assert_eq!(lifecycle.loaded.wait().await, Err("503".to_string()));
    }

    #[tokio::test]
    async fn test_loaded_pends_when_dropped_before_data() {
        let signals = EntrySignals::new();
        let mut lifecycle = signals.subscribe();
        drop(signals);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), lifecycle.loaded.wait()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_removed_resolves_on_mark_or_drop() {
        let signals = EntrySignals::new();
        let mut lifecycle = signals.subscribe();
        signals.mark_removed();
        lifecycle.removed.wait().await;
        assert!(lifecycle.removed.is_removed());

        let signals = EntrySignals::new();
        let mut lifecycle = signals.subscribe();
        drop(signals);
        lifecycle.removed.wait().await;
    }
}
