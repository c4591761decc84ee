//! Ungrab watchdog: the one timer in the DnD engine.
//!
//! Armed when the host asks whether a guest→host drag is pending. If the
//! guest has not confirmed a drag by the time it fires, the engine tells
//! the host the ungrab timed out and cancels the query.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default ungrab timeout.
pub const UNGRAB_TIMEOUT: Duration = Duration::from_millis(500);

/// Identifies one arming of the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchdogToken(u64);

/// Scheduler the engine arms and disarms. Firing is reported back to the
/// engine out of band, through the owning event loop.
pub trait WatchdogScheduler: Send {
    fn arm(&mut self, delay: Duration) -> WatchdogToken;

    /// Forget `token`, cancelling it if still pending. Unknown or already
    /// fired tokens are ignored.
    fn disarm(&mut self, token: WatchdogToken);
}

/// Watchdog backed by a spawned `tokio::time::sleep` per arming.
///
/// Fired tokens are posted to `fire_tx`; the service loop hands them to
/// the engine. Must be armed from within a tokio runtime.
#[derive(Debug)]
pub struct TokioWatchdog {
    fire_tx: mpsc::UnboundedSender<WatchdogToken>,
    next: u64,
    pending: HashMap<WatchdogToken, JoinHandle<()>>,
}

impl TokioWatchdog {
    pub fn new(fire_tx: mpsc::UnboundedSender<WatchdogToken>) -> Self {
        Self {
            fire_tx,
            next: 1,
            pending: HashMap::new(),
        }
    }
}

impl WatchdogScheduler for TokioWatchdog {
    fn arm(&mut self, delay: Duration) -> WatchdogToken {
        let token = WatchdogToken(self.next);
        self.next += 1;

        let tx = self.fire_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(token);
        });
        self.pending.insert(token, handle);
        token
    }

    fn disarm(&mut self, token: WatchdogToken) {
        if let Some(handle) = self.pending.remove(&token) {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Manual scheduler for engine tests: nothing fires on its own.

    use std::sync::{Arc, Mutex, MutexGuard};

    use super::*;

    #[derive(Debug, Default)]
    pub struct Record {
        pub next: u64,
        pub armed: Vec<(WatchdogToken, Duration)>,
        pub disarmed: Vec<WatchdogToken>,
    }

    impl Record {
        /// Tokens armed and not yet disarmed.
        pub fn outstanding(&self) -> Vec<WatchdogToken> {
            self.armed
                .iter()
                .map(|(t, _)| *t)
                .filter(|t| !self.disarmed.contains(t))
                .collect()
        }
    }

    /// Cloneable handle; clones share one [`Record`].
    #[derive(Debug, Clone, Default)]
    pub struct ManualWatchdog {
        record: Arc<Mutex<Record>>,
    }

    impl ManualWatchdog {
        pub fn record(&self) -> MutexGuard<'_, Record> {
            self.record.lock().unwrap()
        }
    }

    impl WatchdogScheduler for ManualWatchdog {
        fn arm(&mut self, delay: Duration) -> WatchdogToken {
            let mut rec = self.record();
            rec.next += 1;
            let token = WatchdogToken(rec.next);
            rec.armed.push((token, delay));
            token
        }

        fn disarm(&mut self, token: WatchdogToken) {
            self.record().disarmed.push(token);
        }
    }
}
