//! Background TTL sweeper.
//!
//! One thread per cache wakes every sweep interval and removes entries whose
//! deadline has passed. It holds only a [`Weak`] reference to the store, so
//! it never keeps a dropped cache alive.
//!
//! ```text
//!   Cache handles ──Arc──► CacheInner ──owns──► ExpiryWorker ── shutdown tx
//!                               │                     │
//!                              Arc                  Weak
//!                               ▼                     ▼
//!                          ShardStore ◄───────── sweep thread
//!                                                 select! { tick, shutdown }
//! ```
//!
//! The thread exits when the shutdown sender is dropped (last cache handle
//! gone, or [`ExpiryWorker::stop`]) or when the store can no longer be
//! upgraded.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::ds::keymaps::unix_now;
use crate::store::sharded::ShardStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

const THREAD_NAME: &str = "shardcache-expiry";

/// Handle to a running sweep thread. Dropping it stops and joins the thread.
#[derive(Debug)]
pub struct ExpiryWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ExpiryWorker {
    /// Spawns the sweep thread for `store`.
    pub fn spawn<V>(store: Weak<ShardStore<V>>, interval: Duration) -> std::io::Result<Self>
    where
        V: Send + Sync + 'static,
    {
        let (shutdown, stop_rx) = channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || run(store, interval, stop_rx))?;
        info!(interval_ms = interval.as_millis() as u64, "expiry worker started");
        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// True until [`stop`](Self::stop) has been called.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signals the thread to exit and waits for it.
    pub fn stop(&mut self) {
        drop(self.shutdown.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("expiry worker panicked");
        }
    }
}

impl Drop for ExpiryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<V>(store: Weak<ShardStore<V>>, interval: Duration, shutdown: Receiver<()>) {
    let ticker = channel::tick(interval);
    loop {
        channel::select! {
            recv(ticker) -> _ => {
                let Some(store) = store.upgrade() else {
                    break;
                };
                let expired = store.expire(unix_now());
                debug!(expired, "expiry sweep finished");
            },
            recv(shutdown) -> _ => break,
        }
    }
    info!("expiry worker stopped");
}
