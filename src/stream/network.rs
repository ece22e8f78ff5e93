//! Network reachability signals.
//!
//! The client never queries the OS itself; the host injects a
//! [`NetworkMonitor`] fed from whatever connectivity signal it has.

use std::fmt::Debug;

use futures_util::future::{self, BoxFuture};
use tokio::sync::watch;

/// Source of online/offline information.
pub trait NetworkMonitor: Debug + Send + Sync + 'static {
    fn is_online(&self) -> bool;

    /// Resolves once the network is reported online. May resolve spuriously;
    /// callers re-check [`NetworkMonitor::is_online`].
    fn wait_online(&self) -> BoxFuture<'static, ()>;
}

/// Monitor for hosts without a connectivity signal: always online.
#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeOnline;

impl NetworkMonitor for AssumeOnline {
    fn is_online(&self) -> bool {
        true
    }

    fn wait_online(&self) -> BoxFuture<'static, ()> {
        Box::pin(future::ready(()))
    }
}

/// Switchable monitor backed by a `watch` channel.
#[derive(Clone, Debug)]
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx }
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_replace(online);
    }
}

impl Default for NetworkStatus {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for NetworkStatus {
    fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    fn wait_online(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.tx.subscribe();
        Box::pin(async move {
            let _ = rx.wait_for(|online| *online).await;
        })
    }
}
