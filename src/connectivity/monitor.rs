use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::{clock::Clock, remote::RemoteStore};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::connectivity";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    /// Network present, as reported by the host.
    pub is_online: bool,
    /// Server confirmed reachable by the last probe.
    pub is_connected: bool,
    pub retry_count: u32,
    pub last_checked: Option<DateTime<Utc>>,
}

impl ConnectionState {
    fn same_flags(&self, other: &ConnectionState) -> bool {
        self.is_online == other.is_online
            && self.is_connected == other.is_connected
            && self.retry_count == other.retry_count
    }
}

/// Outcome of feeding a signal into the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Became connected from any non-connected state. The only drain trigger.
    Restored,
    WentOffline,
    /// Network present but the server stopped answering.
    Unreachable,
    Unchanged,
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probes by pinging the remote store.
pub struct RemoteProbe {
    remote: Arc<dyn RemoteStore>,
}

impl RemoteProbe {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ReachabilityProbe for RemoteProbe {
    async fn probe(&self) -> bool {
        match self.remote.ping().await {
            Ok(()) => true,
            Err(err) => {
                crate::log_debug!("Reachability probe failed: {err}");
                false
            }
        }
    }
}

/// Tracks network presence and server reachability.
///
/// States move `online+connected -> offline -> online+unconnected ->
/// online+connected`. Subscribers are only woken when a flag changes.
pub struct ConnectivityMonitor {
    state_tx: watch::Sender<ConnectionState>,
    probe: Arc<dyn ReachabilityProbe>,
    clock: Arc<dyn Clock>,
    check_lock: Mutex<()>,
}

impl ConnectivityMonitor {
    /// Starts unconnected; the first successful `check` counts as a restoration.
    pub fn new(probe: Arc<dyn ReachabilityProbe>, clock: Arc<dyn Clock>, is_online: bool) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState {
            is_online,
            is_connected: false,
            retry_count: 0,
            last_checked: None,
        });
        Self {
            state_tx,
            probe,
            clock,
            check_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state_tx.borrow().is_online
    }

    pub fn is_connected(&self) -> bool {
        self.state_tx.borrow().is_connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn update<F>(&self, mutate: F) -> (ConnectionState, ConnectionState)
    where
        F: FnOnce(&mut ConnectionState),
    {
        let mut before = None;
        let mut after = None;
        self.state_tx.send_if_modified(|state| {
            let previous = state.clone();
            mutate(state);
            let changed = !previous.same_flags(state);
            before = Some(previous);
            after = Some(state.clone());
            changed
        });
        let after = after.unwrap_or_else(|| self.state());
        (before.unwrap_or_else(|| after.clone()), after)
    }

    fn classify(before: &ConnectionState, after: &ConnectionState) -> Transition {
        match (before.is_connected, after.is_connected) {
            (false, true) => Transition::Restored,
            (_, false) if before.is_online && !after.is_online => Transition::WentOffline,
            (true, false) => Transition::Unreachable,
            _ => Transition::Unchanged,
        }
    }

    /// Host network signal. Coming back online probes the server before
    /// reporting a restoration.
    pub async fn set_network_available(&self, online: bool) -> Transition {
        if !online {
            let (before, after) = self.update(|state| {
                state.is_online = false;
                state.is_connected = false;
            });
            let transition = Self::classify(&before, &after);
            if transition != Transition::Unchanged {
                crate::log_info!("Network lost");
            }
            return transition;
        }

        let (before, _) = self.update(|state| state.is_online = true);
        if !before.is_online {
            crate::log_info!("Network available, confirming server reachability");
        }
        self.check().await
    }

    /// Run the reachability probe. Does nothing while the network is absent.
    pub async fn check(&self) -> Transition {
        let _guard = self.check_lock.lock().await;
        if !self.is_online() {
            return Transition::Unchanged;
        }

        let reachable = self.probe.probe().await;
        let now = self.clock.now();
        let (before, after) = self.update(|state| {
            // The network may have dropped while the probe was in flight.
            state.is_connected = reachable && state.is_online;
            state.last_checked = Some(now);
            if state.is_connected {
                state.retry_count = 0;
            }
        });

        let transition = Self::classify(&before, &after);
        match transition {
            Transition::Restored => crate::log_info!("Server reachable, connection restored"),
            Transition::Unreachable => crate::log_warn!("Server unreachable"),
            _ => {}
        }
        transition
    }

    /// User-triggered retry.
    pub async fn force_retry(&self) -> Transition {
        self.update(|state| state.retry_count = state.retry_count.saturating_add(1));
        crate::log_debug!("Forced connectivity retry #{}", self.state().retry_count);
        self.check().await
    }

    /// A live remote call failed with a network-class error.
    pub fn mark_unreachable(&self) -> Transition {
        let (before, after) = self.update(|state| state.is_connected = false);
        let transition = Self::classify(&before, &after);
        if transition == Transition::Unreachable {
            crate::log_warn!("Live remote call failed, treating server as unreachable");
        }
        transition
    }
}
