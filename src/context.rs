use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Duration as TtlDuration;
use tokio::{task::JoinHandle, time};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::SnapshotCache,
    clock::Clock,
    connectivity::{ConnectivityMonitor, RemoteProbe, Transition},
    models::{OperationPayload, Profile, QueuedOperation},
    outbox::{EnqueueReceipt, IdMap, OperationQueue},
    remote::RemoteStore,
    session::{
        commands, ActiveFastSlot, ActiveSessionSlot, FastingController, SessionController,
        SessionView,
    },
    settings::SyncSettings,
    store::{DurableStore, ACTIVE_FAST_KEY, ACTIVE_SESSION_KEY},
    sync::{DrainReport, SyncReconciler},
};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "fastnow_sync::context";

/// Components shared by the controllers and the reconciler, scoped to one
/// signed-in user.
#[derive(Clone)]
pub struct SyncServices {
    pub user_id: String,
    pub settings: SyncSettings,
    pub clock: Arc<dyn Clock>,
    pub remote: Arc<dyn RemoteStore>,
    pub queue: Arc<OperationQueue>,
    pub ids: Arc<IdMap>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub slot: Arc<ActiveSessionSlot>,
    pub fasts: Arc<ActiveFastSlot>,
}

impl SyncServices {
    /// Whether any queued operation belongs to the lineage of `record_id`.
    pub fn has_unsynced(&self, record_id: &str) -> bool {
        self.queue.has_pending_for(record_id, &self.ids)
    }

    /// A write may hit the server directly only if the server is reachable,
    /// knows this id, and has nothing older to apply first.
    pub fn can_go_live(&self, record_id: &str) -> bool {
        self.monitor.is_connected()
            && !self.ids.is_provisional(record_id)
            && !self.has_unsynced(record_id)
    }

    pub async fn enqueue(&self, payload: OperationPayload) -> EnqueueReceipt {
        let op = QueuedOperation::new(self.user_id.clone(), payload, self.clock.now());
        self.queue.enqueue(op).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTrigger {
    pub transition: Transition,
    /// Present when the transition restored the connection.
    pub drain: Option<DrainReport>,
}

pub struct SyncContext {
    services: SyncServices,
    cache: SnapshotCache,
    controller: Arc<SessionController>,
    fasting: Arc<FastingController>,
    reconciler: Arc<SyncReconciler>,
}

impl SyncContext {
    /// Load persisted state for `user_id`, probe the server once and drain
    /// whatever a previous run left queued. `network_online` is the host's
    /// current network signal.
    pub async fn open(
        settings: SyncSettings,
        user_id: impl Into<String>,
        store: Arc<dyn DurableStore>,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        network_online: bool,
    ) -> Result<Self> {
        let user_id = user_id.into();

        let cache = SnapshotCache::new(store.clone(), clock.clone());
        if let Err(err) = cache.cleanup_expired().await {
            crate::log_warn!("Cache cleanup failed: {err:#}");
        }

        let queue = Arc::new(OperationQueue::load(store.clone()).await?);
        let ids = Arc::new(IdMap::load(store.clone(), &settings.provisional_id_prefix).await?);
        let slot = Arc::new(ActiveSessionSlot::load(store.clone(), ACTIVE_SESSION_KEY).await?);
        let fasts = Arc::new(ActiveFastSlot::load(store.clone(), ACTIVE_FAST_KEY).await?);
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::new(RemoteProbe::new(remote.clone())),
            clock.clone(),
            network_online,
        ));

        let services = SyncServices {
            user_id,
            settings,
            clock,
            remote,
            queue,
            ids,
            monitor,
            slot,
            fasts,
        };
        let controller = Arc::new(SessionController::new(services.clone()));
        let fasting = Arc::new(FastingController::new(services.clone()));
        let reconciler = Arc::new(SyncReconciler::new(services.clone()));

        crate::log_info!(
            "Sync context opened for {} with {} queued operations",
            services.user_id,
            services.queue.pending_count()
        );

        let context = Self {
            services,
            cache,
            controller,
            fasting,
            reconciler,
        };
        context.after_transition(context.services.monitor.check().await).await;
        Ok(context)
    }

    pub fn controller(&self) -> &Arc<SessionController> {
        &self.controller
    }

    pub fn fasting(&self) -> &Arc<FastingController> {
        &self.fasting
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    pub fn services(&self) -> &SyncServices {
        &self.services
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    pub fn view(&self) -> SessionView {
        commands::view(&self.controller)
    }

    async fn after_transition(&self, transition: Transition) -> SyncTrigger {
        let drain = if transition == Transition::Restored {
            Some(self.reconciler.drain().await)
        } else {
            None
        };
        SyncTrigger { transition, drain }
    }

    /// Host network signal.
    pub async fn handle_network_change(&self, online: bool) -> SyncTrigger {
        let transition = self.services.monitor.set_network_available(online).await;
        self.after_transition(transition).await
    }

    /// User-triggered retry. Drains on restoration, and also when already
    /// connected with operations still queued from a failed drain.
    pub async fn force_retry(&self) -> SyncTrigger {
        let transition = self.services.monitor.force_retry().await;
        if transition == Transition::Unchanged
            && self.services.monitor.is_connected()
            && !self.services.queue.is_empty()
        {
            return SyncTrigger {
                transition,
                drain: Some(self.reconciler.drain().await),
            };
        }
        self.after_transition(transition).await
    }

    /// Periodically probe the server while the network is up but the server
    /// is not confirmed, draining when it comes back.
    pub fn spawn_watchdog(&self, token: CancellationToken) -> JoinHandle<()> {
        let monitor = self.services.monitor.clone();
        let reconciler = self.reconciler.clone();
        let period = Duration::from_secs(self.services.settings.reachability_interval_secs.max(1));

        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        crate::log_debug!("Reachability watchdog stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if monitor.is_online()
                            && !monitor.is_connected()
                            && monitor.check().await == Transition::Restored
                        {
                            reconciler.drain().await;
                        }
                    }
                }
            }
        })
    }

    /// Profile used for calorie and step estimates. Served from the cache when
    /// the server cannot be asked.
    pub async fn load_profile(&self) -> Result<Option<Profile>> {
        let services = &self.services;
        let mut profile = None;

        if services.monitor.is_connected() {
            let fetched = self
                .cache
                .deduplicate(
                    &format!("profile.{}", services.user_id),
                    TtlDuration::seconds(services.settings.request_dedup_secs),
                    || services.remote.fetch_profile(&services.user_id),
                )
                .await;
            match fetched {
                Ok(Some(fresh)) => {
                    if let Err(err) = self
                        .cache
                        .cache_profile(&fresh, services.settings.profile_cache_ttl_hours)
                        .await
                    {
                        crate::log_warn!("Could not cache profile: {err:#}");
                    }
                    profile = Some(fresh);
                }
                Ok(None) => {}
                Err(err) if err.is_network() => {
                    services.monitor.mark_unreachable();
                }
                Err(err) => {
                    crate::log_warn!("Profile fetch failed, using cache: {err}");
                }
            }
        }

        if profile.is_none() {
            profile = self.cache.cached_profile(&services.user_id).await?;
        }

        self.controller.set_profile(profile.clone());
        Ok(profile)
    }

    /// Drop everything held for this user: outbox, id mappings, cached
    /// snapshots and the open walk and fast.
    pub async fn sign_out(&self) -> Result<()> {
        let services = &self.services;
        let dropped = services.queue.pending_count();
        if dropped > 0 {
            crate::log_warn!("Signing out with {dropped} unsynced operations");
        }

        services.queue.clear().await?;
        services.ids.clear().await?;
        self.cache.clear().await?;
        services.slot.set(None).await;
        services.fasts.set(None).await;
        self.controller.set_profile(None);
        crate::log_info!("Cleared sync state for {}", services.user_id);
        Ok(())
    }
}
