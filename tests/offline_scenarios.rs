use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeZone, Utc};
use fastnow_sync::{
    models::{
        EntityKind, FastingStatus, OperationAction, OperationPayload, Profile, SessionState,
        SessionStatus,
    },
    session::{commands::SyncStatus, dispatch, SessionIntent},
    store::QUEUE_KEY,
    Applied, DurableStore, EndRequest, ManualClock, MemoryRemote, MemoryStore, RemoteError,
    SessionError, SyncContext, SyncSettings, Transition, WalkingSession,
};
use tokio_util::sync::CancellationToken;

const USER: &str = "user-1";

struct Harness {
    ctx: SyncContext,
    remote: MemoryRemote,
    store: MemoryStore,
    clock: ManualClock,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

async fn open_with_network(
    store: &MemoryStore,
    remote: &MemoryRemote,
    clock: &ManualClock,
    network_online: bool,
) -> SyncContext {
    SyncContext::open(
        SyncSettings::default(),
        USER,
        Arc::new(store.clone()),
        Arc::new(remote.clone()),
        Arc::new(clock.clone()),
        network_online,
    )
    .await
    .expect("open context")
}

async fn open(store: &MemoryStore, remote: &MemoryRemote, clock: &ManualClock) -> SyncContext {
    open_with_network(store, remote, clock, true).await
}

async fn harness(reachable: bool) -> Harness {
    let clock = ManualClock::new(start_time());
    let store = MemoryStore::new();
    let remote = MemoryRemote::new(Arc::new(clock.clone()));
    remote.set_reachable(reachable);
    let ctx = open(&store, &remote, &clock).await;
    Harness {
        ctx,
        remote,
        store,
        clock,
    }
}

impl Harness {
    async fn go_offline(&self) {
        self.remote.set_reachable(false);
        self.ctx.handle_network_change(false).await;
    }

    async fn restore(&self) -> fastnow_sync::DrainReport {
        self.remote.set_reachable(true);
        let trigger = self.ctx.handle_network_change(true).await;
        assert_eq!(trigger.transition, Transition::Restored);
        trigger.drain.expect("restoration drains")
    }

    fn pending(&self) -> usize {
        self.ctx.services().queue.pending_count()
    }

    fn queued_actions(&self) -> Vec<OperationAction> {
        self.ctx
            .services()
            .queue
            .peek_all()
            .iter()
            .map(|op| op.action())
            .collect()
    }
}

/// Remote columns that must match whichever path delivered them.
fn observable(session: &WalkingSession) -> serde_json::Value {
    serde_json::json!({
        "start_time": session.start_time,
        "end_time": session.end_time,
        "status": session.status,
        "session_state": session.session_state,
        "pause_start_time": session.pause_start_time,
        "total_pause_duration": session.total_pause_duration,
        "speed_mph": session.speed_mph,
        "duration_minutes": session.duration_minutes,
        "distance": session.distance,
        "calories_burned": session.calories_burned,
        "estimated_steps": session.estimated_steps,
        "is_edited": session.is_edited,
        "original_duration_minutes": session.original_duration_minutes,
        "edit_reason": session.edit_reason,
    })
}

#[tokio::test]
async fn online_start_then_offline_pause_and_resume_replay_in_order() {
    let h = harness(true).await;
    let controller = h.ctx.controller();

    let started = controller.start(Some(3.0)).await.expect("start");
    assert!(matches!(started, Applied::Confirmed(_)));
    assert_eq!(started.value().id, "srv-1");

    h.go_offline().await;

    let paused = controller.pause().await.expect("pause");
    assert!(paused.is_pending());
    assert_eq!(paused.value().session_state, SessionState::Paused);
    let queued = h.ctx.services().queue.peek_all();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].session_ref(), "srv-1");

    h.clock.advance_secs(120);
    let resumed = controller.resume().await.expect("resume");
    assert_eq!(resumed.value().total_pause_duration, 120);
    assert_eq!(
        h.queued_actions(),
        vec![OperationAction::Pause, OperationAction::Resume]
    );

    let report = h.restore().await;
    assert_eq!(report.applied, 2);
    assert_eq!(report.remaining, 0);

    let row = h.remote.session("srv-1").expect("remote row");
    assert_eq!(row.session_state, SessionState::Active);
    assert_eq!(row.total_pause_duration, 120);
    assert_eq!(row.pause_start_time, None);
    assert_eq!(h.pending(), 0);
}

#[tokio::test]
async fn offline_start_and_end_replay_with_identical_metrics() {
    let h = harness(false).await;
    let controller = h.ctx.controller();

    let started = controller.start(Some(3.0)).await.expect("start");
    let local_id = started.value().id.clone();
    assert!(local_id.starts_with("local-"));

    h.clock.advance_secs(600);
    let ended = controller.end(EndRequest::default()).await.expect("end");
    let local = ended.value().clone();
    assert_eq!(local.status, SessionStatus::Completed);
    assert_eq!(local.duration_minutes, Some(10));
    assert_eq!(local.distance, Some(0.5));
    assert_eq!(local.calories_burned, Some(35));
    assert_eq!(local.estimated_steps, Some(1000));
    assert!(controller.current().is_none());

    let report = h.restore().await;
    assert_eq!(report.applied, 2);

    let rows = h.remote.sessions_for(USER);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "srv-1");
    assert_eq!(observable(&rows[0]), observable(&local));
    assert_eq!(h.ctx.services().ids.resolve(&local_id), "srv-1");
}

async fn walk(h: &Harness) -> WalkingSession {
    let controller = h.ctx.controller();
    controller.start(Some(3.5)).await.expect("start");
    h.clock.advance_secs(300);
    controller.pause().await.expect("pause");
    h.clock.advance_secs(60);
    controller.resume().await.expect("resume");
    h.clock.advance_secs(240);
    controller.update_speed(4.0).await.expect("speed");
    controller.pause().await.expect("pause");
    h.clock.advance_secs(30);
    controller.resume().await.expect("resume");
    h.clock.advance_secs(125);
    controller
        .end(EndRequest::default())
        .await
        .expect("end")
        .into_value()
}

#[tokio::test]
async fn offline_walk_converges_to_the_live_result() {
    let live = harness(true).await;
    walk(&live).await;
    assert_eq!(live.pending(), 0);

    let offline = harness(false).await;
    walk(&offline).await;
    assert_eq!(offline.pending(), 7);
    let report = offline.restore().await;
    assert_eq!(report.applied, 7);

    let live_rows = live.remote.sessions_for(USER);
    let offline_rows = offline.remote.sessions_for(USER);
    assert_eq!(live_rows.len(), 1);
    assert_eq!(offline_rows.len(), 1);
    assert_eq!(observable(&offline_rows[0]), observable(&live_rows[0]));
    assert_eq!(offline_rows[0].total_pause_duration, 90);
}

#[tokio::test]
async fn second_drain_writes_nothing() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");
    h.ctx.controller().pause().await.expect("pause");
    h.restore().await;

    let writes = h.remote.write_count();
    let report = h.ctx.reconciler().drain().await;

    assert_eq!(report.applied, 0);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.remote.write_count(), writes);
}

#[tokio::test]
async fn queued_pause_lands_on_the_server_assigned_id() {
    let h = harness(false).await;
    let controller = h.ctx.controller();

    let local_id = controller.start(None).await.expect("start").into_value().id;
    controller.pause().await.expect("pause");
    h.restore().await;

    let row = h.remote.session("srv-1").expect("remote row");
    assert_eq!(row.session_state, SessionState::Paused);
    assert_eq!(h.ctx.services().ids.resolve(&local_id), "srv-1");
    assert_eq!(controller.current().map(|s| s.id), Some("srv-1".to_string()));

    // Nothing left for this session, so the next transition goes straight out.
    h.clock.advance_secs(45);
    let resumed = controller.resume().await.expect("resume");
    assert!(matches!(resumed, Applied::Confirmed(_)));
    assert_eq!(h.remote.session("srv-1").expect("row").total_pause_duration, 45);
}

#[tokio::test]
async fn second_start_fails_without_side_effects() {
    let h = harness(false).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    let err = controller.start(None).await.expect_err("already active");
    assert!(matches!(err, SessionError::AlreadyActive(_)));
    assert_eq!(h.pending(), 1);

    let online = harness(true).await;
    online.ctx.controller().start(None).await.expect("start");
    online
        .ctx
        .controller()
        .start(None)
        .await
        .expect_err("already active");
    assert_eq!(online.remote.write_count(), 1);
}

#[tokio::test]
async fn manual_duration_drops_estimates_on_both_paths() {
    let request = EndRequest {
        manual_duration_minutes: Some(5),
        edit_reason: Some("left it running".into()),
    };

    let online = harness(true).await;
    online.ctx.controller().start(None).await.expect("start");
    online.clock.advance_secs(720);
    let confirmed = online
        .ctx
        .controller()
        .end(request.clone())
        .await
        .expect("end");
    assert!(!confirmed.is_pending());

    let offline = harness(false).await;
    offline.ctx.controller().start(None).await.expect("start");
    offline.clock.advance_secs(720);
    let pending = offline.ctx.controller().end(request).await.expect("end");
    assert!(pending.is_pending());

    for session in [confirmed.value(), pending.value()] {
        assert!(session.is_edited);
        assert_eq!(session.duration_minutes, Some(5));
        assert_eq!(session.original_duration_minutes, Some(12));
        assert_eq!(session.distance, None);
        assert_eq!(session.calories_burned, None);
        assert_eq!(session.estimated_steps, None);
    }

    offline.restore().await;
    let row = offline.remote.session("srv-1").expect("row");
    assert_eq!(observable(&row), observable(pending.value()));
}

#[tokio::test]
async fn rejected_live_write_is_rolled_back_and_returned() {
    let h = harness(true).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    h.remote.set_reject_writes(true);
    let err = controller.pause().await.expect_err("rejected");

    assert!(matches!(
        err,
        SessionError::Remote(RemoteError::Rejected { .. })
    ));
    let current = controller.current().expect("still open");
    assert_eq!(current.session_state, SessionState::Active);
    assert_eq!(h.pending(), 0);
}

#[tokio::test]
async fn network_failure_on_live_path_falls_back_to_queue() {
    let h = harness(true).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    h.remote.set_reachable(false);
    let paused = controller.pause().await.expect("pause");

    assert!(paused.is_pending());
    assert!(!h.ctx.services().monitor.is_connected());
    assert_eq!(h.pending(), 1);

    let report = h.restore().await;
    assert_eq!(report.applied, 1);
}

#[tokio::test]
async fn failed_start_holds_back_its_session_until_retry() {
    let h = harness(false).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");
    controller.pause().await.expect("pause");

    h.remote.set_reject_writes(true);
    let report = h.restore().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.blocked, 1);
    assert_eq!(report.remaining, 2);

    let queued = h.ctx.services().queue.peek_all();
    assert_eq!(queued[0].attempts, 1);
    assert!(queued[0].last_error.is_some());
    assert_eq!(queued[1].attempts, 0);

    h.remote.set_reject_writes(false);
    let trigger = h.ctx.force_retry().await;
    let report = trigger.drain.expect("retry drains queued work");
    assert_eq!(report.applied, 2);
    assert_eq!(
        h.remote.session("srv-1").expect("row").session_state,
        SessionState::Paused
    );
}

#[tokio::test]
async fn queue_survives_restart_and_drains_on_open() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");
    h.clock.advance_secs(90);
    h.ctx.controller().pause().await.expect("pause");
    drop(h.ctx);

    h.remote.set_reachable(true);
    let reopened = open(&h.store, &h.remote, &h.clock).await;

    assert_eq!(reopened.services().queue.pending_count(), 0);
    let row = h.remote.session("srv-1").expect("row");
    assert_eq!(row.session_state, SessionState::Paused);
    assert_eq!(
        reopened.controller().current().map(|s| s.id),
        Some("srv-1".to_string())
    );
}

#[tokio::test]
async fn offline_cancel_leaves_no_record() {
    let h = harness(false).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    let cancelled = controller
        .cancel(Some("started by mistake".into()))
        .await
        .expect("cancel");
    assert!(cancelled.is_pending());
    assert!(controller.current().is_none());
    assert!(matches!(
        h.ctx.services().queue.peek_all()[1].payload,
        OperationPayload::Cancel { .. }
    ));

    let report = h.restore().await;
    assert_eq!(report.applied, 2);
    assert!(h.remote.sessions_for(USER).is_empty());
}

#[tokio::test]
async fn watchdog_drains_when_server_comes_back() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");
    h.remote.set_reachable(true);

    let token = CancellationToken::new();
    let handle = h.ctx.spawn_watchdog(token.clone());

    for _ in 0..100 {
        if h.pending() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(h.pending(), 0);
    assert!(h.ctx.services().monitor.is_connected());

    token.cancel();
    handle.await.expect("watchdog exits");
}

#[tokio::test]
async fn profile_falls_back_to_cache_and_feeds_estimates() {
    let h = harness(true).await;
    h.remote.put_profile(Profile {
        user_id: USER.into(),
        weight_kg: Some(90.0),
        height_cm: None,
        default_walking_speed: Some(3.0),
    });
    assert!(h.ctx.load_profile().await.expect("load").is_some());

    h.go_offline().await;
    let cached = h.ctx.load_profile().await.expect("load").expect("cached");
    assert_eq!(cached.weight_kg, Some(90.0));

    h.ctx.controller().start(None).await.expect("start");
    h.clock.advance_secs(600);
    let ended = h
        .ctx
        .controller()
        .end(EndRequest::default())
        .await
        .expect("end");
    assert_eq!(ended.value().calories_burned, Some(45));
}

#[tokio::test]
async fn sign_out_clears_all_user_state() {
    let h = harness(true).await;
    h.remote.put_profile(Profile {
        user_id: USER.into(),
        weight_kg: Some(60.0),
        height_cm: Some(165.0),
        default_walking_speed: None,
    });
    h.ctx.load_profile().await.expect("profile");
    h.go_offline().await;
    h.ctx.controller().start(None).await.expect("start");

    h.ctx.sign_out().await.expect("sign out");

    assert_eq!(h.pending(), 0);
    assert!(h.ctx.controller().current().is_none());
    assert!(h.store.keys("cache.").await.expect("keys").is_empty());
    assert_eq!(
        h.store.read(QUEUE_KEY).await.expect("read"),
        Some("[]".to_string())
    );
}

#[tokio::test]
async fn load_prefers_server_unless_local_changes_are_queued() {
    let h = harness(true).await;
    h.ctx.controller().start(None).await.expect("start");

    // A second device with an empty store picks the session up from the server.
    let second = open(&MemoryStore::new(), &h.remote, &h.clock).await;
    let loaded = second
        .controller()
        .load_active_session()
        .await
        .expect("load");
    assert_eq!(loaded.map(|s| s.id), Some("srv-1".to_string()));
    assert!(!second.controller().is_loading());

    h.go_offline().await;
    h.ctx.controller().pause().await.expect("pause");
    h.remote.set_reachable(true);
    h.ctx.services().monitor.check().await;

    let local = h
        .ctx
        .controller()
        .load_active_session()
        .await
        .expect("load")
        .expect("open session");
    assert_eq!(local.session_state, SessionState::Paused);
    assert_eq!(
        h.remote.session("srv-1").expect("row").session_state,
        SessionState::Active
    );
    assert_eq!(h.pending(), 1);
}

#[tokio::test]
async fn dispatch_reports_sync_status_and_short_walks() {
    let h = harness(false).await;
    let controller = h.ctx.controller();

    let outcome = dispatch(controller, SessionIntent::Start { speed_mph: None })
        .await
        .expect("start");
    assert_eq!(outcome.sync, SyncStatus::Pending);
    assert_eq!(outcome.pending_operations, 1);

    h.clock.advance_secs(42);
    let view = h.ctx.view();
    assert!(view.is_online);
    assert!(!view.is_connected);
    assert_eq!(view.elapsed_seconds, 42);
    assert_eq!(view.pending_operations, 1);

    let outcome = dispatch(
        controller,
        SessionIntent::End {
            manual_duration_minutes: None,
            edit_reason: None,
        },
    )
    .await
    .expect("end");
    assert!(outcome.too_short);
    assert_eq!(outcome.session.map(|s| s.duration_minutes), Some(Some(0)));

    let err = dispatch(controller, SessionIntent::Pause)
        .await
        .expect_err("nothing to pause");
    assert!(!err.recoverable);
}

#[tokio::test]
async fn drain_without_server_attempts_nothing() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");

    let report = h.ctx.reconciler().drain().await;

    assert!(report.offline);
    assert_eq!(report.applied + report.failed, 0);
    assert_eq!(report.remaining, 1);
    assert_eq!(h.remote.write_count(), 0);
}

#[tokio::test]
async fn ended_session_stays_closed_while_its_end_is_queued() {
    let h = harness(true).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    h.go_offline().await;
    h.clock.advance_secs(600);
    controller.end(EndRequest::default()).await.expect("end");

    h.remote.set_reject_writes(true);
    let report = h.restore().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);

    // The server row still reads as active.
    assert!(h.remote.session("srv-1").expect("row").is_active());
    let loaded = controller.load_active_session().await.expect("load");
    assert!(loaded.is_none());
    assert!(controller.current().is_none());
    assert!(matches!(
        controller.pause().await,
        Err(SessionError::NoActiveSession)
    ));

    h.remote.set_reject_writes(false);
    let report = h.ctx.force_retry().await.drain.expect("retry drains");
    assert_eq!(report.applied, 1);
    let row = h.remote.session("srv-1").expect("row");
    assert_eq!(row.status, SessionStatus::Completed);
    assert_eq!(row.session_state, SessionState::Completed);
    assert_eq!(row.pause_start_time, None);
}

#[tokio::test]
async fn cancelled_session_stays_closed_while_its_cancel_is_queued() {
    let h = harness(true).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start");

    h.go_offline().await;
    controller.cancel(None).await.expect("cancel");

    h.remote.set_reject_writes(true);
    assert_eq!(h.restore().await.failed, 1);

    assert!(controller.load_active_session().await.expect("load").is_none());
    assert!(controller.current().is_none());

    h.remote.set_reject_writes(false);
    h.ctx.force_retry().await;
    assert!(h.remote.sessions_for(USER).is_empty());
    assert_eq!(h.pending(), 0);
}

#[tokio::test]
async fn rejected_lineage_does_not_hold_back_other_sessions() {
    let h = harness(true).await;
    let controller = h.ctx.controller();
    controller.start(None).await.expect("start first walk");

    h.go_offline().await;
    h.clock.advance_secs(600);
    controller.end(EndRequest::default()).await.expect("end first walk");
    h.clock.advance_secs(60);
    controller.start(None).await.expect("start second walk");
    h.clock.advance_secs(60);
    controller.pause().await.expect("pause second walk");

    h.remote.reject_writes_to("srv-1");
    let report = h.restore().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.applied, 2);
    assert_eq!(report.blocked, 0);
    assert_eq!(report.remaining, 1);

    let second = h.remote.session("srv-2").expect("second walk row");
    assert_eq!(second.session_state, SessionState::Paused);
    assert!(h.remote.session("srv-1").expect("first walk row").is_active());
    assert_eq!(h.queued_actions(), vec![OperationAction::End]);

    h.remote.accept_writes_to("srv-1");
    let report = h.ctx.force_retry().await.drain.expect("retry drains");
    assert_eq!(report.applied, 1);
    assert_eq!(
        h.remote.session("srv-1").expect("first walk row").status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn drain_while_another_runs_is_skipped() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");
    h.remote.set_reachable(true);
    assert_eq!(
        h.ctx.services().monitor.check().await,
        Transition::Restored
    );

    h.remote.set_latency(Duration::from_millis(100));
    let reconciler = h.ctx.reconciler();
    let (first, second) = tokio::join!(reconciler.drain(), reconciler.drain());

    assert!(first.skipped != second.skipped);
    let ran = if first.skipped { second } else { first };
    assert_eq!(ran.applied, 1);
    assert_eq!(h.remote.write_count(), 1);
    assert!(!reconciler.is_running());
}

#[tokio::test]
async fn in_flight_drain_is_reported_as_running() {
    let h = harness(false).await;
    h.ctx.controller().start(None).await.expect("start");
    h.ctx.controller().pause().await.expect("pause");
    h.remote.set_reachable(true);
    h.ctx.services().monitor.check().await;
    h.remote.set_latency(Duration::from_millis(200));

    let reconciler = h.ctx.reconciler().clone();
    let background = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(reconciler.is_running());
    let skipped = reconciler.drain().await;
    assert!(skipped.skipped);
    assert_eq!(skipped.applied, 0);
    assert_eq!(skipped.remaining, 2);

    let report = background.await.expect("drain task");
    assert_eq!(report.applied, 2);
    assert!(!reconciler.is_running());
}

#[tokio::test]
async fn settled_id_mappings_are_pruned_on_the_next_drain() {
    let h = harness(false).await;
    let controller = h.ctx.controller();
    let local_id = controller.start(None).await.expect("start").into_value().id;
    controller.pause().await.expect("pause");

    h.remote.reject_writes_to("srv-1");
    let report = h.restore().await;
    assert_eq!((report.applied, report.failed), (1, 1));
    let ids = &h.ctx.services().ids;
    assert_eq!(ids.len(), 1);

    // The queued pause still names the provisional id.
    h.ctx.reconciler().drain().await;
    assert_eq!(ids.resolve(&local_id), "srv-1");

    h.remote.accept_writes_to("srv-1");
    assert_eq!(h.ctx.reconciler().drain().await.applied, 1);
    assert_eq!(ids.len(), 1);

    h.ctx.reconciler().drain().await;
    assert!(ids.is_empty());
    assert_eq!(controller.current().map(|s| s.id), Some("srv-1".to_string()));
}

#[tokio::test]
async fn open_uses_the_host_network_state() {
    let clock = ManualClock::new(start_time());
    let store = MemoryStore::new();
    let remote = MemoryRemote::new(Arc::new(clock.clone()));
    let ctx = open_with_network(&store, &remote, &clock, false).await;

    let view = ctx.view();
    assert!(!view.is_online);
    assert!(!view.is_connected);

    let started = ctx.controller().start(None).await.expect("start");
    assert!(started.is_pending());
    assert_eq!(remote.write_count(), 0);

    let trigger = ctx.handle_network_change(true).await;
    assert_eq!(trigger.transition, Transition::Restored);
    assert_eq!(trigger.drain.expect("restoration drains").applied, 1);
}

#[tokio::test]
async fn offline_fast_replays_start_then_end() {
    let h = harness(false).await;
    let fasting = h.ctx.fasting();

    let started = fasting
        .start(Some(16 * 3600), None)
        .await
        .expect("start fast");
    assert!(started.is_pending());
    let local_id = started.value().id.clone();

    h.clock.advance_secs(17 * 3600);
    let ended = fasting.end().await.expect("end fast");
    assert_eq!(ended.value().status, FastingStatus::Completed);
    assert_eq!(ended.value().duration_seconds, Some(17 * 3600));
    assert!(fasting.current().is_none());

    let report = h.restore().await;
    assert_eq!(report.applied, 2);

    let rows = h.remote.fasts_for(USER);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, FastingStatus::Completed);
    assert_eq!(rows[0].duration_seconds, Some(17 * 3600));
    assert_eq!(rows[0].end_time, ended.value().end_time);
    assert_eq!(h.ctx.services().ids.resolve(&local_id), rows[0].id);
}

#[tokio::test]
async fn fasts_and_walks_share_the_outbox_in_order() {
    let h = harness(false).await;
    h.ctx.fasting().start(None, None).await.expect("start fast");
    h.ctx.controller().start(None).await.expect("start walk");
    h.clock.advance_secs(900);
    h.ctx
        .controller()
        .end(EndRequest::default())
        .await
        .expect("end walk");
    h.ctx.fasting().cancel().await.expect("cancel fast");

    let entities: Vec<EntityKind> = h
        .ctx
        .services()
        .queue
        .peek_all()
        .iter()
        .map(|op| op.entity)
        .collect();
    assert_eq!(
        entities,
        vec![
            EntityKind::FastingSession,
            EntityKind::WalkingSession,
            EntityKind::WalkingSession,
            EntityKind::FastingSession,
        ]
    );

    let report = h.restore().await;
    assert_eq!(report.applied, 4);
    assert_eq!(
        h.remote.fast("srv-1").expect("fast row").status,
        FastingStatus::Cancelled
    );
    assert_eq!(
        h.remote.session("srv-2").expect("walk row").duration_minutes,
        Some(15)
    );
}

#[tokio::test]
async fn fast_start_is_validated_and_may_be_backdated() {
    let h = harness(true).await;
    let fasting = h.ctx.fasting();
    let now = start_time();

    assert!(matches!(
        fasting.start(None, Some(now + chrono::Duration::hours(1))).await,
        Err(SessionError::InvalidStartTime(_))
    ));
    assert!(matches!(
        fasting.start(Some(0), None).await,
        Err(SessionError::InvalidGoal(0))
    ));

    let started = fasting
        .start(Some(3600), Some(now - chrono::Duration::hours(2)))
        .await
        .expect("backdated start");
    assert!(matches!(started, Applied::Confirmed(_)));
    assert_eq!(fasting.elapsed_seconds(), 7200);
    assert!(started.value().goal_reached(now));

    assert!(matches!(
        fasting.start(None, None).await,
        Err(SessionError::AlreadyActive(_))
    ));
    assert_eq!(h.remote.write_count(), 1);
}

#[tokio::test]
async fn ended_fast_stays_closed_while_its_end_is_queued() {
    let h = harness(true).await;
    let fasting = h.ctx.fasting();
    fasting.start(None, None).await.expect("start fast");

    h.go_offline().await;
    fasting.end().await.expect("end fast");
    h.remote.reject_writes_to("srv-1");
    assert_eq!(h.restore().await.failed, 1);

    assert!(fasting.load_active_fast().await.expect("load").is_none());

    h.remote.accept_writes_to("srv-1");
    h.ctx.force_retry().await;
    assert_eq!(
        h.remote.fast("srv-1").expect("fast row").status,
        FastingStatus::Completed
    );
    assert!(fasting.load_active_fast().await.expect("load").is_none());
}
