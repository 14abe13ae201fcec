use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_clicker::{
    CadenceError, Clock, CountdownPhase, DeferredExecutionScheduler, ManualClock,
    SchedulerConfig,
};
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::sleep;

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

fn setup(config: SchedulerConfig) -> (DeferredExecutionScheduler, ManualClock) {
    let clock = ManualClock::new(noon());
    let scheduler = DeferredExecutionScheduler::with_clock(config, clock.clone()).unwrap();
    (scheduler, clock)
}

/// An action that counts its firings and remembers the wall time of the last one.
fn recorder(clock: &ManualClock) -> (Arc<AtomicU32>, Arc<Mutex<Option<DateTime<Utc>>>>, impl FnOnce() + Send + 'static) {
    let count = Arc::new(AtomicU32::new(0));
    let fired_at = Arc::new(Mutex::new(None));
    let (c, f, clock) = (Arc::clone(&count), Arc::clone(&fired_at), clock.clone());
    (count, fired_at, move || {
        c.fetch_add(1, Ordering::SeqCst);
        *f.lock().unwrap() = Some(clock.wall_now());
    })
}

#[tokio::test(start_paused = true)]
async fn past_target_is_rejected_without_side_effects() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (count, _, action) = recorder(&clock);

    assert!(!scheduler.schedule(noon() - chrono::Duration::seconds(1), action));
    assert!(!scheduler.is_scheduled());
    assert_eq!(scheduler.remaining_time(), Duration::ZERO);
    assert_eq!(scheduler.subscribe().borrow().phase, CountdownPhase::Idle);

    let result = scheduler.try_schedule(noon(), || {});
    assert!(matches!(result, Err(CadenceError::ScheduleInPast { .. })));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_target_leaves_pending_schedule_alone() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (count, _, action) = recorder(&clock);
    let target = noon() + chrono::Duration::seconds(3);

    assert!(scheduler.schedule(target, action));
    assert!(!scheduler.schedule(noon() - chrono::Duration::minutes(5), || {}));
    assert_eq!(scheduler.target(), Some(target));

    sleep(Duration::from_secs(4)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn fires_once_at_target() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (count, fired_at, action) = recorder(&clock);
    let target = noon() + chrono::Duration::seconds(2);

    assert!(scheduler.schedule(target, action));
    assert!(scheduler.is_scheduled());
    assert_eq!(scheduler.subscribe().borrow().phase, CountdownPhase::Pending);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.remaining_time(), Duration::from_millis(500));

    sleep(Duration::from_millis(700)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_scheduled());
    assert_eq!(scheduler.remaining_time(), Duration::ZERO);

    let countdown = scheduler.subscribe().borrow().clone();
    assert_eq!(countdown.phase, CountdownPhase::Fired);
    assert_eq!(countdown.remaining, Duration::ZERO);

    let fired_at = fired_at.lock().unwrap().unwrap();
    let error = (fired_at - target).num_milliseconds().abs();
    assert!(error <= 10, "fired {error}ms away from target");

    sleep(Duration::from_secs(5)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn rescheduling_replaces_the_previous_action() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (first, _, first_action) = recorder(&clock);
    let (second, _, second_action) = recorder(&clock);

    assert!(scheduler.schedule(noon() + chrono::Duration::seconds(1), first_action));
    assert!(scheduler.schedule(noon() + chrono::Duration::seconds(2), second_action));

    sleep(Duration::from_secs(3)).await;
    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_prevents_firing() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (count, _, action) = recorder(&clock);

    assert!(scheduler.schedule(noon() + chrono::Duration::seconds(1), action));
    scheduler.cancel();
    scheduler.cancel();

    assert!(!scheduler.is_scheduled());
    assert_eq!(scheduler.subscribe().borrow().phase, CountdownPhase::Cancelled);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn countdown_is_published_every_second() {
    let (scheduler, _clock) = setup(SchedulerConfig::default());
    let mut countdown = scheduler.subscribe();

    assert!(scheduler.schedule(noon() + chrono::Duration::seconds(10), || {}));
    assert_eq!(countdown.borrow_and_update().remaining, Duration::from_secs(10));

    sleep(Duration::from_millis(3_050)).await;
    let latest = countdown.borrow_and_update().clone();
    assert_eq!(latest.phase, CountdownPhase::Pending);
    assert_eq!(latest.remaining, Duration::from_secs(7));
}

#[tokio::test(start_paused = true)]
async fn clock_jumping_forward_rearms_the_schedule() {
    let config = SchedulerConfig {
        drift_check_interval: Duration::from_secs(1),
        ..SchedulerConfig::default()
    };
    let (scheduler, clock) = setup(config);
    let (count, fired_at, action) = recorder(&clock);
    let target = noon() + chrono::Duration::seconds(10);

    assert!(scheduler.schedule(target, action));
    sleep(Duration::from_millis(2_000)).await;
    clock.skew(chrono::Duration::seconds(5));

    // Wall time now reads 7s past noon; the target is 3s of real time away.
    sleep(Duration::from_millis(2_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(1_000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let fired_at = fired_at.lock().unwrap().unwrap();
    assert!(fired_at >= target - chrono::Duration::milliseconds(5));
}

#[tokio::test(start_paused = true)]
async fn clock_jumping_backward_never_fires_early() {
    let config = SchedulerConfig {
        drift_check_interval: Duration::from_secs(1),
        ..SchedulerConfig::default()
    };
    let (scheduler, clock) = setup(config);
    let (count, fired_at, action) = recorder(&clock);
    let target = noon() + chrono::Duration::seconds(10);

    assert!(scheduler.schedule(target, action));
    sleep(Duration::from_millis(2_000)).await;
    clock.skew(chrono::Duration::seconds(-5));

    sleep(Duration::from_millis(10_500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    sleep(Duration::from_millis(3_000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    let fired_at = fired_at.lock().unwrap().unwrap();
    assert!(fired_at >= target - chrono::Duration::milliseconds(5));
}

#[tokio::test(start_paused = true)]
async fn signal_resolves_with_fire_time() {
    let (scheduler, _clock) = setup(SchedulerConfig::default());
    let target = noon() + chrono::Duration::milliseconds(750);

    let signal = scheduler.schedule_signal(target).unwrap();
    let fired_at = signal.await.unwrap();

    assert!(fired_at >= target - chrono::Duration::milliseconds(5));
    assert!(fired_at <= target + chrono::Duration::milliseconds(10));
}

#[tokio::test(start_paused = true)]
async fn short_delay_skips_straight_to_final_approach() {
    let (scheduler, clock) = setup(SchedulerConfig::default());
    let (count, _, action) = recorder(&clock);

    assert!(scheduler.schedule(noon() + chrono::Duration::milliseconds(40), action));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn untrusted_clock_is_reported() {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());
    let scheduler =
        DeferredExecutionScheduler::with_clock(SchedulerConfig::default(), clock).unwrap();

    assert!(matches!(
        scheduler.validate_system_time(),
        Err(CadenceError::UntrustedSystemClock { year: 2019 })
    ));
}

#[test]
fn scheduling_needs_a_runtime() {
    let scheduler = DeferredExecutionScheduler::new(SchedulerConfig::default()).unwrap();
    let result = scheduler.try_schedule(Utc::now() + chrono::Duration::hours(1), || {});
    assert!(matches!(result, Err(CadenceError::NoRuntime)));
    assert!(!scheduler.is_scheduled());
}

#[test]
fn invalid_config_is_rejected() {
    let config = SchedulerConfig {
        countdown_interval: Duration::ZERO,
        ..SchedulerConfig::default()
    };
    assert!(DeferredExecutionScheduler::new(config).is_err());
}
