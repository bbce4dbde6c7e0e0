#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use fajr_reminder_bot::database::connection::DatabaseManager;
use fajr_reminder_bot::database::models::{Prayer, ReminderOccurrence, UserId, UserPreference};
use fajr_reminder_bot::database::registration::RegistrationStore;
use fajr_reminder_bot::error::ReminderError;
use fajr_reminder_bot::services::notifier::Notifier;
use fajr_reminder_bot::services::prayer_times::{DailyTimings, PrayerTimeResolver};
use fajr_reminder_bot::services::reminder::{
    ReminderCollaborators, ReminderEngine, ReminderService, ReminderSettings, RetryPolicy,
};
use fajr_reminder_bot::services::timezone::{LocalTime, TimeResolver};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};

struct FakeStore {
    users: Mutex<Vec<UserPreference>>,
    failing: AtomicBool,
}

#[async_trait]
impl RegistrationStore for FakeStore {
    async fn load(&self) -> Result<Vec<UserPreference>, ReminderError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReminderError::StoreUnavailable("users.json is corrupt".into()));
        }
        Ok(self.users.lock().unwrap().clone())
    }

    async fn upsert(&self, preference: UserPreference) -> Result<(), ReminderError> {
        let mut users = self.users.lock().unwrap();
        users.retain(|user| user.user_id != preference.user_id);
        users.push(preference);
        Ok(())
    }
}

/// Resolves known cities against a settable clock.
struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    transient_failures: AtomicUsize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeClock {
    fn set_cairo(&self, hour: u32, minute: u32, second: u32) {
        let local = Tz::Africa__Cairo
            .with_ymd_and_hms(2025, 3, 1, hour, minute, second)
            .unwrap();
        *self.now.lock().unwrap() = local.with_timezone(&Utc);
    }
}

#[async_trait]
impl TimeResolver for FakeClock {
    async fn resolve_local_time(&self, city: &str) -> Result<LocalTime, ReminderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(ReminderError::LookupUnavailable("geocoder returned 503".into()));
        }

        let zone = match city {
            "Cairo" => Tz::Africa__Cairo,
            "Tunis" => Tz::Africa__Tunis,
            _ => return Err(ReminderError::GeocodeNotFound(city.to_string())),
        };
        let now = *self.now.lock().unwrap();
        Ok(LocalTime::new(now.with_timezone(&zone)))
    }
}

/// Local time in Cairo that runs `speedup` times faster than the wall
/// clock. Cities named `Slow…` hang until the lookup times out.
struct FastForwardClock {
    started: Instant,
    base: DateTime<Utc>,
    speedup: u32,
}

#[async_trait]
impl TimeResolver for FastForwardClock {
    async fn resolve_local_time(&self, city: &str) -> Result<LocalTime, ReminderError> {
        if city.starts_with("Slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let elapsed = chrono::TimeDelta::from_std(self.started.elapsed() * self.speedup).unwrap();
        Ok(LocalTime::new((self.base + elapsed).with_timezone(&Tz::Africa__Cairo)))
    }
}

struct FixedTimings;

#[async_trait]
impl PrayerTimeResolver for FixedTimings {
    async fn resolve_timings(
        &self,
        _city: &str,
        _country: &str,
        _date: NaiveDate,
    ) -> Result<DailyTimings, ReminderError> {
        Ok(DailyTimings::new()
            .with(Prayer::Fajr, NaiveTime::from_hms_opt(5, 12, 0).unwrap())
            .with(Prayer::Isha, NaiveTime::from_hms_opt(19, 1, 0).unwrap()))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(UserId, String)>>,
    attempts: AtomicUsize,
    failing_users: HashSet<UserId>,
}

impl RecordingNotifier {
    fn sent(&self) -> Vec<(UserId, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: UserId, text: &str) -> Result<(), ReminderError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_users.contains(&user_id) {
            return Err(ReminderError::NotificationSendFailed {
                user_id,
                reason: "Forbidden: bot was blocked by the user".into(),
            });
        }
        self.sent.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }
}

struct Harness {
    engine: Arc<ReminderEngine>,
    store: Arc<FakeStore>,
    clock: Arc<FakeClock>,
    notifier: Arc<RecordingNotifier>,
    db: Arc<DatabaseManager>,
    _dir: TempDir,
}

fn test_settings() -> ReminderSettings {
    ReminderSettings {
        tick_interval: Duration::from_secs(60),
        lookup_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            retries: 2,
            initial_backoff: Duration::from_millis(1),
        },
        max_concurrent_lookups: 4,
        prayers: vec![Prayer::Fajr],
        // Far enough back that test dates survive the daily prune.
        occurrence_retention_days: 3650,
    }
}

async fn setup_ledger() -> (Arc<DatabaseManager>, TempDir) {
    let dir = tempdir().unwrap();
    let db_url = format!("sqlite:{}", dir.path().join("test.db").to_string_lossy());
    let db = DatabaseManager::new(&db_url).await.unwrap();
    db.run_migrations().await.unwrap();
    (Arc::new(db), dir)
}

async fn harness_with(
    users: Vec<UserPreference>,
    settings: ReminderSettings,
    clock: FakeClock,
    notifier: RecordingNotifier,
) -> Harness {
    let (db, dir) = setup_ledger().await;
    let store = Arc::new(FakeStore {
        users: Mutex::new(users),
        failing: AtomicBool::new(false),
    });
    let clock = Arc::new(clock);
    let notifier = Arc::new(notifier);

    let engine = Arc::new(ReminderEngine::new(
        ReminderCollaborators {
            store: store.clone(),
            time_resolver: clock.clone(),
            prayer_times: Arc::new(FixedTimings),
            notifier: notifier.clone(),
            db: db.clone(),
        },
        settings,
    ));

    Harness {
        engine,
        store,
        clock,
        notifier,
        db,
        _dir: dir,
    }
}

fn clock() -> FakeClock {
    FakeClock {
        now: Mutex::new(Utc::now()),
        transient_failures: AtomicUsize::new(0),
        delay: None,
        calls: AtomicUsize::new(0),
    }
}

async fn harness(users: Vec<UserPreference>) -> Harness {
    harness_with(users, test_settings(), clock(), RecordingNotifier::default()).await
}

fn march_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

#[tokio::test]
async fn test_fajr_reminder_sent_once_per_day() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;

    h.clock.set_cairo(5, 12, 7);
    let first = h.engine.run_tick().await;

    assert_eq!(first.users_evaluated, 1);
    assert_eq!(first.notifications_sent, 1);
    assert_eq!(
        h.notifier.sent(),
        vec![(1, "🌙 It's time for Fajr prayer! (05:12 in Cairo)".to_string())]
    );
    assert!(ReminderOccurrence::exists(&h.db.pool, 1, march_first(), Prayer::Fajr)
        .await
        .unwrap());

    // Second tick inside the same minute.
    h.clock.set_cairo(5, 12, 45);
    let second = h.engine.run_tick().await;

    assert_eq!(second.notifications_sent, 0);
    assert_eq!(second.already_notified, 1);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[tokio::test]
async fn test_nothing_sent_outside_the_window() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;

    h.clock.set_cairo(5, 11, 30);
    let before = h.engine.run_tick().await;
    h.clock.set_cairo(5, 11, 59);
    let just_before = h.engine.run_tick().await;

    assert_eq!(before.notifications_sent, 0);
    assert_eq!(just_before.notifications_sent, 0);
    assert!(h.notifier.sent().is_empty());

    // First seen a full tick after the prayer.
    let late = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;
    late.clock.set_cairo(5, 13, 0);
    let after = late.engine.run_tick().await;

    assert_eq!(after.notifications_sent, 0);
    assert_eq!(after.already_notified, 0);
    assert!(late.notifier.sent().is_empty());
    assert_eq!(ReminderOccurrence::count(&late.db.pool).await.unwrap(), 0);
}

#[tokio::test]
async fn test_late_tick_covers_the_time_since_the_previous_one() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;

    h.clock.set_cairo(5, 11, 30);
    h.engine.run_tick().await;
    // Two minutes later; 05:12 is more than a tick ago but after the last look.
    h.clock.set_cairo(5, 13, 30);
    let late = h.engine.run_tick().await;

    assert_eq!(late.notifications_sent, 1);
    assert_eq!(
        h.notifier.sent(),
        vec![(1, "🌙 It's time for Fajr prayer! (05:12 in Cairo)".to_string())]
    );
}

#[tokio::test]
async fn test_catch_up_after_a_long_stall_is_capped() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;

    h.clock.set_cairo(5, 0, 0);
    h.engine.run_tick().await;
    h.clock.set_cairo(6, 0, 0);
    let stale = h.engine.run_tick().await;

    assert_eq!(stale.notifications_sent, 0);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overlapping_ticks_send_once() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;
    h.clock.set_cairo(5, 12, 10);

    let (a, b) = tokio::join!(h.engine.run_tick(), h.engine.run_tick());

    assert_eq!(a.notifications_sent + b.notifications_sent, 1);
    assert_eq!(a.already_notified + b.already_notified, 1);
    assert_eq!(h.notifier.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(ReminderOccurrence::count(&h.db.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn test_empty_store_is_an_idle_tick() {
    let h = harness(vec![]).await;

    h.clock.set_cairo(5, 12, 0);
    let report = h.engine.run_tick().await;

    assert_eq!(report.users_evaluated, 0);
    assert!(!report.store_unavailable);
    assert_eq!(h.notifier.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(h.engine.status().await.ticks_completed, 1);
}

#[tokio::test]
async fn test_one_failing_user_does_not_block_others() {
    let h = harness(vec![
        UserPreference::new(1, "Cairo", "Egypt"),
        UserPreference::new(2, "Atlantis", "Nowhere"),
        UserPreference::new(3, "Cairo", "Egypt"),
    ])
    .await;

    h.clock.set_cairo(5, 12, 30);
    let report = h.engine.run_tick().await;

    assert_eq!(report.users_evaluated, 3);
    assert_eq!(report.notifications_sent, 2);
    assert_eq!(report.user_failures, 1);

    let mut recipients: Vec<UserId> = h.notifier.sent().into_iter().map(|(id, _)| id).collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec![1, 3]);
}

#[tokio::test]
async fn test_unavailable_store_skips_the_tick_then_recovers() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;
    h.store.failing.store(true, Ordering::SeqCst);

    h.clock.set_cairo(5, 12, 5);
    let skipped = h.engine.run_tick().await;

    assert!(skipped.store_unavailable);
    assert_eq!(skipped.users_evaluated, 0);
    assert!(h.notifier.sent().is_empty());
    assert_eq!(ReminderOccurrence::count(&h.db.pool).await.unwrap(), 0);

    h.store.failing.store(false, Ordering::SeqCst);
    h.clock.set_cairo(5, 12, 50);
    let recovered = h.engine.run_tick().await;

    assert!(!recovered.store_unavailable);
    assert_eq!(recovered.notifications_sent, 1);
    assert_eq!(h.engine.status().await.ticks_completed, 2);
}

#[tokio::test]
async fn test_failed_send_is_not_retried_for_the_same_occurrence() {
    let notifier = RecordingNotifier {
        failing_users: HashSet::from([1]),
        ..RecordingNotifier::default()
    };
    let h = harness_with(
        vec![
            UserPreference::new(1, "Cairo", "Egypt"),
            UserPreference::new(2, "Cairo", "Egypt"),
        ],
        test_settings(),
        clock(),
        notifier,
    )
    .await;

    h.clock.set_cairo(5, 12, 10);
    let first = h.engine.run_tick().await;

    assert_eq!(first.send_failures, 1);
    assert_eq!(first.notifications_sent, 1);
    assert!(ReminderOccurrence::exists(&h.db.pool, 1, march_first(), Prayer::Fajr)
        .await
        .unwrap());

    h.clock.set_cairo(5, 12, 40);
    let second = h.engine.run_tick().await;

    assert_eq!(second.already_notified, 2);
    assert_eq!(h.notifier.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_transient_lookup_failures_are_retried() {
    let flaky = FakeClock {
        transient_failures: AtomicUsize::new(2),
        ..clock()
    };
    let h = harness_with(
        vec![UserPreference::new(1, "Cairo", "Egypt")],
        test_settings(),
        flaky,
        RecordingNotifier::default(),
    )
    .await;

    h.clock.set_cairo(5, 12, 0);
    let report = h.engine.run_tick().await;

    assert_eq!(report.notifications_sent, 1);
    assert_eq!(report.user_failures, 0);
    assert_eq!(h.clock.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let broken = FakeClock {
        transient_failures: AtomicUsize::new(10),
        ..clock()
    };
    let h = harness_with(
        vec![UserPreference::new(1, "Cairo", "Egypt")],
        test_settings(),
        broken,
        RecordingNotifier::default(),
    )
    .await;

    h.clock.set_cairo(5, 12, 0);
    let report = h.engine.run_tick().await;

    assert_eq!(report.user_failures, 1);
    assert_eq!(report.notifications_sent, 0);
    assert_eq!(h.clock.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unknown_city_is_not_retried() {
    let h = harness(vec![UserPreference::new(9, "Atlantis", "Nowhere")]).await;

    let report = h.engine.run_tick().await;

    assert_eq!(report.user_failures, 1);
    assert_eq!(h.clock.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_slow_lookup_times_out() {
    let slow = FakeClock {
        delay: Some(Duration::from_millis(500)),
        ..clock()
    };
    let settings = ReminderSettings {
        lookup_timeout: Duration::from_millis(20),
        retry: RetryPolicy {
            retries: 0,
            initial_backoff: Duration::from_millis(1),
        },
        ..test_settings()
    };
    let h = harness_with(
        vec![UserPreference::new(1, "Cairo", "Egypt")],
        settings,
        slow,
        RecordingNotifier::default(),
    )
    .await;

    let report = h.engine.run_tick().await;

    assert_eq!(report.user_failures, 1);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_each_configured_prayer_is_tracked_separately() {
    let settings = ReminderSettings {
        prayers: vec![Prayer::Fajr, Prayer::Isha],
        ..test_settings()
    };
    let h = harness_with(
        vec![UserPreference::new(1, "Cairo", "Egypt")],
        settings,
        clock(),
        RecordingNotifier::default(),
    )
    .await;

    h.clock.set_cairo(5, 12, 0);
    h.engine.run_tick().await;
    h.clock.set_cairo(19, 1, 30);
    let evening = h.engine.run_tick().await;

    assert_eq!(evening.notifications_sent, 1);
    assert_eq!(h.notifier.sent()[1].1, "🌙 It's time for Isha prayer! (19:01 in Cairo)");

    let recorded = ReminderOccurrence::find_by_user(&h.db.pool, 1).await.unwrap();
    let prayers: Vec<&str> = recorded.iter().map(|o| o.prayer.as_str()).collect();
    assert_eq!(prayers, vec!["Fajr", "Isha"]);
}

#[tokio::test]
async fn test_local_date_is_used_for_the_occurrence() {
    let h = harness(vec![UserPreference::new(1, "Tunis", "Tunisia")]).await;

    // 05:12 in Tunis (UTC+1) is 06:12 in Cairo on the same day.
    h.clock.set_cairo(6, 12, 0);
    h.engine.run_tick().await;

    assert_eq!(h.notifier.sent()[0].1, "🌙 It's time for Fajr prayer! (05:12 in Tunis)");

    let recorded = ReminderOccurrence::find_by_user(&h.db.pool, 1).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].date(), Some(march_first()));
}

#[tokio::test]
async fn test_old_occurrences_are_pruned() {
    let h = harness(vec![]).await;
    let ancient = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    ReminderOccurrence::record(&h.db.pool, 1, ancient, Prayer::Fajr).await.unwrap();
    ReminderOccurrence::record(&h.db.pool, 1, march_first(), Prayer::Fajr).await.unwrap();

    h.engine.run_tick().await;

    let remaining = ReminderOccurrence::find_by_user(&h.db.pool, 1).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].date(), Some(march_first()));
}

#[tokio::test]
async fn test_service_runs_until_stopped() {
    let h = harness(vec![UserPreference::new(1, "Cairo", "Egypt")]).await;
    h.clock.set_cairo(5, 12, 3);

    let mut service = ReminderService::new(h.engine.clone());
    service.start().await.unwrap();
    assert!(service.is_running());
    assert!(service.start().await.is_err());

    for _ in 0..100 {
        if h.engine.status().await.ticks_completed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    service.stop().await.unwrap();
    assert!(!service.is_running());

    let status = h.engine.status().await;
    assert!(status.ticks_completed >= 1);
    assert!(status.last_tick_at.is_some());
    assert_eq!(h.notifier.sent().len(), 1);

    // Manual check after stop still works and stays idempotent.
    let manual = service.check_reminders_now().await;
    assert_eq!(manual.already_notified, 1);
}

#[tokio::test]
async fn test_overrunning_tick_does_not_skip_a_due_reminder() {
    // 400ms of wall time is one minute in Cairo.
    let settings = ReminderSettings {
        tick_interval: Duration::from_millis(400),
        lookup_timeout: Duration::from_millis(300),
        retry: RetryPolicy {
            retries: 0,
            initial_backoff: Duration::from_millis(1),
        },
        max_concurrent_lookups: 1,
        ..test_settings()
    };
    let (db, _dir) = setup_ledger().await;
    let notifier = Arc::new(RecordingNotifier::default());
    let store = Arc::new(FakeStore {
        // Two slow lookups ahead of Cairo stretch every tick past its interval.
        users: Mutex::new(vec![
            UserPreference::new(1, "Slow One", "Nowhere"),
            UserPreference::new(2, "Slow Two", "Nowhere"),
            UserPreference::new(3, "Cairo", "Egypt"),
        ]),
        failing: AtomicBool::new(false),
    });
    let base = Tz::Africa__Cairo
        .with_ymd_and_hms(2025, 3, 1, 5, 10, 0)
        .unwrap()
        .with_timezone(&Utc);
    let engine = Arc::new(ReminderEngine::new(
        ReminderCollaborators {
            store,
            time_resolver: Arc::new(FastForwardClock {
                started: Instant::now(),
                base,
                speedup: 150,
            }),
            prayer_times: Arc::new(FixedTimings),
            notifier: notifier.clone(),
            db: db.clone(),
        },
        settings,
    ));

    // Cairo is seen around 05:11:30, then around 05:13:30 after a skipped tick.
    let mut service = ReminderService::new(engine.clone());
    service.start().await.unwrap();
    for _ in 0..100 {
        if !notifier.sent().is_empty() || engine.status().await.ticks_completed >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    service.stop().await.unwrap();

    assert_eq!(
        notifier.sent(),
        vec![(3, "🌙 It's time for Fajr prayer! (05:12 in Cairo)".to_string())]
    );
}
