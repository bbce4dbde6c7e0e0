use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::database::connection::DatabaseManager;
use crate::database::models::{Prayer, ReminderOccurrence, UserId, UserPreference};
use crate::database::registration::RegistrationStore;
use crate::error::ReminderError;
use crate::services::notifier::Notifier;
use crate::services::prayer_times::PrayerTimeResolver;
use crate::services::timezone::TimeResolver;
use crate::utils::datetime::format_clock;
use crate::utils::logging::{
    log_reminder_failed, log_reminder_sent, log_tick_report, log_user_skipped,
};

/// Longest stretch of a user's local time a single evaluation will cover
/// after the loop fell behind.
const MAX_CATCH_UP: Duration = Duration::from_secs(30 * 60);

/// Retry schedule for transient lookup failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReminderSettings {
    /// Cadence of the loop, and the narrowest "due" window.
    pub tick_interval: Duration,
    /// Budget for each external call.
    pub lookup_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_concurrent_lookups: usize,
    pub prayers: Vec<Prayer>,
    pub occurrence_retention_days: u32,
}

impl ReminderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval,
            lookup_timeout: config.lookup_timeout,
            retry: RetryPolicy {
                retries: config.lookup_retries,
                ..RetryPolicy::default()
            },
            max_concurrent_lookups: config.max_concurrent_lookups,
            prayers: config.reminder_prayers.clone(),
            occurrence_retention_days: config.occurrence_retention_days,
        }
    }
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            max_concurrent_lookups: 8,
            prayers: vec![Prayer::Fajr],
            occurrence_retention_days: 30,
        }
    }
}

/// Everything the loop talks to.
#[derive(Clone)]
pub struct ReminderCollaborators {
    pub store: Arc<dyn RegistrationStore>,
    pub time_resolver: Arc<dyn TimeResolver>,
    pub prayer_times: Arc<dyn PrayerTimeResolver>,
    pub notifier: Arc<dyn Notifier>,
    pub db: Arc<DatabaseManager>,
}

/// Outcome of one pass over all registered users.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    pub users_evaluated: usize,
    pub notifications_sent: usize,
    pub already_notified: usize,
    pub user_failures: usize,
    pub send_failures: usize,
    pub store_unavailable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStatus {
    pub ticks_completed: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

pub type SharedLoopStatus = Arc<RwLock<LoopStatus>>;

#[derive(Debug, Default)]
struct UserOutcome {
    sent: usize,
    already_notified: usize,
    send_failures: usize,
}

/// Whether a prayer at `prayer_time` falls in the window ending at `now`:
/// `0 <= now - prayer_time < window`.
pub fn is_due(now: NaiveDateTime, prayer_time: NaiveTime, window: Duration) -> bool {
    due_occurrence(now, prayer_time, window).is_some()
}

/// The calendar day whose prayer at `prayer_time` falls in the window
/// ending at `now`, if any. A window reaching back past midnight can hold
/// the previous day's prayer.
pub fn due_occurrence(now: NaiveDateTime, prayer_time: NaiveTime, window: Duration) -> Option<NaiveDate> {
    let window = TimeDelta::from_std(window).ok()?;
    let today = now.date();

    [Some(today), today.pred_opt()]
        .into_iter()
        .flatten()
        .find(|date| {
            let elapsed = now - date.and_time(prayer_time);
            elapsed >= TimeDelta::zero() && elapsed < window
        })
}

pub fn reminder_message(prayer: Prayer, prayer_time: NaiveTime, city: &str) -> String {
    format!(
        "🌙 It's time for {} prayer! ({} in {})",
        prayer,
        format_clock(prayer_time),
        city
    )
}

/// Runs `call` with a deadline, folding an elapsed deadline into
/// `LookupUnavailable`.
pub async fn bounded<T, Fut>(limit: Duration, what: &str, call: Fut) -> Result<T, ReminderError>
where
    Fut: Future<Output = Result<T, ReminderError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(ReminderError::timed_out(what, limit)))
}

/// The reconciliation pass: compares each user's local time with their
/// prayer times and delivers every due reminder at most once.
pub struct ReminderEngine {
    collaborators: ReminderCollaborators,
    settings: ReminderSettings,
    status: SharedLoopStatus,
    last_prune: Mutex<Option<NaiveDate>>,
    /// Local instant (as UTC) each user was last evaluated at.
    last_observed: Mutex<HashMap<UserId, DateTime<Utc>>>,
}

impl ReminderEngine {
    pub fn new(collaborators: ReminderCollaborators, settings: ReminderSettings) -> Self {
        Self {
            collaborators,
            settings,
            status: Arc::new(RwLock::new(LoopStatus::default())),
            last_prune: Mutex::new(None),
            last_observed: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &ReminderSettings {
        &self.settings
    }

    pub fn status_handle(&self) -> SharedLoopStatus {
        Arc::clone(&self.status)
    }

    pub async fn status(&self) -> LoopStatus {
        self.status.read().await.clone()
    }

    /// Evaluates every registered user once.
    ///
    /// Never fails: an unreadable store skips the tick, and per-user errors
    /// are logged and counted without affecting other users.
    pub async fn run_tick(self: &Arc<Self>) -> TickReport {
        let mut report = TickReport::default();

        let preferences = match self.collaborators.store.load().await {
            Ok(preferences) => preferences,
            Err(e) => {
                tracing::error!("Skipping reminder tick: {}", e);
                report.store_unavailable = true;
                self.finish_tick(&report).await;
                return report;
            }
        };
        report.users_evaluated = preferences.len();

        let registered: HashSet<UserId> = preferences.iter().map(|p| p.user_id).collect();
        self.last_observed
            .lock()
            .await
            .retain(|user_id, _| registered.contains(user_id));

        let permits = Arc::new(Semaphore::new(self.settings.max_concurrent_lookups.max(1)));
        let mut tasks = JoinSet::new();

        for preference in preferences {
            let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                break;
            };
            let engine = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let outcome = engine.evaluate_user(&preference).await;
                (preference, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(outcome))) => {
                    report.notifications_sent += outcome.sent;
                    report.already_notified += outcome.already_notified;
                    report.send_failures += outcome.send_failures;
                }
                Ok((preference, Err(e))) => {
                    report.user_failures += 1;
                    log_user_skipped(preference.user_id, &preference.city, &e);
                }
                Err(e) => {
                    report.user_failures += 1;
                    tracing::error!("Reminder evaluation task failed: {}", e);
                }
            }
        }

        self.prune_ledger().await;
        self.finish_tick(&report).await;
        report
    }

    async fn evaluate_user(&self, preference: &UserPreference) -> Result<UserOutcome, ReminderError> {
        let local = self
            .lookup("time resolution", || {
                self.collaborators
                    .time_resolver
                    .resolve_local_time_in(&preference.city, &preference.country)
            })
            .await?;
        let today = local.today();
        let observed_at = local.now.with_timezone(&Utc);
        let window = self.due_window(preference.user_id, observed_at).await;

        let timings = self
            .lookup("prayer time lookup", || {
                self.collaborators
                    .prayer_times
                    .resolve_timings(&preference.city, &preference.country, today)
            })
            .await?;

        let now = local.now.naive_local();
        let mut outcome = UserOutcome::default();

        for &prayer in &self.settings.prayers {
            let Some(prayer_time) = timings.get(prayer) else {
                tracing::warn!(
                    "No {} time for user {} ({}, {})",
                    prayer, preference.user_id, preference.city, preference.country
                );
                continue;
            };

            // Yesterday's prayer, if due, is approximated by today's time.
            let Some(occurrence_date) = due_occurrence(now, prayer_time, window) else {
                continue;
            };

            // Claim before sending so a repeated or overlapping tick can't send twice.
            let claimed = ReminderOccurrence::record(
                &self.collaborators.db.pool,
                preference.user_id,
                occurrence_date,
                prayer,
            )
            .await?;
            if !claimed {
                tracing::debug!(
                    "{} reminder for user {} on {} already sent",
                    prayer, preference.user_id, occurrence_date
                );
                outcome.already_notified += 1;
                continue;
            }

            let message = reminder_message(prayer, prayer_time, &preference.city);
            let sent = tokio::time::timeout(
                self.settings.lookup_timeout,
                self.collaborators.notifier.notify(preference.user_id, &message),
            )
            .await
            .unwrap_or_else(|_| {
                Err(ReminderError::NotificationSendFailed {
                    user_id: preference.user_id,
                    reason: "timed out".to_string(),
                })
            });

            match sent {
                Ok(()) => {
                    outcome.sent += 1;
                    log_reminder_sent(preference.user_id, &preference.city, prayer);
                }
                Err(e) => {
                    outcome.send_failures += 1;
                    log_reminder_failed(preference.user_id, prayer, &e);
                }
            }
        }

        self.mark_observed(preference.user_id, observed_at).await;
        Ok(outcome)
    }

    /// Width of the due window for an evaluation at `observed_at`.
    ///
    /// Spans back to the user's previous evaluation, so consecutive windows
    /// tile even when a slow tick delays the next one. Never narrower than
    /// a tick and never wider than [`MAX_CATCH_UP`].
    async fn due_window(&self, user_id: UserId, observed_at: DateTime<Utc>) -> Duration {
        let tick = self.settings.tick_interval;
        let previous = self.last_observed.lock().await.get(&user_id).copied();

        previous
            .and_then(|previous| (observed_at - previous).to_std().ok())
            .map_or(tick, |gap| gap.clamp(tick, tick.max(MAX_CATCH_UP)))
    }

    async fn mark_observed(&self, user_id: UserId, observed_at: DateTime<Utc>) {
        let mut last_observed = self.last_observed.lock().await;
        let seen = last_observed.entry(user_id).or_insert(observed_at);
        if *seen < observed_at {
            *seen = observed_at;
        }
    }

    /// Bounded call with retries on transient failures.
    async fn lookup<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, ReminderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReminderError>>,
    {
        let mut attempt = 0;
        loop {
            match bounded(self.settings.lookup_timeout, what, call()).await {
                Err(e) if e.is_transient() && attempt < self.settings.retry.retries => {
                    let delay = self.settings.retry.backoff(attempt);
                    tracing::debug!("{} failed ({}), retrying in {:?}", what, e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Drops ledger rows past the retention horizon, at most once per UTC day.
    async fn prune_ledger(&self) {
        let today = Utc::now().date_naive();
        {
            let mut last_prune = self.last_prune.lock().await;
            if *last_prune == Some(today) {
                return;
            }
            *last_prune = Some(today);
        }

        let retention = Days::new(u64::from(self.settings.occurrence_retention_days));
        let Some(horizon) = today.checked_sub_days(retention) else {
            return;
        };

        match ReminderOccurrence::prune_before(&self.collaborators.db.pool, horizon).await {
            Ok(0) => {}
            Ok(pruned) => tracing::info!("Pruned {} reminder occurrences before {}", pruned, horizon),
            Err(e) => tracing::warn!("Failed to prune reminder occurrences: {}", e),
        }
    }

    async fn finish_tick(&self, report: &TickReport) {
        log_tick_report(report);

        let mut status = self.status.write().await;
        status.ticks_completed += 1;
        status.last_tick_at = Some(Utc::now());
        status.last_report = Some(report.clone());
    }
}

/// Owns the background task that drives [`ReminderEngine`] on a fixed cadence.
pub struct ReminderService {
    engine: Arc<ReminderEngine>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl ReminderService {
    pub fn new(engine: Arc<ReminderEngine>) -> Self {
        Self {
            engine,
            shutdown: None,
            task: None,
        }
    }

    pub fn engine(&self) -> Arc<ReminderEngine> {
        Arc::clone(&self.engine)
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.task.is_some() {
            anyhow::bail!("Reminder service is already running");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine = Arc::clone(&self.engine);
        self.task = Some(tokio::spawn(run_loop(engine, shutdown_rx)));
        self.shutdown = Some(shutdown_tx);

        tracing::info!(
            "Reminder service started - checking every {}s",
            self.engine.settings().tick_interval.as_secs()
        );
        Ok(())
    }

    /// Signals the loop to stop and waits for it; a tick in progress finishes first.
    pub async fn stop(&mut self) -> anyhow::Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(task) = self.task.take() {
            task.await?;
        }
        Ok(())
    }

    /// Runs a single tick immediately.
    pub async fn check_reminders_now(&self) -> TickReport {
        self.engine.run_tick().await
    }
}

async fn run_loop(engine: Arc<ReminderEngine>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(engine.settings().tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::info!("Reminder loop shutting down");
                    break;
                }
            }
            _ = interval.tick() => {
                engine.run_tick().await;
            }
        }
    }
}
