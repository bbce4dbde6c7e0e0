use async_trait::async_trait;
use chrono::{Days, NaiveDate, NaiveTime};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::database::models::Prayer;
use crate::error::ReminderError;

/// Prayer times for one city on one calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyTimings {
    times: BTreeMap<Prayer, NaiveTime>,
}

impl DailyTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, prayer: Prayer, time: NaiveTime) -> Self {
        self.times.insert(prayer, time);
        self
    }

    pub fn get(&self, prayer: Prayer) -> Option<NaiveTime> {
        self.times.get(&prayer).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Prayer, NaiveTime)> + '_ {
        self.times.iter().map(|(prayer, time)| (*prayer, *time))
    }
}

impl FromIterator<(Prayer, NaiveTime)> for DailyTimings {
    fn from_iter<I: IntoIterator<Item = (Prayer, NaiveTime)>>(iter: I) -> Self {
        Self {
            times: iter.into_iter().collect(),
        }
    }
}

/// Looks up the day's prayer times for a city.
#[async_trait]
pub trait PrayerTimeResolver: Send + Sync {
    async fn resolve_timings(
        &self,
        city: &str,
        country: &str,
        date: NaiveDate,
    ) -> Result<DailyTimings, ReminderError>;

    /// Fajr time for the given day.
    async fn resolve_prayer_time(
        &self,
        city: &str,
        country: &str,
        date: NaiveDate,
    ) -> Result<NaiveTime, ReminderError> {
        self.resolve_timings(city, country, date)
            .await?
            .get(Prayer::Fajr)
            .ok_or_else(|| ReminderError::LookupUnavailable(format!("no Fajr time for {city}, {country}")))
    }
}

#[derive(Debug, Deserialize)]
struct AladhanResponse {
    data: AladhanData,
}

#[derive(Debug, Deserialize)]
struct AladhanData {
    timings: HashMap<String, String>,
}

/// Client for the Aladhan `timingsByCity` endpoint.
pub struct AladhanClient {
    client: reqwest::Client,
    base_url: String,
    method: u8,
}

impl AladhanClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, method: u8) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            method,
        }
    }
}

#[async_trait]
impl PrayerTimeResolver for AladhanClient {
    async fn resolve_timings(
        &self,
        city: &str,
        country: &str,
        date: NaiveDate,
    ) -> Result<DailyTimings, ReminderError> {
        let url = format!(
            "{}/timingsByCity/{}",
            self.base_url.trim_end_matches('/'),
            date.format("%d-%m-%Y")
        );
        let method = self.method.to_string();

        let response: AladhanResponse = self
            .client
            .get(&url)
            .query(&[("city", city), ("country", country), ("method", method.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        timings_from_payload(&response.data.timings)
    }
}

/// Parses `"05:12"` as well as annotated values such as `"05:12 (EET)"`.
pub fn parse_prayer_clock(raw: &str) -> Option<NaiveTime> {
    let clock = raw.split_whitespace().next()?;
    NaiveTime::parse_from_str(clock, "%H:%M").ok()
}

fn timings_from_payload(timings: &HashMap<String, String>) -> Result<DailyTimings, ReminderError> {
    let mut parsed = DailyTimings::new();

    for prayer in Prayer::ALL {
        let Some(raw) = timings.get(prayer.as_str()) else {
            continue;
        };
        let time = parse_prayer_clock(raw).ok_or_else(|| {
            ReminderError::LookupUnavailable(format!("malformed {prayer} time '{raw}'"))
        })?;
        parsed = parsed.with(prayer, time);
    }

    if parsed.is_empty() {
        return Err(ReminderError::LookupUnavailable(
            "prayer time response contained no timings".to_string(),
        ));
    }
    Ok(parsed)
}

type CacheKey = (String, String, NaiveDate);

/// Memoises daily timings per city, country and date.
///
/// Timings only change once a day, so after the first tick of a day the
/// reminder loop makes no further prayer-time requests for that city.
pub struct PrayerTimeCache<R> {
    inner: R,
    entries: RwLock<HashMap<CacheKey, DailyTimings>>,
}

impl<R: PrayerTimeResolver> PrayerTimeCache<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<R: PrayerTimeResolver> PrayerTimeResolver for PrayerTimeCache<R> {
    async fn resolve_timings(
        &self,
        city: &str,
        country: &str,
        date: NaiveDate,
    ) -> Result<DailyTimings, ReminderError> {
        let key = (city.trim().to_lowercase(), country.trim().to_lowercase(), date);
        if let Some(timings) = self.entries.read().await.get(&key) {
            return Ok(timings.clone());
        }

        let timings = self.inner.resolve_timings(city, country, date).await?;

        let mut entries = self.entries.write().await;
        // Users span timezones, so keep the previous day around as well.
        if let Some(oldest_kept) = date.checked_sub_days(Days::new(1)) {
            entries.retain(|(_, _, cached), _| *cached >= oldest_kept);
        }
        entries.insert(key, timings.clone());

        Ok(timings)
    }
}
