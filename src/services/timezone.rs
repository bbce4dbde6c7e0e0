use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::ReminderError;

/// Wall-clock time in a user's city.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTime {
    pub timezone: Tz,
    pub now: DateTime<Tz>,
}

impl LocalTime {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self {
            timezone: now.timezone(),
            now,
        }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

/// Resolves the current local time for a city.
#[async_trait]
pub trait TimeResolver: Send + Sync {
    async fn resolve_local_time(&self, city: &str) -> Result<LocalTime, ReminderError>;

    /// Like [`TimeResolver::resolve_local_time`], but disambiguates city
    /// names shared by several countries.
    async fn resolve_local_time_in(&self, city: &str, _country: &str) -> Result<LocalTime, ReminderError> {
        self.resolve_local_time(city).await
    }
}

/// Candidates fetched when a country is known, to pick the right namesake.
const COUNTRY_CANDIDATES: &str = "10";

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Option<Vec<GeocodedPlace>>,
}

#[derive(Debug, Deserialize)]
struct GeocodedPlace {
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    country_code: Option<String>,
}

impl GeocodedPlace {
    fn is_in(&self, country: &str) -> bool {
        let country = country.trim();
        [&self.country, &self.country_code]
            .into_iter()
            .flatten()
            .any(|name| name.eq_ignore_ascii_case(country))
    }
}

/// Geocodes cities through the Open-Meteo geocoding API, which returns the
/// IANA timezone of each match.
pub struct OpenMeteoTimeResolver {
    client: reqwest::Client,
    base_url: String,
    zones: RwLock<HashMap<String, Tz>>,
}

impl OpenMeteoTimeResolver {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            zones: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up the timezone of `city`, caching successful answers.
    ///
    /// With a `country`, the first match in that country (by name or ISO
    /// code) wins; otherwise the best-ranked match does.
    pub async fn resolve_timezone(&self, city: &str, country: Option<&str>) -> Result<Tz, ReminderError> {
        let country = country.map(str::trim).filter(|country| !country.is_empty());
        let key = format!(
            "{}|{}",
            city.trim().to_lowercase(),
            country.unwrap_or_default().to_lowercase()
        );
        if let Some(zone) = self.zones.read().await.get(&key) {
            return Ok(*zone);
        }

        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let count = if country.is_some() { COUNTRY_CANDIDATES } else { "1" };
        let response: GeocodingResponse = self
            .client
            .get(&url)
            .query(&[
                ("name", city.trim()),
                ("count", count),
                ("language", "en"),
                ("format", "json"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let zone = timezone_from_response(city, country, response)?;
        tracing::debug!("Resolved city '{}' ({:?}) to timezone {}", city, country, zone);
        self.zones.write().await.insert(key, zone);
        Ok(zone)
    }
}

#[async_trait]
impl TimeResolver for OpenMeteoTimeResolver {
    async fn resolve_local_time(&self, city: &str) -> Result<LocalTime, ReminderError> {
        let zone = self.resolve_timezone(city, None).await?;
        Ok(LocalTime::new(zone.from_utc_datetime(&Utc::now().naive_utc())))
    }

    async fn resolve_local_time_in(&self, city: &str, country: &str) -> Result<LocalTime, ReminderError> {
        let zone = self.resolve_timezone(city, Some(country)).await?;
        Ok(LocalTime::new(zone.from_utc_datetime(&Utc::now().naive_utc())))
    }
}

fn timezone_from_response(
    city: &str,
    country: Option<&str>,
    response: GeocodingResponse,
) -> Result<Tz, ReminderError> {
    let mut places = response.results.unwrap_or_default();
    let position = country
        .and_then(|country| places.iter().position(|place| place.is_in(country)))
        .unwrap_or(0);
    if position >= places.len() {
        return Err(ReminderError::GeocodeNotFound(city.to_string()));
    }
    let place = places.swap_remove(position);

    place
        .timezone
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
        .ok_or_else(|| ReminderError::TimezoneUnresolved {
            city: city.to_string(),
        })
}
