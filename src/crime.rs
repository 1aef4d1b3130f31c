use std::{
    sync::{Arc, LazyLock},
    time::Instant,
};

use compact_str::CompactString;
use quick_cache::sync::Cache;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    Timed,
    config::CONFIG,
    error::RouteError,
    model::{BoundingBox, CrimeIncident, Point},
};

static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::ClientBuilder::new()
        .user_agent("safewalk/0.1 (pedestrian safety routing)")
        .build()
        .expect("reqwest client")
});

static CRIME_CACHE: LazyLock<Cache<[i32; 4], Timed<Arc<[CrimeIncident]>>>> =
    LazyLock::new(|| Cache::new(100));

#[derive(Debug, Deserialize)]
struct ApiCrime {
    lat: f64,
    lng: f64,
    category: String,
    #[serde(default)]
    timestamp: String,
}

/// Recent incidents inside the bbox, cached for a day: crime data refreshes
/// on the provider side far slower than feature data.
pub async fn get_crimes(bbox: &BoundingBox) -> Result<Arc<[CrimeIncident]>, RouteError> {
    let key = bbox.cache_key();
    if let Some(entry) = CRIME_CACHE.get(&key) {
        if entry.fresh(CONFIG.crime_cache_ttl) {
            debug!("crime cache hit for {bbox}");
            return Ok(entry.value);
        }
        CRIME_CACHE.remove(&key);
    }

    let start = Instant::now();
    let mut last_err = None;
    for attempt in 0..2 {
        match fetch(bbox).await {
            Ok(crimes) => {
                info!(
                    "crime query returned {} incidents in {:?} (attempt {attempt})",
                    crimes.len(),
                    start.elapsed()
                );
                let crimes: Arc<[CrimeIncident]> = crimes.into();
                CRIME_CACHE.insert(key, Timed::new(crimes.clone()));
                return Ok(crimes);
            }
            Err(err) => {
                warn!("crime query failed (attempt {attempt}): {err:?}");
                last_err = Some(err);
            }
        }
    }

    Err(last_err.unwrap_or(RouteError::UpstreamUnavailable))
}

async fn fetch(bbox: &BoundingBox) -> Result<Vec<CrimeIncident>, RouteError> {
    // the provider takes the query area as a polygon; send the bbox corners
    let poly = format!(
        "{:.5},{:.5}:{:.5},{:.5}:{:.5},{:.5}:{:.5},{:.5}",
        bbox.south, bbox.west, bbox.south, bbox.east, bbox.north, bbox.east, bbox.north, bbox.west
    );

    let res = CLIENT
        .get(&CONFIG.crime_api_url)
        .query(&[("poly", poly.as_str())])
        .timeout(CONFIG.crime_timeout)
        .send()
        .await
        .map_err(classify_reqwest)?;

    if !res.status().is_success() {
        warn!("crime provider returned {}", res.status());
        return Err(RouteError::UpstreamUnavailable);
    }

    let mut bytes = res.bytes().await.map_err(classify_reqwest)?.to_vec();
    let raw: Vec<ApiCrime> = simd_json::from_slice(&mut bytes).map_err(|err| {
        warn!("failed to parse crime payload: {err}");
        RouteError::UpstreamUnavailable
    })?;

    Ok(raw
        .into_iter()
        .filter(|c| Point::new(c.lat, c.lng).is_valid())
        .map(|c| CrimeIncident {
            loc: Point::new(c.lat, c.lng),
            category: CompactString::from(c.category),
            timestamp: CompactString::from(c.timestamp),
        })
        .collect())
}

fn classify_reqwest(err: reqwest::Error) -> RouteError {
    if err.is_timeout() {
        RouteError::UpstreamTimeout
    } else {
        RouteError::UpstreamUnavailable
    }
}

/// Severity weight for the density kernel: violent over property over
/// nuisance. Buckets (not exact category strings) are configured.
pub fn severity(category: &str) -> f64 {
    let c = category.to_ascii_lowercase();
    if ["violen", "robbery", "assault", "weapon", "sexual"]
        .iter()
        .any(|k| c.contains(k))
    {
        CONFIG.severity_violent
    } else if ["burglary", "theft", "vehicle", "shoplifting", "arson", "damage"]
        .iter()
        .any(|k| c.contains(k))
    {
        CONFIG.severity_property
    } else {
        // anti-social behaviour, drugs, public order, other
        CONFIG.severity_nuisance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(severity("violent-crime") > severity("bicycle-theft"));
        assert!(severity("bicycle-theft") > severity("anti-social-behaviour"));
        assert!(severity("robbery") >= severity("burglary"));
        // unrecognized categories fall into the nuisance bucket
        assert_eq!(severity("other-crime"), severity("drugs"));
    }

    #[test]
    fn test_parse_crime_payload() {
        let mut payload = br#"[
            {"lat": 51.5001, "lng": -0.1002, "category": "burglary", "timestamp": "2026-06"},
            {"lat": 1000.0, "lng": 0.0, "category": "broken", "timestamp": "2026-06"},
            {"lat": 51.5003, "lng": -0.1004, "category": "violent-crime"}
        ]"#
        .to_vec();

        let raw: Vec<ApiCrime> = simd_json::from_slice(&mut payload).unwrap();
        let incidents = raw
            .into_iter()
            .filter(|c| Point::new(c.lat, c.lng).is_valid())
            .collect::<Vec<_>>();

        // the out-of-range row is dropped
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].category, "burglary");
        assert_eq!(incidents[1].timestamp, "");
    }
}
