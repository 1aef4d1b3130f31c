use std::{fmt::Write, sync::LazyLock, time::Instant};

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::{config::CONFIG, error::RouteError, model::BoundingBox};

static CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::ClientBuilder::new()
        .user_agent("safewalk/0.1 (pedestrian safety routing)")
        .build()
        .expect("reqwest client")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Node,
    Way,
    Relation,
}

/// One raw upstream element; either a node with coordinates or a way with an
/// ordered node-id list. Tag bags are consumed during classification and not
/// propagated further.
#[derive(Debug, Clone, Deserialize)]
pub struct RawElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub id: i64,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub nodes: Vec<i64>,
    #[serde(default)]
    pub tags: FxHashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    elements: Vec<RawElement>,
}

/// One combined query covering all five element families the scorer needs.
pub fn build_query(bbox: &BoundingBox) -> String {
    let mut q = String::with_capacity(1024);
    let timeout = CONFIG.feature_timeout.as_secs();
    let _ = write!(
        q,
        "[out:json][timeout:{timeout}][bbox:{:.6},{:.6},{:.6},{:.6}];(",
        bbox.south, bbox.west, bbox.north, bbox.east
    );
    q.push_str(
        "way[highway~\"^(trunk|primary|secondary|tertiary|unclassified|residential|\
         living_street|pedestrian|footway|cycleway|path|steps|service|track)$\"];",
    );
    q.push_str("node[highway=street_lamp];");
    q.push_str("node[man_made=surveillance];");
    q.push_str("node[amenity];");
    q.push_str("node[shop];");
    q.push_str("node[leisure];");
    q.push_str("node[tourism];");
    q.push_str("node[public_transport~\"^(stop_position|platform)$\"];");
    q.push_str("node[highway=bus_stop];");
    q.push_str(");out body;>;out skel qt;");
    q
}

/// Fetches the combined element set, rotating through the configured mirror
/// list on timeout, 429, and 5xx. Only after every mirror has failed does the
/// stage surface an error; a timeout anywhere is reported as a timeout.
pub async fn fetch_features(bbox: &BoundingBox) -> Result<Vec<RawElement>, RouteError> {
    let query = build_query(bbox);
    let mut saw_timeout = false;

    for server in &CONFIG.servers {
        let start = Instant::now();
        match fetch_from(server, &query).await {
            Ok(elements) => {
                debug!(
                    "feature query against {server} returned {} elements in {:?}",
                    elements.len(),
                    start.elapsed()
                );
                return Ok(elements);
            }
            Err(FetchError::Timeout) => {
                warn!("feature query against {server} timed out, rotating");
                saw_timeout = true;
            }
            Err(FetchError::Status(status)) => {
                warn!("feature query against {server} returned {status}, rotating");
            }
            Err(FetchError::Transport(err)) => {
                warn!("feature query against {server} failed: {err}, rotating");
            }
            Err(FetchError::BadPayload) => {
                warn!("feature query against {server} returned an unparseable payload, rotating");
            }
        }
    }

    error!("all {} feature mirrors failed", CONFIG.servers.len());
    if saw_timeout {
        Err(RouteError::UpstreamTimeout)
    } else {
        Err(RouteError::UpstreamUnavailable)
    }
}

enum FetchError {
    Timeout,
    Status(http::StatusCode),
    Transport(reqwest::Error),
    BadPayload,
}

async fn fetch_from(server: &str, query: &str) -> Result<Vec<RawElement>, FetchError> {
    let res = CLIENT
        .post(server)
        .timeout(CONFIG.feature_timeout)
        .body(format!("data={}", urlencode(query)))
        .header("content-type", "application/x-www-form-urlencoded")
        .send()
        .await
        .map_err(classify_reqwest)?;

    let status = res.status();
    if status.as_u16() == 429 || status.is_server_error() {
        return Err(FetchError::Status(status));
    }
    if !status.is_success() {
        return Err(FetchError::Status(status));
    }

    let mut bytes = res.bytes().await.map_err(classify_reqwest)?.to_vec();
    let parsed: QueryResponse = simd_json::from_slice(&mut bytes).map_err(|err| {
        error!("failed to parse feature payload: {err}");
        FetchError::BadPayload
    })?;

    Ok(parsed.elements)
}

fn classify_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Transport(err)
    }
}

/// Minimal percent-encoding for the query body; everything non-alphanumeric
/// outside the small safe set is escaped.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3 / 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_covers_all_element_families() {
        let bbox = BoundingBox {
            south: 51.5,
            west: -0.12,
            north: 51.51,
            east: -0.1,
        };
        let q = build_query(&bbox);
        assert!(q.contains("[bbox:51.5"));
        assert!(q.contains("way[highway~"));
        assert!(q.contains("street_lamp"));
        assert!(q.contains("man_made=surveillance"));
        assert!(q.contains("amenity"));
        assert!(q.contains("stop_position|platform"));
        assert!(q.contains("bus_stop"));
        assert!(q.ends_with("out body;>;out skel qt;"));
    }

    #[test]
    fn test_parse_raw_elements() {
        let mut payload = br#"{
            "elements": [
                {"type": "node", "id": 1, "lat": 51.5, "lon": -0.1,
                 "tags": {"highway": "street_lamp"}},
                {"type": "way", "id": 2, "nodes": [1, 3],
                 "tags": {"highway": "residential", "name": "Long Lane"}},
                {"type": "node", "id": 3, "lat": 51.501, "lon": -0.101}
            ]
        }"#
        .to_vec();

        let parsed: QueryResponse = simd_json::from_slice(&mut payload).unwrap();
        assert_eq!(parsed.elements.len(), 3);

        let lamp = &parsed.elements[0];
        assert_eq!(lamp.kind, ElementKind::Node);
        assert_eq!(lamp.lat, Some(51.5));
        assert_eq!(lamp.tags.get("highway").map(String::as_str), Some("street_lamp"));

        let way = &parsed.elements[1];
        assert_eq!(way.kind, ElementKind::Way);
        assert_eq!(way.nodes, vec![1, 3]);

        let bare = &parsed.elements[2];
        assert!(bare.tags.is_empty());
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("abc-123"), "abc-123");
        assert_eq!(urlencode("a b"), "a%20b");
        assert_eq!(urlencode("[x=y]"), "%5Bx%3Dy%5D");
    }
}
