pub mod api;

use std::sync::{Arc, LazyLock};

use compact_str::CompactString;
use quick_cache::sync::Cache;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{
    Timed,
    config::CONFIG,
    error::RouteError,
    model::{
        BoundingBox, FeatureSet, HighwayClass, Place, Point, RoadWay, SurfaceType, TransitStop,
    },
};
use api::{ElementKind, RawElement};

static FEATURE_CACHE: LazyLock<Cache<[i32; 4], Timed<Arc<FeatureSet>>>> =
    LazyLock::new(|| Cache::new(50));

/// Read-through cached feature lookup, keyed by the quantized bbox.
pub async fn get_features(bbox: &BoundingBox) -> Result<Arc<FeatureSet>, RouteError> {
    let key = bbox.cache_key();
    if let Some(entry) = FEATURE_CACHE.get(&key) {
        if entry.fresh(CONFIG.feature_cache_ttl) {
            debug!("feature cache hit for {bbox}");
            return Ok(entry.value);
        }
        FEATURE_CACHE.remove(&key);
    }

    let elements = api::fetch_features(bbox).await?;
    let features = Arc::new(classify(&elements));
    info!(
        "classified {bbox}: {} roads, {} lights, {} cctv, {} places, {} transit",
        features.roads.len(),
        features.lights.len(),
        features.cctv.len(),
        features.places.len(),
        features.transit.len(),
    );

    FEATURE_CACHE.insert(key, Timed::new(features.clone()));
    Ok(features)
}

/// Splits raw elements into the five typed sets. Two passes: node coordinates
/// and tagged point features first, then way geometries resolved against the
/// node table.
pub fn classify(elements: &[RawElement]) -> FeatureSet {
    let mut coords = FxHashMap::default();
    let mut features = FeatureSet::default();

    for element in elements {
        if element.kind != ElementKind::Node {
            continue;
        }
        let (Some(lat), Some(lon)) = (element.lat, element.lon) else {
            continue;
        };
        let loc = Point::new(lat, lon);
        coords.insert(element.id, loc);

        if element.tags.is_empty() {
            continue;
        }
        classify_node(loc, &element.tags, &mut features);
    }

    for element in elements {
        if element.kind != ElementKind::Way {
            continue;
        }
        let Some(highway) = element
            .tags
            .get("highway")
            .and_then(|v| HighwayClass::from_tag(v))
        else {
            continue;
        };

        let geometry = element
            .nodes
            .iter()
            .filter_map(|id| coords.get(id).copied())
            .collect::<Vec<_>>();
        if geometry.len() < 2 {
            continue;
        }

        let lit = element.tags.get("lit").is_some_and(|v| v == "yes");
        if lit {
            // lit ways contribute their endpoints as light sources
            features.lights.push(geometry[0]);
            features.lights.push(geometry[geometry.len() - 1]);
        }

        features.roads.push(RoadWay {
            geometry,
            highway,
            name: element.tags.get("name").map(CompactString::from),
            has_sidewalk: element
                .tags
                .get("sidewalk")
                .is_some_and(|v| v != "no" && v != "none"),
            surface: element
                .tags
                .get("surface")
                .map(|v| SurfaceType::from_tag(v))
                .unwrap_or_default(),
            lit,
        });
    }

    features
}

fn classify_node(loc: Point, tags: &FxHashMap<String, String>, features: &mut FeatureSet) {
    let highway = tags.get("highway").map(String::as_str);

    if highway == Some("street_lamp") {
        features.lights.push(loc);
        return;
    }

    if tags.get("man_made").is_some_and(|v| v == "surveillance") {
        features.cctv.push(loc);
        return;
    }

    let is_transit = highway == Some("bus_stop")
        || tags
            .get("public_transport")
            .is_some_and(|v| v == "stop_position" || v == "platform");
    if is_transit {
        features.transit.push(TransitStop {
            loc,
            name: tags.get("name").map(CompactString::from),
        });
        return;
    }

    for key in ["amenity", "shop", "leisure", "tourism"] {
        if let Some(value) = tags.get(key) {
            features.places.push(Place {
                loc,
                name: tags.get("name").map(CompactString::from),
                category: CompactString::from(value.as_str()),
            });
            return;
        }
    }
}
