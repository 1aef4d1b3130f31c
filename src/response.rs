use std::hash::BuildHasherDefault;

use indexmap::IndexSet;
use rustc_hash::FxHasher;
use serde::Serialize;

use crate::{
    graph::{Graph, Route, scoring},
    math::{self, polyline},
    model::{CrimeIncident, FeatureSet, Point},
};

/// Reporting speed for leg durations.
const WALKING_SPEED_M_S: f64 = 1.35;

type FxIndexSet<T> = IndexSet<T, BuildHasherDefault<FxHasher>>;

#[derive(Debug, Clone, Serialize)]
pub struct RouteResponse {
    pub status: &'static str,
    pub routes: Vec<RouteJson>,
    pub meta: Meta,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteJson {
    #[serde(rename = "routeIndex")]
    pub route_index: usize,
    #[serde(rename = "isSafest")]
    pub is_safest: bool,
    pub overview_polyline: Polyline,
    pub legs: Vec<Leg>,
    pub summary: String,
    pub safety: Safety,
    pub segments: Vec<Segment>,
    #[serde(rename = "routeStats")]
    pub route_stats: RouteStats,
    #[serde(rename = "routePOIs")]
    pub route_pois: RoutePois,
}

#[derive(Debug, Clone, Serialize)]
pub struct Polyline {
    pub points: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Leg {
    pub distance: TextValue,
    pub duration: TextValue,
    pub start_location: Point,
    pub end_location: Point,
    pub steps: Vec<Step>,
}

/// Turn-by-turn steps are out of scope; the array is always empty.
#[derive(Debug, Clone, Serialize)]
pub struct Step {}

#[derive(Debug, Clone, Serialize)]
pub struct TextValue {
    pub text: String,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Safety {
    pub score: f64,
    pub label: &'static str,
    pub color: &'static str,
    pub breakdown: Breakdown,
    #[serde(rename = "roadTypes")]
    pub road_types: Vec<RoadTypeShare>,
    #[serde(rename = "mainRoadRatio")]
    pub main_road_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Breakdown {
    #[serde(rename = "roadType")]
    pub road_type: f64,
    pub lighting: f64,
    pub crime: f64,
    pub cctv: f64,
    #[serde(rename = "openPlaces")]
    pub open_places: f64,
    pub traffic: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoadTypeShare {
    pub highway: &'static str,
    pub percent: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
    #[serde(rename = "safetyScore")]
    pub safety_score: f64,
    pub color: &'static str,
    pub highway: &'static str,
    #[serde(rename = "roadName", skip_serializing_if = "Option::is_none")]
    pub road_name: Option<String>,
    #[serde(rename = "isDeadEnd")]
    pub is_dead_end: bool,
    #[serde(rename = "hasSidewalk")]
    pub has_sidewalk: bool,
    #[serde(rename = "surfaceType")]
    pub surface_type: &'static str,
    #[serde(rename = "lightScore")]
    pub light_score: f64,
    #[serde(rename = "crimeScore")]
    pub crime_score: f64,
    #[serde(rename = "cctvScore")]
    pub cctv_score: f64,
    #[serde(rename = "placeScore")]
    pub place_score: f64,
    #[serde(rename = "trafficScore")]
    pub traffic_score: f64,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    #[serde(rename = "deadEnds")]
    pub dead_ends: u32,
    #[serde(rename = "sidewalkPct")]
    pub sidewalk_pct: f64,
    #[serde(rename = "unpavedPct")]
    pub unpaved_pct: f64,
    #[serde(rename = "transitStopsNearby")]
    pub transit_stops_nearby: u32,
    #[serde(rename = "cctvCamerasNearby")]
    pub cctv_cameras_nearby: u32,
    #[serde(rename = "roadNameChanges")]
    pub road_name_changes: Vec<NameChangeJson>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NameChangeJson {
    #[serde(rename = "segmentIndex")]
    pub segment_index: usize,
    pub name: String,
    #[serde(rename = "cumulativeMeters")]
    pub cumulative_meters: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutePois {
    pub cctv: Vec<Point>,
    pub transit: Vec<NamedPoi>,
    #[serde(rename = "deadEnds")]
    pub dead_ends: Vec<Point>,
    pub lights: Vec<Point>,
    pub places: Vec<PlacePoi>,
    pub crimes: Vec<CrimePoi>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedPoi {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacePoi {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrimePoi {
    pub lat: f64,
    pub lng: f64,
    pub category: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    #[serde(rename = "straightLineDistanceKm")]
    pub straight_line_distance_km: f64,
    #[serde(rename = "maxDistanceKm")]
    pub max_distance_km: f64,
    #[serde(rename = "routeCount")]
    pub route_count: usize,
    #[serde(rename = "dataQuality")]
    pub data_quality: DataQuality,
    pub timing: Timing,
    #[serde(rename = "computeTimeMs")]
    pub compute_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataQuality {
    pub roads: usize,
    pub lights: usize,
    pub cctv: usize,
    pub places: usize,
    pub transit: usize,
    pub crimes: usize,
    pub label: &'static str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Timing {
    #[serde(rename = "featuresMs")]
    pub features_ms: u64,
    #[serde(rename = "crimesMs")]
    pub crimes_ms: u64,
    #[serde(rename = "graphMs")]
    pub graph_ms: u64,
    #[serde(rename = "pathfindMs")]
    pub pathfind_ms: u64,
    #[serde(rename = "scoringMs")]
    pub scoring_ms: u64,
}

pub struct ResponseInputs<'a> {
    pub origin: Point,
    pub destination: Point,
    pub graph: &'a Graph,
    pub features: &'a FeatureSet,
    pub crimes: &'a [CrimeIncident],
    pub routes: Vec<Route>,
    pub max_distance_km: f64,
    pub timing: Timing,
    pub compute_time_ms: u64,
}

/// Assembles the full response. Routes come out ordered by overall safety
/// score, best first; the ordering is stable so equal scores keep their
/// search order.
pub fn build(mut inputs: ResponseInputs) -> RouteResponse {
    let mut scored = std::mem::take(&mut inputs.routes)
        .into_iter()
        .map(|route| {
            let aggregate = scoring::aggregate(inputs.graph, &route);
            (route, aggregate)
        })
        .collect::<Vec<_>>();
    scored.sort_by(|(_, a), (_, b)| b.overall.total_cmp(&a.overall));

    let routes = scored
        .into_iter()
        .enumerate()
        .map(|(i, (route, aggregate))| build_route(&inputs, &route, aggregate, i))
        .collect::<Vec<_>>();

    let straight = math::haversine(inputs.origin, inputs.destination);

    RouteResponse {
        status: "OK",
        meta: Meta {
            straight_line_distance_km: round2(straight / 1000.),
            max_distance_km: inputs.max_distance_km,
            route_count: routes.len(),
            data_quality: data_quality(inputs.features, inputs.crimes, straight),
            timing: inputs.timing,
            compute_time_ms: inputs.compute_time_ms,
        },
        routes,
    }
}

fn build_route(
    inputs: &ResponseInputs,
    route: &Route,
    aggregate: scoring::RouteAggregate,
    route_index: usize,
) -> RouteJson {
    let graph = inputs.graph;
    let points = route
        .nodes
        .iter()
        .map(|&n| graph.nodes[n as usize])
        .collect::<Vec<_>>();

    let segments = route
        .edges
        .iter()
        .enumerate()
        .map(|(i, &edge_id)| {
            let edge = &graph.edges[edge_id as usize];
            Segment {
                start: points[i],
                end: points[i + 1],
                safety_score: round2(edge.safety as f64),
                color: scoring::segment_color(edge.safety),
                highway: edge.highway.as_str(),
                road_name: edge.road_name.as_ref().map(|n| n.to_string()),
                is_dead_end: edge.is_dead_end,
                has_sidewalk: edge.has_sidewalk,
                surface_type: edge.surface.as_str(),
                light_score: round2(edge.factors.light as f64),
                crime_score: round2(edge.factors.crime as f64),
                cctv_score: round2(edge.factors.cctv as f64),
                place_score: round2(edge.factors.place as f64),
                traffic_score: round2(edge.factors.traffic as f64),
                distance: round1(edge.distance as f64),
            }
        })
        .collect::<Vec<_>>();

    let distance_m = route.total_distance;
    let duration_s = (distance_m / WALKING_SPEED_M_S).round() as u64;

    let leg = Leg {
        distance: TextValue {
            text: distance_text(distance_m),
            value: distance_m.round() as u64,
        },
        duration: TextValue {
            text: duration_text(duration_s),
            value: duration_s,
        },
        start_location: *points.first().unwrap_or(&inputs.origin),
        end_location: *points.last().unwrap_or(&inputs.destination),
        steps: Vec::new(),
    };

    RouteJson {
        route_index,
        is_safest: route_index == 0,
        overview_polyline: Polyline {
            points: polyline::encode(&points),
        },
        legs: vec![leg],
        summary: summary(graph, route),
        safety: Safety {
            score: round1(aggregate.overall),
            label: aggregate.label,
            color: aggregate.color,
            breakdown: Breakdown {
                road_type: round1(aggregate.breakdown.road_type),
                lighting: round1(aggregate.breakdown.light),
                crime: round1(aggregate.breakdown.crime),
                cctv: round1(aggregate.breakdown.cctv),
                open_places: round1(aggregate.breakdown.place),
                traffic: round1(aggregate.breakdown.traffic),
            },
            road_types: aggregate
                .road_types
                .iter()
                .map(|&(highway, percent)| RoadTypeShare { highway, percent })
                .collect(),
            main_road_ratio: round2(aggregate.main_road_ratio),
        },
        segments,
        route_stats: RouteStats {
            dead_ends: aggregate.dead_ends,
            sidewalk_pct: round1(aggregate.sidewalk_pct),
            unpaved_pct: round1(aggregate.unpaved_pct),
            transit_stops_nearby: aggregate.transit_stops,
            cctv_cameras_nearby: aggregate.cctv_cameras,
            road_name_changes: aggregate
                .name_changes
                .into_iter()
                .map(|change| NameChangeJson {
                    segment_index: change.segment_index,
                    name: change.name.to_string(),
                    cumulative_meters: round1(change.cumulative_m),
                })
                .collect(),
        },
        route_pois: collect_pois(graph, inputs, route),
    }
}

/// The most-walked road name, Google-style.
fn summary(graph: &Graph, route: &Route) -> String {
    let mut name_lengths: Vec<(&str, f64)> = Vec::new();
    for &edge_id in &route.edges {
        let edge = &graph.edges[edge_id as usize];
        let Some(name) = &edge.road_name else {
            continue;
        };
        match name_lengths.iter_mut().find(|(n, _)| *n == name.as_str()) {
            Some((_, len)) => *len += edge.distance as f64,
            None => name_lengths.push((name.as_str(), edge.distance as f64)),
        }
    }

    name_lengths
        .iter()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| "Walking route".to_string())
}

/// Sweeps the route corridor (±20m on main roads, ±30m on narrow paths,
/// sampled at every path node) and collects nearby features. Insertion-ordered
/// sets keep the output deterministic.
fn collect_pois(graph: &Graph, inputs: &ResponseInputs, route: &Route) -> RoutePois {
    let mut cctv: FxIndexSet<u32> = FxIndexSet::default();
    let mut transit: FxIndexSet<u32> = FxIndexSet::default();
    let mut dead_ends: FxIndexSet<u32> = FxIndexSet::default();
    let mut lights: FxIndexSet<u32> = FxIndexSet::default();
    let mut places: FxIndexSet<u32> = FxIndexSet::default();
    let mut crimes: FxIndexSet<u32> = FxIndexSet::default();

    for (i, &edge_id) in route.edges.iter().enumerate() {
        let edge = &graph.edges[edge_id as usize];
        let radius = edge.highway.poi_corridor_m();

        for &node in &[route.nodes[i], route.nodes[i + 1]] {
            let sample = graph.nodes[node as usize];

            graph
                .grids
                .cctv
                .for_each_within(sample, radius, |_, &idx, _| {
                    cctv.insert(idx);
                });
            graph
                .grids
                .transit
                .for_each_within(sample, radius, |_, &idx, _| {
                    transit.insert(idx);
                });
            graph
                .grids
                .lights
                .for_each_within(sample, radius, |_, &idx, _| {
                    lights.insert(idx);
                });
            graph
                .grids
                .places
                .for_each_within(sample, radius, |_, &idx, _| {
                    places.insert(idx);
                });
            graph
                .grids
                .crimes
                .for_each_within(sample, radius, |_, &idx, _| {
                    crimes.insert(idx);
                });
            graph
                .node_grid
                .for_each_within(sample, radius, |_, &idx, _| {
                    if graph.degree(idx) == 1 {
                        dead_ends.insert(idx);
                    }
                });
        }
    }

    RoutePois {
        cctv: cctv
            .into_iter()
            .map(|i| inputs.features.cctv[i as usize])
            .collect(),
        transit: transit
            .into_iter()
            .map(|i| {
                let stop = &inputs.features.transit[i as usize];
                NamedPoi {
                    lat: stop.loc.lat,
                    lng: stop.loc.lng,
                    name: stop.name.as_ref().map(|n| n.to_string()),
                }
            })
            .collect(),
        dead_ends: dead_ends
            .into_iter()
            .map(|i| graph.nodes[i as usize])
            .collect(),
        lights: lights
            .into_iter()
            .map(|i| inputs.features.lights[i as usize])
            .collect(),
        places: places
            .into_iter()
            .map(|i| {
                let place = &inputs.features.places[i as usize];
                PlacePoi {
                    lat: place.loc.lat,
                    lng: place.loc.lng,
                    name: place.name.as_ref().map(|n| n.to_string()),
                    category: place.category.to_string(),
                }
            })
            .collect(),
        crimes: crimes
            .into_iter()
            .map(|i| {
                let incident = &inputs.crimes[i as usize];
                CrimePoi {
                    lat: incident.loc.lat,
                    lng: incident.loc.lng,
                    category: incident.category.to_string(),
                }
            })
            .collect(),
    }
}

fn data_quality(features: &FeatureSet, crimes: &[CrimeIncident], straight_m: f64) -> DataQuality {
    // feature density per km over the request span
    let span_km = (straight_m / 1000.).max(0.25);
    let density = features.element_count() as f64 / (span_km * span_km);
    let label = if density >= 1500. {
        "good"
    } else if density >= 400. {
        "fair"
    } else {
        "sparse"
    };

    DataQuality {
        roads: features.roads.len(),
        lights: features.lights.len(),
        cctv: features.cctv.len(),
        places: features.places.len(),
        transit: features.transit.len(),
        crimes: crimes.len(),
        label,
    }
}

fn distance_text(meters: f64) -> String {
    if meters < 1000. {
        format!("{} m", meters.round() as u64)
    } else {
        format!("{:.1} km", meters / 1000.)
    }
}

fn duration_text(secs: u64) -> String {
    let mins = (secs as f64 / 60.).round() as u64;
    if mins <= 1 {
        "1 min".to_string()
    } else if mins < 60 {
        format!("{mins} mins")
    } else if mins / 60 == 1 {
        format!("1 hour {} mins", mins % 60)
    } else {
        format!("{} hours {} mins", mins / 60, mins % 60)
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.).round() / 10.
}

fn round2(v: f64) -> f64 {
    (v * 100.).round() / 100.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        astar::{self, SearchParams},
        error::Endpoint,
        graph::fixtures::{bbox, build_params, parallel_streets},
        model::TransitStop,
    };

    fn fixture_response() -> RouteResponse {
        let mut features = parallel_streets();
        features.lights.push(Point::new(51.5028, -0.1000));
        features.transit.push(TransitStop {
            loc: Point::new(51.5014, -0.1001),
            name: Some("East Street Stop".into()),
        });

        let graph = crate::graph::Graph::build(&features, &[], &bbox(), &build_params()).unwrap();

        let origin = Point::new(51.5000, -0.1020);
        let destination = Point::new(51.5056, -0.1000);
        let src = astar::nearest_node(&graph, origin, Endpoint::Origin).unwrap();
        let dst = astar::nearest_node(&graph, destination, Endpoint::Destination).unwrap();
        let routes = astar::k_diverse(
            &graph,
            src,
            dst,
            &SearchParams {
                k: 3,
                gamma: 0.6,
                alpha: 1.0,
            },
        )
        .unwrap();

        build(ResponseInputs {
            origin,
            destination,
            graph: &graph,
            features: &features,
            crimes: &[],
            routes,
            max_distance_km: 10.,
            timing: Timing::default(),
            compute_time_ms: 12,
        })
    }

    #[test]
    fn test_response_shape() {
        let response = fixture_response();
        assert_eq!(response.status, "OK");
        assert_eq!(response.routes.len(), 3);
        assert_eq!(response.meta.route_count, 3);

        // safest first, indices sequential
        assert!(response.routes[0].is_safest);
        assert!(!response.routes[1].is_safest);
        for (i, route) in response.routes.iter().enumerate() {
            assert_eq!(route.route_index, i);
        }
        for pair in response.routes.windows(2) {
            assert!(pair[0].safety.score >= pair[1].safety.score);
        }
    }

    #[test]
    fn test_scores_and_percentages_bounded() {
        let response = fixture_response();
        for route in &response.routes {
            let s = &route.safety;
            assert!((0. ..=100.).contains(&s.score));
            for v in [
                s.breakdown.road_type,
                s.breakdown.lighting,
                s.breakdown.crime,
                s.breakdown.cctv,
                s.breakdown.open_places,
                s.breakdown.traffic,
            ] {
                assert!((0. ..=100.).contains(&v), "breakdown value {v} out of range");
            }

            let pct_sum: u32 = s.road_types.iter().map(|r| r.percent).sum();
            assert!((99..=101).contains(&pct_sum), "roadTypes sum {pct_sum}");

            assert!((0. ..=1.).contains(&s.main_road_ratio));
        }
    }

    #[test]
    fn test_segments_match_palette_and_geometry() {
        let palette = ["#4CAF50", "#8BC34A", "#FFC107", "#FF9800", "#F44336"];
        let response = fixture_response();
        for route in &response.routes {
            assert!(!route.segments.is_empty());
            for segment in &route.segments {
                assert!(palette.contains(&segment.color));
                assert!((0. ..=1.).contains(&segment.safety_score));
                assert!(segment.distance > 0.);
            }

            // contiguous: each segment starts where the previous ended
            for pair in route.segments.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }

            // polyline decodes back to the segment chain
            let decoded = polyline::decode(&route.overview_polyline.points);
            assert_eq!(decoded.len(), route.segments.len() + 1);
        }
    }

    #[test]
    fn test_leg_distance_and_duration() {
        let response = fixture_response();
        let leg = &response.routes[0].legs[0];
        // the fixture routes are ~760m
        assert!(leg.distance.value > 600 && leg.distance.value < 1000);
        // 1.35 m/s walking speed
        let expected = (leg.distance.value as f64 / 1.35).round() as u64;
        assert!(leg.duration.value.abs_diff(expected) <= 1);
        assert!(leg.duration.text.contains("min"));
        assert!(response.routes[0].legs[0].steps.is_empty());
    }

    #[test]
    fn test_pois_and_name_changes() {
        let response = fixture_response();

        // some route passes the lamp on East Street and the transit stop
        let any_lights = response.routes.iter().any(|r| !r.route_pois.lights.is_empty());
        let any_transit = response
            .routes
            .iter()
            .any(|r| !r.route_pois.transit.is_empty());
        assert!(any_lights);
        assert!(any_transit);

        // named streets produce name-change markers
        let east_route = &response.routes[0];
        assert!(!east_route.route_stats.road_name_changes.is_empty());
        let first = &east_route.route_stats.road_name_changes[0];
        assert!(first.cumulative_meters >= 0.);
        assert!(!first.name.is_empty());
    }

    #[test]
    fn test_json_field_names() {
        let response = fixture_response();
        let json = simd_json::to_string(&response).unwrap();
        for key in [
            "\"status\":\"OK\"",
            "\"routeIndex\"",
            "\"isSafest\"",
            "\"overview_polyline\"",
            "\"points\"",
            "\"legs\"",
            "\"start_location\"",
            "\"roadTypes\"",
            "\"mainRoadRatio\"",
            "\"openPlaces\"",
            "\"safetyScore\"",
            "\"routeStats\"",
            "\"deadEnds\"",
            "\"transitStopsNearby\"",
            "\"routePOIs\"",
            "\"straightLineDistanceKm\"",
            "\"computeTimeMs\"",
        ] {
            assert!(json.contains(key), "missing {key} in response json");
        }
    }

    #[test]
    fn test_text_formatting() {
        assert_eq!(distance_text(640.), "640 m");
        assert_eq!(distance_text(1240.), "1.2 km");
        assert_eq!(duration_text(30), "1 min");
        assert_eq!(duration_text(480), "8 mins");
        assert_eq!(duration_text(4200), "1 hour 10 mins");
        assert_eq!(duration_text(7800), "2 hours 10 mins");
    }
}
