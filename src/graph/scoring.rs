use compact_str::CompactString;

use crate::{
    config::Weights,
    model::{HighwayClass, Point, SurfaceType},
};

use super::{Factors, Graph, Route, coverage::CoverageMap};

pub const CCTV_RADIUS_M: f64 = 40.;
pub const PLACE_RADIUS_M: f64 = 60.;
pub const TRANSIT_RADIUS_M: f64 = 60.;

// saturation constants for mapping raw raster values into [0,1]
const LIGHT_K: f64 = 0.7;
const CRIME_K: f64 = 0.35;

// nearby-count saturation targets
const CCTV_SATURATION: f64 = 3.;
const PLACE_SATURATION: f64 = 5.;
const TRANSIT_SATURATION: f64 = 2.;

const DEAD_END_PENALTY: f64 = 0.20;
const UNPAVED_PENALTY: f64 = 0.15;
const SIDEWALK_BONUS: f64 = 0.15;

/// Base desirability per road class. Main roads score higher (lit, populated),
/// footpaths lower, steps and service alleys lower still.
pub const fn road_type_base(class: HighwayClass) -> f64 {
    match class {
        HighwayClass::Primary => 0.85,
        HighwayClass::Secondary => 0.80,
        HighwayClass::Tertiary => 0.75,
        HighwayClass::Pedestrian => 0.75,
        HighwayClass::Trunk => 0.70,
        HighwayClass::LivingStreet => 0.70,
        HighwayClass::Residential => 0.65,
        HighwayClass::Unclassified => 0.60,
        HighwayClass::Cycleway => 0.55,
        HighwayClass::Footway => 0.50,
        HighwayClass::Path => 0.40,
        HighwayClass::Service => 0.35,
        HighwayClass::Steps => 0.30,
        HighwayClass::Track => 0.30,
    }
}

/// How much through-traffic a class sees, for the traffic factor.
const fn road_traffic_term(class: HighwayClass) -> f64 {
    match class {
        HighwayClass::Trunk | HighwayClass::Primary => 1.0,
        HighwayClass::Secondary | HighwayClass::Tertiary => 0.85,
        HighwayClass::Pedestrian => 0.70,
        HighwayClass::Residential | HighwayClass::LivingStreet | HighwayClass::Unclassified => 0.55,
        _ => 0.30,
    }
}

/// Everything an edge is scored against. Grids hold indices into the
/// request's feature arrays.
pub struct ScoreContext<'a> {
    pub lighting: &'a CoverageMap,
    pub crime_density: &'a CoverageMap,
    pub cctv: &'a crate::grid::SpatialGrid<u32>,
    pub places: &'a crate::grid::SpatialGrid<u32>,
    pub transit: &'a crate::grid::SpatialGrid<u32>,
}

/// Attributes of the edge being scored that feed the factor computation.
pub struct EdgeAttrs {
    pub midpoint: Point,
    pub highway: HighwayClass,
    pub is_dead_end: bool,
    pub has_sidewalk: bool,
    pub surface: SurfaceType,
}

/// The six unit-interval factor scores plus the raw nearby counts the route
/// stats report later.
pub fn edge_factors(attrs: &EdgeAttrs, ctx: &ScoreContext) -> (Factors, u16, u16) {
    let light_raw = ctx.lighting.value_at(attrs.midpoint) as f64;
    let light = 1. - (-LIGHT_K * light_raw).exp();

    let density = ctx.crime_density.value_at(attrs.midpoint) as f64;
    let crime = (-CRIME_K * density).exp();

    let nearby_cctv = ctx.cctv.count_within(attrs.midpoint, CCTV_RADIUS_M);
    let cctv = (nearby_cctv as f64 / CCTV_SATURATION).min(1.);

    let nearby_places = ctx.places.count_within(attrs.midpoint, PLACE_RADIUS_M);
    let place = (nearby_places as f64 / PLACE_SATURATION).min(1.);

    let nearby_transit = ctx.transit.count_within(attrs.midpoint, TRANSIT_RADIUS_M);
    let transit_term = (nearby_transit as f64 / TRANSIT_SATURATION).min(1.);
    let traffic = 0.6 * transit_term + 0.4 * road_traffic_term(attrs.highway);

    let mut road_type = road_type_base(attrs.highway);
    if attrs.is_dead_end {
        road_type -= DEAD_END_PENALTY;
    }
    if attrs.surface.is_unpaved() {
        road_type -= UNPAVED_PENALTY;
    }
    if attrs.has_sidewalk {
        road_type += SIDEWALK_BONUS;
    }

    let factors = Factors {
        road_type: road_type.clamp(0., 1.) as f32,
        light: light.clamp(0., 1.) as f32,
        crime: crime.clamp(0., 1.) as f32,
        cctv: cctv as f32,
        place: place as f32,
        traffic: traffic.clamp(0., 1.) as f32,
    };

    (
        factors,
        nearby_cctv.min(u16::MAX as usize) as u16,
        nearby_transit.min(u16::MAX as usize) as u16,
    )
}

/// Convex combination of the six factors.
pub fn composite(f: &Factors, w: &Weights) -> f32 {
    (w.road_type * f.road_type as f64
        + w.light * f.light as f64
        + w.crime * f.crime as f64
        + w.cctv * f.cctv as f64
        + w.place * f.place as f64
        + w.traffic * f.traffic as f64) as f32
}

/// Search weight. `alpha > 0` keeps the straight-line heuristic admissible:
/// every edge costs at least `alpha * distance`.
pub fn search_weight(distance: f32, safety: f32, alpha: f64, beta: f64) -> f32 {
    distance * (alpha + beta * (1. - safety as f64)) as f32
}

pub fn safety_label(score100: f64) -> (&'static str, &'static str) {
    if score100 >= 75. {
        ("Very Safe", "#2E7D32")
    } else if score100 >= 55. {
        ("Safe", "#558B2F")
    } else if score100 >= 35. {
        ("Moderate", "#F9A825")
    } else {
        ("Use Caution", "#C62828")
    }
}

pub fn segment_color(safety: f32) -> &'static str {
    if safety >= 0.7 {
        "#4CAF50"
    } else if safety >= 0.5 {
        "#8BC34A"
    } else if safety >= 0.35 {
        "#FFC107"
    } else if safety >= 0.2 {
        "#FF9800"
    } else {
        "#F44336"
    }
}

#[derive(Debug, Clone)]
pub struct NameChange {
    pub segment_index: usize,
    pub name: CompactString,
    pub cumulative_m: f64,
}

/// Per-factor means in [0,100], length-weighted.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreakdownPct {
    pub road_type: f64,
    pub light: f64,
    pub crime: f64,
    pub cctv: f64,
    pub place: f64,
    pub traffic: f64,
}

#[derive(Debug, Clone)]
pub struct RouteAggregate {
    pub overall: f64,
    pub label: &'static str,
    pub color: &'static str,
    pub breakdown: BreakdownPct,
    /// Length-weighted integer percentages, renormalized to sum to 100.
    pub road_types: Vec<(&'static str, u32)>,
    pub main_road_ratio: f64,
    pub dead_ends: u32,
    pub sidewalk_pct: f64,
    pub unpaved_pct: f64,
    pub transit_stops: u32,
    pub cctv_cameras: u32,
    pub name_changes: Vec<NameChange>,
}

const NEARBY_COUNT_CAP: u32 = 50;

pub fn aggregate(graph: &Graph, route: &Route) -> RouteAggregate {
    let mut total_len = 0_f64;
    let mut sums = BreakdownPct::default();
    let mut overall_sum = 0_f64;
    let mut class_len: Vec<(HighwayClass, f64)> = Vec::new();
    let mut main_len = 0_f64;
    let mut sidewalk_len = 0_f64;
    let mut unpaved_len = 0_f64;
    let mut dead_ends = 0_u32;
    let mut transit_stops = 0_u64;
    let mut cctv_cameras = 0_u64;
    let mut name_changes = Vec::new();
    let mut current_name: Option<&CompactString> = None;

    for (i, &edge_idx) in route.edges.iter().enumerate() {
        let edge = &graph.edges[edge_idx as usize];
        let len = edge.distance as f64;
        total_len += len;

        sums.road_type += edge.factors.road_type as f64 * len;
        sums.light += edge.factors.light as f64 * len;
        sums.crime += edge.factors.crime as f64 * len;
        sums.cctv += edge.factors.cctv as f64 * len;
        sums.place += edge.factors.place as f64 * len;
        sums.traffic += edge.factors.traffic as f64 * len;
        overall_sum += edge.safety as f64 * len;

        match class_len.iter_mut().find(|(c, _)| *c == edge.highway) {
            Some((_, l)) => *l += len,
            None => class_len.push((edge.highway, len)),
        }
        if edge.highway.is_main_road() {
            main_len += len;
        }
        if edge.has_sidewalk {
            sidewalk_len += len;
        }
        if edge.surface.is_unpaved() {
            unpaved_len += len;
        }
        if edge.is_dead_end {
            dead_ends += 1;
        }
        transit_stops += edge.nearby_transit as u64;
        cctv_cameras += edge.nearby_cctv as u64;

        if let Some(name) = &edge.road_name
            && current_name != Some(name)
        {
            name_changes.push(NameChange {
                segment_index: i,
                name: name.clone(),
                cumulative_m: total_len - len,
            });
            current_name = Some(name);
        }
    }

    let denom = total_len.max(1e-9);
    let breakdown = BreakdownPct {
        road_type: 100. * sums.road_type / denom,
        light: 100. * sums.light / denom,
        crime: 100. * sums.crime / denom,
        cctv: 100. * sums.cctv / denom,
        place: 100. * sums.place / denom,
        traffic: 100. * sums.traffic / denom,
    };
    let overall = 100. * overall_sum / denom;
    let (label, color) = safety_label(overall);

    RouteAggregate {
        overall,
        label,
        color,
        breakdown,
        road_types: percentages(&class_len, denom),
        main_road_ratio: main_len / denom,
        dead_ends,
        sidewalk_pct: 100. * sidewalk_len / denom,
        unpaved_pct: 100. * unpaved_len / denom,
        transit_stops: (transit_stops as u32).min(NEARBY_COUNT_CAP),
        cctv_cameras: (cctv_cameras as u32).min(NEARBY_COUNT_CAP),
        name_changes,
    }
}

/// Integer percentages that sum to exactly 100: round each share, then settle
/// the rounding debt on the largest entry.
fn percentages(class_len: &[(HighwayClass, f64)], total: f64) -> Vec<(&'static str, u32)> {
    if class_len.is_empty() {
        return Vec::new();
    }

    let mut shares = class_len
        .iter()
        .map(|(class, len)| (class.as_str(), (100. * len / total).round() as i64))
        .collect::<Vec<_>>();

    let sum: i64 = shares.iter().map(|(_, p)| p).sum();
    let debt = 100 - sum;
    if debt != 0
        && let Some(largest) = shares.iter_mut().max_by_key(|(_, p)| *p)
    {
        largest.1 = (largest.1 + debt).max(0);
    }

    shares
        .into_iter()
        .map(|(name, p)| (name, p.max(0) as u32))
        .collect()
}
