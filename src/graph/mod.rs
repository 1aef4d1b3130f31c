pub mod coverage;
pub mod scoring;

use compact_str::CompactString;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{
    config::Weights,
    error::RouteError,
    grid::SpatialGrid,
    math,
    model::{
        BoundingBox, CrimeIncident, FeatureSet, HighwayClass, Point, SurfaceType,
    },
};
use coverage::CoverageMap;
use scoring::{EdgeAttrs, ScoreContext};

/// ~55m cells for endpoint snapping.
pub const NODE_GRID_CELL_DEG: f64 = 0.0005;
/// Feature grids use slightly larger cells than the node grid since their
/// query radii are bigger.
const FEATURE_GRID_CELL_DEG: f64 = 0.0008;

/// Edges shorter than this are collapsed; they are duplicate vertices in the
/// source geometry.
const MIN_EDGE_M: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default)]
pub struct Factors {
    pub road_type: f32,
    pub light: f32,
    pub crime: f32,
    pub cctv: f32,
    pub place: f32,
    pub traffic: f32,
}

/// One undirected edge, with every scalar the search and the scorer need
/// materialized up front so the hot loops never chase a hash map.
#[derive(Debug, Clone)]
pub struct Edge {
    pub a: u32,
    pub b: u32,
    pub distance: f32,
    pub highway: HighwayClass,
    pub road_name: Option<CompactString>,
    pub is_dead_end: bool,
    pub has_sidewalk: bool,
    pub surface: SurfaceType,
    pub factors: Factors,
    pub safety: f32,
    pub nearby_cctv: u16,
    pub nearby_transit: u16,
    pub weight: f32,
}

impl Edge {
    /// The other endpoint of this undirected edge.
    #[inline]
    pub fn opposite(&self, node: u32) -> u32 {
        if node == self.a { self.b } else { self.a }
    }
}

/// Spatial indices over the request's point features; values are indices into
/// the corresponding arrays.
#[derive(Debug)]
pub struct FeatureGrids {
    pub lights: SpatialGrid<u32>,
    pub cctv: SpatialGrid<u32>,
    pub places: SpatialGrid<u32>,
    pub transit: SpatialGrid<u32>,
    pub crimes: SpatialGrid<u32>,
}

/// The per-request walking graph. Owned by the request scope and dropped with
/// it; nothing here is shared across requests.
#[derive(Debug)]
pub struct Graph {
    pub nodes: Vec<Point>,
    pub edges: Vec<Edge>,
    /// node id -> (neighbor node id, edge id)
    pub adjacency: Vec<Vec<(u32, u32)>>,
    pub node_grid: SpatialGrid<u32>,
    pub lighting: CoverageMap,
    pub crime_density: CoverageMap,
    pub grids: FeatureGrids,
}

pub struct BuildParams {
    pub weights: Weights,
    pub alpha: f64,
    pub beta: f64,
    pub coverage_cell_m: f64,
}

impl BuildParams {
    pub fn from_config() -> Self {
        let cfg = &*crate::config::CONFIG;
        Self {
            weights: cfg.active_weights(),
            alpha: cfg.alpha,
            beta: cfg.beta,
            coverage_cell_m: cfg.coverage_cell_m,
        }
    }
}

impl Graph {
    pub fn degree(&self, node: u32) -> usize {
        self.adjacency[node as usize].len()
    }

    pub fn build(
        features: &FeatureSet,
        crimes: &[CrimeIncident],
        bbox: &BoundingBox,
        params: &BuildParams,
    ) -> Result<Graph, RouteError> {
        if bbox.is_degenerate() || features.roads.is_empty() {
            return Err(RouteError::NoWalkingNetwork);
        }

        let mut nodes = Vec::<Point>::new();
        let mut edges = Vec::<Edge>::new();
        let mut adjacency = Vec::<Vec<(u32, u32)>>::new();
        // intersections share source nodes, so identical coordinates must
        // intern to the same graph node
        let mut interned = FxHashMap::<(i64, i64), u32>::default();

        let mut intern = |p: Point, nodes: &mut Vec<Point>, adjacency: &mut Vec<Vec<(u32, u32)>>| {
            let key = ((p.lat * 1e7).round() as i64, (p.lng * 1e7).round() as i64);
            *interned.entry(key).or_insert_with(|| {
                nodes.push(p);
                adjacency.push(Vec::new());
                (nodes.len() - 1) as u32
            })
        };

        for way in &features.roads {
            for pair in way.geometry.windows(2) {
                let distance = math::fast_distance(pair[0], pair[1]);
                if distance < MIN_EDGE_M {
                    continue;
                }
                let a = intern(pair[0], &mut nodes, &mut adjacency);
                let b = intern(pair[1], &mut nodes, &mut adjacency);
                if a == b {
                    continue;
                }

                let edge_id = edges.len() as u32;
                edges.push(Edge {
                    a,
                    b,
                    distance: distance as f32,
                    highway: way.highway,
                    road_name: way.name.clone(),
                    is_dead_end: false,
                    has_sidewalk: way.has_sidewalk,
                    surface: way.surface,
                    factors: Factors::default(),
                    safety: 0.,
                    nearby_cctv: 0,
                    nearby_transit: 0,
                    weight: 0.,
                });
                adjacency[a as usize].push((b, edge_id));
                adjacency[b as usize].push((a, edge_id));
            }
        }

        if edges.is_empty() {
            return Err(RouteError::NoWalkingNetwork);
        }

        for edge in &mut edges {
            edge.is_dead_end =
                adjacency[edge.a as usize].len() == 1 || adjacency[edge.b as usize].len() == 1;
        }

        let lighting = coverage::build_lighting(bbox, params.coverage_cell_m, &features.lights);
        let crime_density = coverage::build_crime_density(bbox, params.coverage_cell_m, crimes);
        debug!(
            "coverage maps: {} lighting cells, {} crime cells",
            lighting.cells(),
            crime_density.cells()
        );

        let grids = build_feature_grids(features, crimes);

        let ctx = ScoreContext {
            lighting: &lighting,
            crime_density: &crime_density,
            cctv: &grids.cctv,
            places: &grids.places,
            transit: &grids.transit,
        };
        for edge in &mut edges {
            let attrs = EdgeAttrs {
                midpoint: nodes[edge.a as usize].midpoint(nodes[edge.b as usize]),
                highway: edge.highway,
                is_dead_end: edge.is_dead_end,
                has_sidewalk: edge.has_sidewalk,
                surface: edge.surface,
            };
            let (factors, nearby_cctv, nearby_transit) = scoring::edge_factors(&attrs, &ctx);
            edge.factors = factors;
            edge.nearby_cctv = nearby_cctv;
            edge.nearby_transit = nearby_transit;
            edge.safety = scoring::composite(&factors, &params.weights);
            edge.weight =
                scoring::search_weight(edge.distance, edge.safety, params.alpha, params.beta);
        }

        let mut node_grid = SpatialGrid::new(NODE_GRID_CELL_DEG);
        for (i, p) in nodes.iter().enumerate() {
            node_grid.insert(*p, i as u32);
        }

        info!(
            "built graph: {} nodes, {} edges from {} ways",
            nodes.len(),
            edges.len(),
            features.roads.len()
        );

        Ok(Graph {
            nodes,
            edges,
            adjacency,
            node_grid,
            lighting,
            crime_density,
            grids,
        })
    }
}

fn build_feature_grids(features: &FeatureSet, crimes: &[CrimeIncident]) -> FeatureGrids {
    let mut lights = SpatialGrid::new(FEATURE_GRID_CELL_DEG);
    for (i, p) in features.lights.iter().enumerate() {
        lights.insert(*p, i as u32);
    }
    let mut cctv = SpatialGrid::new(FEATURE_GRID_CELL_DEG);
    for (i, p) in features.cctv.iter().enumerate() {
        cctv.insert(*p, i as u32);
    }
    let mut places = SpatialGrid::new(FEATURE_GRID_CELL_DEG);
    for (i, place) in features.places.iter().enumerate() {
        places.insert(place.loc, i as u32);
    }
    let mut transit = SpatialGrid::new(FEATURE_GRID_CELL_DEG);
    for (i, stop) in features.transit.iter().enumerate() {
        transit.insert(stop.loc, i as u32);
    }
    let mut crime_grid = SpatialGrid::new(FEATURE_GRID_CELL_DEG);
    for (i, incident) in crimes.iter().enumerate() {
        crime_grid.insert(incident.loc, i as u32);
    }

    FeatureGrids {
        lights,
        cctv,
        places,
        transit,
        crimes: crime_grid,
    }
}

/// An ordered walk through the graph. Consecutive nodes are adjacent via the
/// edge at the same index; `total_distance` is physical meters, not weight.
#[derive(Debug, Clone)]
pub struct Route {
    pub nodes: Vec<u32>,
    pub edges: Vec<u32>,
    pub total_distance: f64,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::model::RoadWay;

    use super::*;

    /// A ladder of two parallel north-south streets ~600m long, connected at
    /// both ends and in the middle. Street spacing ~140m.
    pub fn parallel_streets() -> FeatureSet {
        let west_lng = -0.1020;
        let east_lng = -0.1000;
        let lats = [51.5000, 51.5014, 51.5028, 51.5042, 51.5056];

        let mut roads = Vec::new();
        let vertical = |lng: f64, name: &str, highway: HighwayClass| RoadWay {
            geometry: lats.iter().map(|&lat| Point::new(lat, lng)).collect(),
            highway,
            name: Some(name.into()),
            has_sidewalk: true,
            surface: SurfaceType::Asphalt,
            lit: false,
        };
        roads.push(vertical(west_lng, "West Street", HighwayClass::Residential));
        roads.push(vertical(east_lng, "East Street", HighwayClass::Primary));

        // rungs at the ends and the middle
        for lat in [lats[0], lats[2], lats[4]] {
            roads.push(RoadWay {
                geometry: vec![Point::new(lat, west_lng), Point::new(lat, east_lng)],
                highway: HighwayClass::Footway,
                name: None,
                has_sidewalk: false,
                surface: SurfaceType::Asphalt,
                lit: false,
            });
        }

        FeatureSet {
            roads,
            ..Default::default()
        }
    }

    pub fn build_params() -> BuildParams {
        BuildParams {
            weights: Weights::DAY,
            alpha: 1.0,
            beta: 3.0,
            coverage_cell_m: 25.,
        }
    }

    pub fn bbox() -> BoundingBox {
        BoundingBox {
            south: 51.4995,
            west: -0.1030,
            north: 51.5061,
            east: -0.0990,
        }
    }
}
