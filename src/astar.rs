use std::{cmp, collections::BinaryHeap, time::Instant};

use rustc_hash::FxHashSet;
use tracing::{debug, info};

use crate::{
    error::{Endpoint, RouteError},
    graph::{Graph, Route},
    math,
    model::Point,
};

/// Routes longer than this multiple of the straight-line span are abandoned.
pub const MAX_DETOUR: f64 = 2.5;
/// A later route within this length tolerance and sharing most edges with an
/// earlier one is considered the same route.
const DUP_DISTANCE_TOLERANCE: f64 = 0.05;
const DUP_JACCARD: f64 = 0.9;

/// Endpoint snapping gives up past this radius.
const SNAP_MAX_M: f64 = 200.;
const SNAP_RINGS_M: [f64; 4] = [50., 100., 150., 200.];

#[derive(Debug, Clone, Copy)]
pub struct SearchParams {
    pub k: usize,
    pub gamma: f64,
    pub alpha: f64,
}

impl SearchParams {
    pub fn from_config() -> Self {
        let cfg = &*crate::config::CONFIG;
        Self {
            k: cfg.k_routes,
            gamma: cfg.gamma,
            alpha: cfg.alpha,
        }
    }
}

/// Snaps a request endpoint to the nearest connected node, growing the search
/// ring until the hard cap.
pub fn nearest_node(graph: &Graph, p: Point, which: Endpoint) -> Result<u32, RouteError> {
    for radius in SNAP_RINGS_M {
        let found = graph
            .node_grid
            .nearest_within(p, radius, |&node| graph.degree(node) > 0);
        if let Some((_, &node, dist)) = found {
            debug!("snapped {} to node {node} at {dist:.1}m", which.as_str());
            return Ok(node);
        }
    }

    debug!("no road within {SNAP_MAX_M}m of {p} ({})", which.as_str());
    Err(RouteError::NoNearbyRoad { which })
}

/// Up to k diverse routes. The first search runs on pristine weights; each
/// following round multiplies the weight of already-used edges by
/// `1 + gamma * reuse_count` and re-runs. The shared graph is never mutated;
/// penalties live in a local weight vector and die with the request.
pub fn k_diverse(
    graph: &Graph,
    src: u32,
    dst: u32,
    params: &SearchParams,
) -> Result<Vec<Route>, RouteError> {
    if src == dst {
        return Ok(vec![Route {
            nodes: vec![src],
            edges: Vec::new(),
            total_distance: 0.,
        }]);
    }

    let straight = math::fast_distance(graph.nodes[src as usize], graph.nodes[dst as usize]);
    let max_route_dist = MAX_DETOUR * straight;

    let base = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();
    let mut weights = base.clone();
    let mut reuse = vec![0_u32; graph.edges.len()];

    let start = Instant::now();
    let mut routes: Vec<Route> = Vec::with_capacity(params.k);
    let mut shortest_so_far = f64::MAX;

    while routes.len() < params.k {
        let Some(route) = shortest_path(graph, &weights, src, dst, params.alpha, max_route_dist)
        else {
            break;
        };

        if !routes.is_empty() {
            if route.total_distance > MAX_DETOUR * shortest_so_far {
                debug!(
                    "round {}: route of {:.0}m is past the detour bound, stopping",
                    routes.len(),
                    route.total_distance
                );
                break;
            }
            if is_near_duplicate(&route, &routes) {
                debug!("round {}: near-duplicate route, stopping", routes.len());
                break;
            }
        }

        for &edge in &route.edges {
            reuse[edge as usize] += 1;
        }
        for (i, &count) in reuse.iter().enumerate() {
            if count > 0 {
                weights[i] = base[i] * (1. + params.gamma * count as f64) as f32;
            }
        }

        shortest_so_far = shortest_so_far.min(route.total_distance);
        routes.push(route);
    }

    if routes.is_empty() {
        return Err(RouteError::NoRouteFound {
            nodes: graph.nodes.len(),
            edges: graph.edges.len(),
        });
    }

    info!(
        "found {} routes in {:?} (shortest {:.0}m)",
        routes.len(),
        start.elapsed(),
        routes[0].total_distance
    );

    Ok(routes)
}

fn is_near_duplicate(candidate: &Route, existing: &[Route]) -> bool {
    let candidate_edges = candidate.edges.iter().collect::<FxHashSet<_>>();
    for prior in existing {
        let length_close = (candidate.total_distance - prior.total_distance).abs()
            <= DUP_DISTANCE_TOLERANCE * prior.total_distance;
        if !length_close {
            continue;
        }

        let prior_edges = prior.edges.iter().collect::<FxHashSet<_>>();
        let intersection = candidate_edges.intersection(&prior_edges).count();
        let union = candidate_edges.union(&prior_edges).count();
        if union > 0 && intersection as f64 / union as f64 > DUP_JACCARD {
            return true;
        }
    }
    false
}

/// A* over the undirected graph with the straight-line heuristic scaled by
/// alpha. Relaxations whose accumulated physical distance exceeds
/// `max_distance` are pruned; popping the target terminates.
pub fn shortest_path(
    graph: &Graph,
    weights: &[f32],
    src: u32,
    dst: u32,
    alpha: f64,
    max_distance: f64,
) -> Option<Route> {
    let n = graph.nodes.len();
    let dst_loc = graph.nodes[dst as usize];

    let mut g_score = vec![f32::INFINITY; n];
    let mut dist = vec![f32::INFINITY; n];
    let mut came_from_node = vec![u32::MAX; n];
    let mut came_from_edge = vec![u32::MAX; n];

    let mut open_set = BinaryHeap::new();
    let mut seq = 0_u32;

    g_score[src as usize] = 0.;
    dist[src as usize] = 0.;
    open_set.push(WeightedNode {
        f_score: heuristic(graph, src, dst_loc, alpha),
        seq,
        node: src,
        g_score: 0.,
    });

    while let Some(WeightedNode {
        node,
        g_score: g, ..
    }) = open_set.pop()
    {
        if node == dst {
            return Some(reconstruct(&came_from_node, &came_from_edge, &dist, dst));
        }

        // a confirmed cheaper way to this node is already known
        if g > g_score[node as usize] {
            continue;
        }

        for &(neighbor, edge_id) in &graph.adjacency[node as usize] {
            let edge = &graph.edges[edge_id as usize];
            let tentative_dist = dist[node as usize] + edge.distance;
            if (tentative_dist as f64) > max_distance {
                continue;
            }

            let tentative_g = g + weights[edge_id as usize];
            if tentative_g < g_score[neighbor as usize] {
                g_score[neighbor as usize] = tentative_g;
                dist[neighbor as usize] = tentative_dist;
                came_from_node[neighbor as usize] = node;
                came_from_edge[neighbor as usize] = edge_id;

                seq += 1;
                open_set.push(WeightedNode {
                    f_score: tentative_g + heuristic(graph, neighbor, dst_loc, alpha),
                    seq,
                    node: neighbor,
                    g_score: tentative_g,
                });
            }
        }
    }

    None
}

#[inline]
fn heuristic(graph: &Graph, node: u32, dst_loc: Point, alpha: f64) -> f32 {
    (alpha * math::fast_distance(graph.nodes[node as usize], dst_loc)) as f32
}

fn reconstruct(came_from_node: &[u32], came_from_edge: &[u32], dist: &[f32], dst: u32) -> Route {
    let mut nodes = vec![dst];
    let mut edges = Vec::new();

    let mut current = dst;
    while came_from_node[current as usize] != u32::MAX {
        edges.push(came_from_edge[current as usize]);
        current = came_from_node[current as usize];
        nodes.push(current);
    }

    nodes.reverse();
    edges.reverse();

    Route {
        nodes,
        edges,
        total_distance: dist[dst as usize] as f64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct WeightedNode {
    f_score: f32,
    seq: u32,
    node: u32,
    g_score: f32,
}

impl Ord for WeightedNode {
    #[inline]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        // inverted to make the BinaryHeap a min-heap; equal keys pop FIFO
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl Eq for WeightedNode {}
impl PartialOrd for WeightedNode {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::{bbox, build_params, parallel_streets};

    fn fixture_graph() -> Graph {
        Graph::build(&parallel_streets(), &[], &bbox(), &build_params()).unwrap()
    }

    fn params(k: usize) -> SearchParams {
        SearchParams {
            k,
            gamma: 0.6,
            alpha: 1.0,
        }
    }

    fn snap(graph: &Graph, p: Point) -> u32 {
        nearest_node(graph, p, Endpoint::Origin).unwrap()
    }

    #[test]
    fn test_shortest_path_prefers_safer_street() {
        let graph = fixture_graph();
        // south-west corner to north-east corner
        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5056, -0.1000));

        let weights = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();
        let route = shortest_path(&graph, &weights, src, dst, 1.0, f64::MAX).unwrap();

        assert_eq!(*route.nodes.first().unwrap(), src);
        assert_eq!(*route.nodes.last().unwrap(), dst);
        // crosses at the bottom and rides the primary street north
        let primary_len: f64 = route
            .edges
            .iter()
            .map(|&e| &graph.edges[e as usize])
            .filter(|e| e.highway == crate::model::HighwayClass::Primary)
            .map(|e| e.distance as f64)
            .sum();
        assert!(
            primary_len > route.total_distance * 0.7,
            "expected the primary street to dominate, got {primary_len:.0}m of {:.0}m",
            route.total_distance
        );

        // consecutive nodes are adjacent via the referenced edge
        for (i, &edge_id) in route.edges.iter().enumerate() {
            let edge = &graph.edges[edge_id as usize];
            let (a, b) = (route.nodes[i], route.nodes[i + 1]);
            assert!(
                (edge.a == a && edge.b == b) || (edge.a == b && edge.b == a),
                "edge {edge_id} does not connect nodes {a},{b}"
            );
        }
    }

    #[test]
    fn test_shortest_path_is_minimal() {
        let graph = fixture_graph();
        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5056, -0.1000));

        let weights = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();
        let route = shortest_path(&graph, &weights, src, dst, 1.0, f64::MAX).unwrap();
        let cost: f32 = route.edges.iter().map(|&e| weights[e as usize]).sum();

        // with the heuristic zeroed A* degrades to Dijkstra, which is the
        // reference minimum; the admissible heuristic must match it
        let reference = shortest_path(&graph, &weights, src, dst, 0., f64::MAX).unwrap();
        let reference_cost: f32 = reference.edges.iter().map(|&e| weights[e as usize]).sum();
        assert!((cost - reference_cost).abs() < 1e-3);
        assert!((route.total_distance - reference.total_distance).abs() < 1e-6);
    }

    #[test]
    fn test_max_distance_cap() {
        let graph = fixture_graph();
        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5056, -0.1000));

        let weights = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();
        // every path is at least ~760m
        assert!(shortest_path(&graph, &weights, src, dst, 1.0, 100.).is_none());
    }

    #[test]
    fn test_k_diverse_parallel_streets() {
        let graph = fixture_graph();
        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5056, -0.1000));

        let routes = k_diverse(&graph, src, dst, &params(3)).unwrap();
        assert_eq!(routes.len(), 3);

        // both streets and a mixed route
        for (i, route) in routes.iter().enumerate() {
            assert!(
                route.total_distance <= MAX_DETOUR * routes[0].total_distance + 1e-6,
                "route {i} too long"
            );
        }

        for i in 0..routes.len() {
            for j in 0..i {
                let a = routes[i].edges.iter().collect::<FxHashSet<_>>();
                let b = routes[j].edges.iter().collect::<FxHashSet<_>>();
                let shared = a.intersection(&b).count();
                assert!(
                    (shared as f64) / (a.len() as f64) <= 0.9,
                    "routes {i} and {j} overlap too much"
                );
            }
        }

        // determinism: a second run returns identical routes
        let again = k_diverse(&graph, src, dst, &params(3)).unwrap();
        for (a, b) in routes.iter().zip(&again) {
            assert_eq!(a.edges, b.edges);
            assert_eq!(a.total_distance, b.total_distance);
        }
    }

    #[test]
    fn test_k_diverse_does_not_mutate_graph_weights() {
        let graph = fixture_graph();
        let before = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();

        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5056, -0.1000));
        let _ = k_diverse(&graph, src, dst, &params(5)).unwrap();

        let after = graph.edges.iter().map(|e| e.weight).collect::<Vec<_>>();
        assert_eq!(before, after);
    }

    #[test]
    fn test_same_endpoint_is_trivial_route() {
        let graph = fixture_graph();
        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let routes = k_diverse(&graph, src, src, &params(3)).unwrap();
        assert_eq!(routes.len(), 1);
        assert!(routes[0].edges.is_empty());
        assert_eq!(routes[0].total_distance, 0.);
    }

    #[test]
    fn test_snap_failure_carries_which() {
        let graph = fixture_graph();
        // ~1km west of the network
        let err = nearest_node(&graph, Point::new(51.5028, -0.117), Endpoint::Destination)
            .unwrap_err();
        match err {
            RouteError::NoNearbyRoad { which } => assert_eq!(which, Endpoint::Destination),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_disconnected_components_find_no_route() {
        let mut features = parallel_streets();
        // an island street far to the east
        features.roads.push(crate::model::RoadWay {
            geometry: vec![
                Point::new(51.5000, -0.0950),
                Point::new(51.5010, -0.0950),
            ],
            highway: crate::model::HighwayClass::Footway,
            name: None,
            has_sidewalk: false,
            surface: crate::model::SurfaceType::Unknown,
            lit: false,
        });
        let graph = Graph::build(
            &features,
            &[],
            &crate::model::BoundingBox {
                south: 51.4995,
                west: -0.1030,
                north: 51.5061,
                east: -0.0940,
            },
            &build_params(),
        )
        .unwrap();

        let src = snap(&graph, Point::new(51.5000, -0.1020));
        let dst = snap(&graph, Point::new(51.5005, -0.0950));

        let err = k_diverse(&graph, src, dst, &params(3)).unwrap_err();
        match err {
            RouteError::NoRouteFound { nodes, edges } => {
                assert_eq!(nodes, graph.nodes.len());
                assert_eq!(edges, graph.edges.len());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
