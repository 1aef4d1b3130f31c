use std::{
    future::Future,
    hash::Hash,
    sync::{Arc, LazyLock},
    time::Instant,
};

use parking_lot::Mutex;
use quick_cache::sync::Cache;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    Timed, astar,
    config::CONFIG,
    crime,
    error::{Endpoint, RouteError},
    features,
    graph::{BuildParams, Graph},
    math,
    model::Point,
    response::{self, ResponseInputs, RouteResponse, Timing},
};

/// Route results keyed by endpoints rounded to 3 decimals (~100m).
pub type RouteKey = [i32; 4];

static ROUTE_CACHE: LazyLock<Cache<RouteKey, Timed<Arc<RouteResponse>>>> =
    LazyLock::new(|| Cache::new(100));

static INFLIGHT: LazyLock<Inflight<RouteKey, Arc<RouteResponse>>> = LazyLock::new(Inflight::new);

pub fn route_key(origin: Point, destination: Point) -> RouteKey {
    [
        (origin.lat * 1e3).round() as i32,
        (origin.lng * 1e3).round() as i32,
        (destination.lat * 1e3).round() as i32,
        (destination.lng * 1e3).round() as i32,
    ]
}

/// Single-flight map: the first task for a key computes, everyone else
/// subscribes and waits. Waiters never hold the map lock across the await,
/// and a waiter being cancelled doesn't touch the leader.
pub struct Inflight<K, V> {
    map: Mutex<FxHashMap<K, broadcast::Sender<V>>>,
}

impl<K: Eq + Hash + Copy, V: Clone> Inflight<K, V> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(FxHashMap::default()),
        }
    }

    fn start_or_subscribe(&self, key: K) -> InflightOutcome<V> {
        let mut map = self.map.lock();
        match map.get(&key) {
            Some(tx) => InflightOutcome::Wait(tx.subscribe()),
            None => {
                let (tx, _) = broadcast::channel(1);
                map.insert(key, tx.clone());
                InflightOutcome::Lead(tx)
            }
        }
    }

    pub async fn run<F>(&self, key: K, compute: F) -> Result<V, RouteError>
    where
        F: Future<Output = Result<V, RouteError>>,
    {
        let tx = match self.start_or_subscribe(key) {
            InflightOutcome::Wait(mut rx) => {
                // the leader dropping the sender without broadcasting
                // means it failed; waiters get a fresh error, not the
                // leader's cached failure
                return rx.recv().await.map_err(|_| RouteError::Internal);
            }
            InflightOutcome::Lead(tx) => tx,
        };

        // the entry must go away even if the leader is cancelled mid-compute,
        // or every later request for this key would wait forever
        let guard = RemoveOnDrop {
            map: &self.map,
            key,
        };
        let result = compute.await;
        drop(guard);

        if let Ok(value) = &result {
            // waiters may have all gone away; that's fine
            let _ = tx.send(value.clone());
        }

        result
    }
}

enum InflightOutcome<V> {
    Wait(broadcast::Receiver<V>),
    Lead(broadcast::Sender<V>),
}

struct RemoveOnDrop<'a, K: Eq + Hash + Copy, V> {
    map: &'a Mutex<FxHashMap<K, broadcast::Sender<V>>>,
    key: K,
}

impl<K: Eq + Hash + Copy, V> Drop for RemoveOnDrop<'_, K, V> {
    fn drop(&mut self) {
        self.map.lock().remove(&self.key);
    }
}

impl<K: Eq + Hash + Copy, V: Clone> Default for Inflight<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// The full per-request pipeline. Validation, then cache and coalescing, then
/// fetch / build / search / score.
pub async fn plan_routes(
    origin: Point,
    destination: Point,
) -> Result<Arc<RouteResponse>, RouteError> {
    validate(origin, destination)?;

    let key = route_key(origin, destination);
    if let Some(entry) = ROUTE_CACHE.get(&key) {
        if entry.fresh(CONFIG.route_cache_ttl) {
            debug!("route cache hit for {origin} -> {destination}");
            return Ok(entry.value);
        }
        ROUTE_CACHE.remove(&key);
    }

    INFLIGHT
        .run(key, async move {
            let response = compute(origin, destination).await?;
            ROUTE_CACHE.insert(key, Timed::new(response.clone()));
            Ok(response)
        })
        .await
}

fn validate(origin: Point, destination: Point) -> Result<(), RouteError> {
    if !origin.is_valid() || !destination.is_valid() {
        return Err(RouteError::InvalidCoordinate);
    }

    let distance_km = math::haversine(origin, destination) / 1000.;
    if distance_km > CONFIG.max_distance_km {
        // rough upstream workload estimate for the span the request covers
        let estimated_data_points = (distance_km * distance_km * 4000.) as u64;
        return Err(RouteError::DestinationOutOfRange {
            actual_km: distance_km,
            limit_km: CONFIG.max_distance_km,
            estimated_data_points,
        });
    }

    Ok(())
}

/// Tighter buffers for longer requests keep the upstream payload bounded.
fn buffer_meters(straight_km: f64) -> f64 {
    if straight_km < 1. {
        500.
    } else if straight_km < 3. {
        400.
    } else {
        300.
    }
}

async fn compute(origin: Point, destination: Point) -> Result<Arc<RouteResponse>, RouteError> {
    let request_start = Instant::now();
    let straight_km = math::haversine(origin, destination) / 1000.;

    let bbox = math::bbox_from_points(&[origin, destination], buffer_meters(straight_km))
        .ok_or(RouteError::Internal)?;
    info!("planning {origin} -> {destination} ({straight_km:.2}km straight line, bbox {bbox})");

    // the two upstream fetches are the only suspension points in the pipeline
    let features_fut = timed(features::get_features(&bbox));
    let crimes_fut = timed(crime::get_crimes(&bbox));
    let ((features_res, features_ms), (crimes_res, crimes_ms)) =
        tokio::join!(features_fut, crimes_fut);
    let features = features_res?;
    let crimes = crimes_res?;

    let graph_start = Instant::now();
    let graph = Graph::build(&features, &crimes, &bbox, &BuildParams::from_config())?;
    let graph_ms = graph_start.elapsed().as_millis() as u64;

    let src = astar::nearest_node(&graph, origin, Endpoint::Origin)?;
    let dst = astar::nearest_node(&graph, destination, Endpoint::Destination)?;

    let pathfind_start = Instant::now();
    let routes = astar::k_diverse(&graph, src, dst, &astar::SearchParams::from_config())?;
    let pathfind_ms = pathfind_start.elapsed().as_millis() as u64;

    let scoring_start = Instant::now();
    let mut response = response::build(ResponseInputs {
        origin,
        destination,
        graph: &graph,
        features: &features,
        crimes: &crimes,
        routes,
        max_distance_km: CONFIG.max_distance_km,
        timing: Timing {
            features_ms,
            crimes_ms,
            graph_ms,
            pathfind_ms,
            scoring_ms: 0,
        },
        compute_time_ms: 0,
    });
    let scoring_ms = scoring_start.elapsed().as_millis() as u64;

    response.meta.timing.scoring_ms = scoring_ms;
    response.meta.compute_time_ms = request_start.elapsed().as_millis() as u64;

    info!(
        "served {} routes for {origin} -> {destination} in {}ms",
        response.meta.route_count, response.meta.compute_time_ms
    );

    Ok(Arc::new(response))
}

async fn timed<T>(fut: impl Future<Output = T>) -> (T, u64) {
    let start = Instant::now();
    let value = fut.await;
    let ms = start.elapsed().as_millis() as u64;
    if ms > 5000 {
        warn!("upstream stage took {ms}ms");
    }
    (value, ms)
}
