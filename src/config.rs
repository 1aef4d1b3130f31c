use std::{
    env,
    str::FromStr,
    sync::LazyLock,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use tracing::warn;

pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_env);

/// Per-edge factor weights. Always normalized so they sum to 1, which keeps
/// the composite score a convex combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub road_type: f64,
    pub light: f64,
    pub crime: f64,
    pub cctv: f64,
    pub place: f64,
    pub traffic: f64,
}

impl Weights {
    pub const DAY: Weights = Weights {
        road_type: 0.20,
        light: 0.25,
        crime: 0.25,
        cctv: 0.10,
        place: 0.10,
        traffic: 0.10,
    };

    /// At night the lighting and crime shares increase.
    pub const NIGHT: Weights = Weights {
        road_type: 0.15,
        light: 0.32,
        crime: 0.31,
        cctv: 0.08,
        place: 0.07,
        traffic: 0.07,
    };

    fn sum(&self) -> f64 {
        self.road_type + self.light + self.crime + self.cctv + self.place + self.traffic
    }

    fn normalized(mut self) -> Self {
        let sum = self.sum();
        if sum <= 0. {
            return Self::DAY;
        }
        if (sum - 1.).abs() > 1e-6 {
            warn!("factor weights sum to {sum}, normalizing");
            self.road_type /= sum;
            self.light /= sum;
            self.crime /= sum;
            self.cctv /= sum;
            self.place /= sum;
            self.traffic /= sum;
        }
        self
    }

    /// Comma-separated `roadType,light,crime,cctv,place,traffic`.
    fn parse(value: &str) -> Option<Self> {
        let parts = value
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.)
            })
            .collect::<Option<Vec<_>>>()?;
        let [road_type, light, crime, cctv, place, traffic] = parts.as_slice() else {
            return None;
        };
        let w = Weights {
            road_type: *road_type,
            light: *light,
            crime: *crime,
            cctv: *cctv,
            place: *place,
            traffic: *traffic,
        };
        Some(w.normalized())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NightMode {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub max_distance_km: f64,
    pub route_cache_ttl: Duration,
    pub feature_cache_ttl: Duration,
    pub crime_cache_ttl: Duration,
    pub servers: Vec<String>,
    pub crime_api_url: String,
    pub weights: Weights,
    pub night_weights: Weights,
    pub night: NightMode,
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub k_routes: usize,
    pub coverage_cell_m: f64,
    pub feature_timeout: Duration,
    pub crime_timeout: Duration,
    pub severity_violent: f64,
    pub severity_property: f64,
    pub severity_nuisance: f64,
}

impl Config {
    pub fn from_env() -> Self {
        let servers = env::var("SERVERS")
            .map(|s| {
                s.split(',')
                    .map(|u| u.trim().trim_end_matches('/').to_string())
                    .filter(|u| !u.is_empty())
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                vec![
                    "https://overpass-api.de/api/interpreter".to_string(),
                    "https://overpass.kumi.systems/api/interpreter".to_string(),
                    "https://overpass.osm.jp/api/interpreter".to_string(),
                ]
            });

        let weights = env::var("WEIGHTS")
            .ok()
            .and_then(|v| {
                let parsed = Weights::parse(&v);
                if parsed.is_none() {
                    warn!("WEIGHTS={v} is not six comma-separated numbers, using defaults");
                }
                parsed
            })
            .unwrap_or(Weights::DAY);
        let night_weights = env::var("NIGHT_WEIGHTS")
            .ok()
            .and_then(|v| {
                let parsed = Weights::parse(&v);
                if parsed.is_none() {
                    warn!("NIGHT_WEIGHTS={v} is not six comma-separated numbers, using defaults");
                }
                parsed
            })
            .unwrap_or(Weights::NIGHT);

        let night = match env::var("NIGHT").as_deref() {
            Ok("always") => NightMode::Always,
            Ok("never") => NightMode::Never,
            Ok("auto") | Err(_) => NightMode::Auto,
            Ok(other) => {
                warn!("NIGHT={other} not recognized (auto/always/never), using auto");
                NightMode::Auto
            }
        };

        Self {
            port: env_parse("PORT", 3917),
            max_distance_km: env_parse("MAX_DISTANCE_KM", 10.),
            route_cache_ttl: Duration::from_secs(env_parse("ROUTE_CACHE_TTL", 300)),
            feature_cache_ttl: Duration::from_secs(env_parse("FEATURE_CACHE_TTL", 1800)),
            crime_cache_ttl: Duration::from_secs(env_parse("CRIME_CACHE_TTL", 86_400)),
            servers,
            crime_api_url: env::var("CRIME_API_URL")
                .unwrap_or_else(|_| "https://data.police.uk/api/crimes-street/all-crime".to_string()),
            weights,
            night_weights,
            night,
            alpha: env_parse("ALPHA", 1.0_f64).max(0.01),
            beta: env_parse("BETA", 3.0_f64).max(0.01),
            gamma: env_parse("GAMMA", 0.6_f64).max(0.),
            k_routes: env_parse("K_ROUTES", 5_usize).clamp(1, 5),
            coverage_cell_m: env_parse("COVERAGE_CELL_M", 25.0_f64).max(5.),
            feature_timeout: Duration::from_secs(env_parse("FEATURE_TIMEOUT_SECS", 90)),
            crime_timeout: Duration::from_secs(env_parse("CRIME_TIMEOUT_SECS", 8)),
            severity_violent: env_parse("SEVERITY_VIOLENT", 1.0),
            severity_property: env_parse("SEVERITY_PROPERTY", 0.6),
            severity_nuisance: env_parse("SEVERITY_NUISANCE", 0.3),
        }
    }

    /// The weight set in effect right now.
    pub fn active_weights(&self) -> Weights {
        match self.night {
            NightMode::Always => self.night_weights,
            NightMode::Never => self.weights,
            NightMode::Auto => {
                if is_night_utc() {
                    self.night_weights
                } else {
                    self.weights
                }
            }
        }
    }
}

fn is_night_utc() -> bool {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let hour = (secs / 3600) % 24;
    !(6..19).contains(&hour)
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("{key}={raw} could not be parsed, using default");
                default
            }
        },
        Err(_) => default,
    }
}
