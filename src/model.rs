use std::fmt::{self, Display};

use compact_str::CompactString;
use serde::Serialize;

use crate::math;

/// WGS84 coordinate in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    #[inline]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether the coordinate is usable at all: finite and inside the
    /// lat/lng value range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.
            && self.lng.abs() <= 180.
    }

    #[inline]
    pub fn midpoint(&self, other: Point) -> Point {
        Point::new((self.lat + other.lat) / 2., (self.lng + other.lng) / 2.)
    }

    #[inline]
    pub fn distance_to(&self, other: Point) -> f64 {
        math::fast_distance(*self, other)
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.lat, self.lng)
    }
}

/// Axis-aligned rectangle; `south <= north`, `west <= east`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn is_degenerate(&self) -> bool {
        self.north - self.south < 1e-9 || self.east - self.west < 1e-9
    }

    pub fn width_m(&self) -> f64 {
        let mid_lat = (self.south + self.north) / 2.;
        (self.east - self.west) * math::lng_m_per_degree(mid_lat)
    }

    pub fn height_m(&self) -> f64 {
        (self.north - self.south) * math::LAT_M_PER_DEGREE
    }

    pub fn area_km2(&self) -> f64 {
        (self.width_m() / 1000.) * (self.height_m() / 1000.)
    }

    /// Stable cache key: corners quantized to 1e-4 degrees (~11m), well under
    /// the smallest request buffer.
    pub fn cache_key(&self) -> [i32; 4] {
        [
            (self.south * 1e4).round() as i32,
            (self.west * 1e4).round() as i32,
            (self.north * 1e4).round() as i32,
            (self.east * 1e4).round() as i32,
        ]
    }
}

impl Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.south, self.west, self.north, self.east)
    }
}

/// Road classes pedestrians may traverse. The same enum is used at ingestion
/// and by the scorer so the two can never disagree on what counts as walkable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HighwayClass {
    Trunk,
    Primary,
    Secondary,
    Tertiary,
    Unclassified,
    Residential,
    LivingStreet,
    Pedestrian,
    Footway,
    Cycleway,
    Path,
    Steps,
    Service,
    Track,
}

impl HighwayClass {
    pub fn from_tag(value: &str) -> Option<Self> {
        Some(match value {
            "trunk" => Self::Trunk,
            "primary" => Self::Primary,
            "secondary" => Self::Secondary,
            "tertiary" => Self::Tertiary,
            "unclassified" => Self::Unclassified,
            "residential" => Self::Residential,
            "living_street" => Self::LivingStreet,
            "pedestrian" => Self::Pedestrian,
            "footway" => Self::Footway,
            "cycleway" => Self::Cycleway,
            "path" => Self::Path,
            "steps" => Self::Steps,
            "service" => Self::Service,
            "track" => Self::Track,
            _ => return None,
        })
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trunk => "trunk",
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
            Self::Unclassified => "unclassified",
            Self::Residential => "residential",
            Self::LivingStreet => "living_street",
            Self::Pedestrian => "pedestrian",
            Self::Footway => "footway",
            Self::Cycleway => "cycleway",
            Self::Path => "path",
            Self::Steps => "steps",
            Self::Service => "service",
            Self::Track => "track",
        }
    }

    /// Main road classes carry street lighting and steady foot traffic.
    pub const fn is_main_road(self) -> bool {
        matches!(
            self,
            Self::Trunk | Self::Primary | Self::Secondary | Self::Tertiary
        )
    }

    /// Narrow paths get a wider POI corridor than main roads.
    pub const fn poi_corridor_m(self) -> f64 {
        if self.is_main_road() { 20. } else { 30. }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurfaceType {
    Paved,
    Asphalt,
    Concrete,
    PavingStones,
    Gravel,
    Dirt,
    Ground,
    Grass,
    Sand,
    #[default]
    Unknown,
}

impl SurfaceType {
    pub fn from_tag(value: &str) -> Self {
        match value {
            "paved" => Self::Paved,
            "asphalt" => Self::Asphalt,
            "concrete" | "concrete:plates" | "concrete:lanes" => Self::Concrete,
            "paving_stones" | "sett" | "cobblestone" => Self::PavingStones,
            "gravel" | "fine_gravel" | "pebblestone" | "compacted" | "unpaved" => Self::Gravel,
            "dirt" | "earth" | "mud" => Self::Dirt,
            "ground" => Self::Ground,
            "grass" => Self::Grass,
            "sand" => Self::Sand,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paved => "paved",
            Self::Asphalt => "asphalt",
            Self::Concrete => "concrete",
            Self::PavingStones => "paving_stones",
            Self::Gravel => "gravel",
            Self::Dirt => "dirt",
            Self::Ground => "ground",
            Self::Grass => "grass",
            Self::Sand => "sand",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_unpaved(self) -> bool {
        matches!(
            self,
            Self::Gravel | Self::Dirt | Self::Ground | Self::Grass | Self::Sand
        )
    }
}

/// A walkable way with its geometry and the tag concerns the graph builder
/// cares about. Raw tag bags never leave the features module.
#[derive(Debug, Clone)]
pub struct RoadWay {
    pub geometry: Vec<Point>,
    pub highway: HighwayClass,
    pub name: Option<CompactString>,
    pub has_sidewalk: bool,
    pub surface: SurfaceType,
    pub lit: bool,
}

#[derive(Debug, Clone)]
pub struct Place {
    pub loc: Point,
    pub name: Option<CompactString>,
    pub category: CompactString,
}

#[derive(Debug, Clone)]
pub struct TransitStop {
    pub loc: Point,
    pub name: Option<CompactString>,
}

/// The five classified element sets one combined upstream query yields.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    pub roads: Vec<RoadWay>,
    pub lights: Vec<Point>,
    pub cctv: Vec<Point>,
    pub places: Vec<Place>,
    pub transit: Vec<TransitStop>,
}

impl FeatureSet {
    pub fn element_count(&self) -> usize {
        self.roads.len()
            + self.lights.len()
            + self.cctv.len()
            + self.places.len()
            + self.transit.len()
    }
}

#[derive(Debug, Clone)]
pub struct CrimeIncident {
    pub loc: Point,
    pub category: CompactString,
    pub timestamp: CompactString,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_validity() {
        assert!(Point::new(51.5, -0.1).is_valid());
        assert!(!Point::new(f64::NAN, 0.).is_valid());
        assert!(!Point::new(0., f64::INFINITY).is_valid());
        assert!(!Point::new(91., 0.).is_valid());
        assert!(!Point::new(0., -181.).is_valid());
    }

    #[test]
    fn test_walkable_classes_round_trip() {
        for tag in [
            "trunk",
            "primary",
            "secondary",
            "tertiary",
            "unclassified",
            "residential",
            "living_street",
            "pedestrian",
            "footway",
            "cycleway",
            "path",
            "steps",
            "service",
            "track",
        ] {
            let class = HighwayClass::from_tag(tag).unwrap();
            assert_eq!(class.as_str(), tag);
        }
        assert_eq!(HighwayClass::from_tag("motorway"), None);
        assert_eq!(HighwayClass::from_tag("proposed"), None);
    }

    #[test]
    fn test_surface_penalties() {
        assert!(SurfaceType::from_tag("gravel").is_unpaved());
        assert!(SurfaceType::from_tag("dirt").is_unpaved());
        assert!(!SurfaceType::from_tag("asphalt").is_unpaved());
        // unrecognized surfaces are not penalized
        assert!(!SurfaceType::from_tag("weird_value").is_unpaved());
    }

    #[test]
    fn test_bbox_cache_key_quantizes() {
        let a = BoundingBox {
            south: 51.50001,
            west: -0.10002,
            north: 51.51,
            east: -0.09,
        };
        let b = BoundingBox {
            south: 51.50004,
            west: -0.10003,
            north: 51.51002,
            east: -0.09001,
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_bbox_dimensions() {
        // one degree of latitude is ~111.32km
        let bbox = BoundingBox {
            south: 50.,
            west: 0.,
            north: 51.,
            east: 1.,
        };
        assert!((bbox.height_m() - 111_320.).abs() < 500.);
        // longitude shrinks with cos(lat)
        assert!(bbox.width_m() < bbox.height_m());
    }
}
