use crate::{
    crime,
    math::{self, LAT_M_PER_DEGREE},
    model::{BoundingBox, CrimeIncident, Point},
};

/// How far a single lamp meaningfully throws light.
pub const LIGHT_RADIUS_M: f64 = 40.;
/// Falloff scale for the inverse-distance lighting kernel.
const LIGHT_D0_M: f64 = 10.;

/// Incidents influence cells out to this radius.
pub const CRIME_RADIUS_M: f64 = 60.;
/// Sigma of the Gaussian spread applied to each incident.
const CRIME_SIGMA_M: f64 = 25.;

/// Dense f32 raster over the request bbox. Both per-request instances
/// (lighting intensity and crime density) are stamped once at graph build and
/// then queried by nearest cell from edge midpoints.
#[derive(Debug, Clone)]
pub struct CoverageMap {
    south: f64,
    west: f64,
    rows: usize,
    cols: usize,
    lat_step_deg: f64,
    lng_step_deg: f64,
    data: Vec<f32>,
}

impl CoverageMap {
    pub fn new(bbox: &BoundingBox, cell_m: f64) -> Self {
        let mid_lat = (bbox.south + bbox.north) / 2.;
        let lat_step_deg = cell_m / LAT_M_PER_DEGREE;
        let lng_step_deg = cell_m / math::lng_m_per_degree(mid_lat).max(1.);

        let rows = (((bbox.north - bbox.south) / lat_step_deg).ceil() as usize).max(1);
        let cols = (((bbox.east - bbox.west) / lng_step_deg).ceil() as usize).max(1);

        Self {
            south: bbox.south,
            west: bbox.west,
            rows,
            cols,
            lat_step_deg,
            lng_step_deg,
            data: vec![0.; rows * cols],
        }
    }

    pub fn cells(&self) -> usize {
        self.data.len()
    }

    #[inline]
    fn cell_center(&self, row: usize, col: usize) -> Point {
        Point::new(
            self.south + (row as f64 + 0.5) * self.lat_step_deg,
            self.west + (col as f64 + 0.5) * self.lng_step_deg,
        )
    }

    /// Nearest-cell lookup; points outside the raster clamp to the border.
    pub fn value_at(&self, p: Point) -> f32 {
        let row = (((p.lat - self.south) / self.lat_step_deg) as i64)
            .clamp(0, self.rows as i64 - 1) as usize;
        let col = (((p.lng - self.west) / self.lng_step_deg) as i64)
            .clamp(0, self.cols as i64 - 1) as usize;
        self.data[row * self.cols + col]
    }

    /// Adds `contrib(distance)` to every cell whose center lies within
    /// `radius_m` of `center`. Iteration is row-major, so summation order is
    /// fixed regardless of stamp order within one source.
    pub fn stamp(&mut self, center: Point, radius_m: f64, mut contrib: impl FnMut(f64) -> f32) {
        let row_span = (radius_m / (self.lat_step_deg * LAT_M_PER_DEGREE)).ceil() as i64 + 1;
        let lng_m = math::lng_m_per_degree(center.lat).max(1.);
        let col_span = (radius_m / (self.lng_step_deg * lng_m)).ceil() as i64 + 1;

        let center_row = ((center.lat - self.south) / self.lat_step_deg) as i64;
        let center_col = ((center.lng - self.west) / self.lng_step_deg) as i64;

        let row_lo = (center_row - row_span).max(0) as usize;
        let row_hi = ((center_row + row_span).max(0) as usize).min(self.rows.saturating_sub(1));
        let col_lo = (center_col - col_span).max(0) as usize;
        let col_hi = ((center_col + col_span).max(0) as usize).min(self.cols.saturating_sub(1));

        if center_row + row_span < 0 || center_col + col_span < 0 {
            return;
        }

        for row in row_lo..=row_hi {
            for col in col_lo..=col_hi {
                let d = math::fast_distance(self.cell_center(row, col), center);
                if d <= radius_m {
                    self.data[row * self.cols + col] += contrib(d);
                }
            }
        }
    }
}

/// Lighting intensity: each source stamps `1/(1 + d/d0)^2`, summed over
/// sources. Units are arbitrary; the scorer saturates them into [0,1].
pub fn build_lighting(bbox: &BoundingBox, cell_m: f64, sources: &[Point]) -> CoverageMap {
    let mut map = CoverageMap::new(bbox, cell_m);
    for source in sources {
        map.stamp(*source, LIGHT_RADIUS_M, |d| {
            let falloff = 1. + d / LIGHT_D0_M;
            (1. / (falloff * falloff)) as f32
        });
    }
    map
}

/// Crime density: severity-weighted Gaussian spread per incident.
pub fn build_crime_density(
    bbox: &BoundingBox,
    cell_m: f64,
    crimes: &[CrimeIncident],
) -> CoverageMap {
    let mut map = CoverageMap::new(bbox, cell_m);
    let two_sigma_sqr = 2. * CRIME_SIGMA_M * CRIME_SIGMA_M;
    for incident in crimes {
        let weight = crime::severity(&incident.category);
        map.stamp(incident.loc, CRIME_RADIUS_M, |d| {
            (weight * (-d * d / two_sigma_sqr).exp()) as f32
        });
    }
    map
}
