use rustc_hash::FxHashMap;

use crate::{
    math::{self, LAT_M_PER_DEGREE},
    model::Point,
};

/// Uniform-cell 2D index over lat/lng. Radius queries enumerate the covering
/// cell window and refine candidates by true distance, so lookups stay O(1)
/// for the cell sizes we use (~55m for nodes, 30-60m feature radii).
#[derive(Debug, Clone)]
pub struct SpatialGrid<T> {
    cell_deg: f64,
    buckets: FxHashMap<(i32, i32), Vec<(Point, T)>>,
    len: usize,
}

impl<T> SpatialGrid<T> {
    pub fn new(cell_deg: f64) -> Self {
        Self {
            cell_deg,
            buckets: FxHashMap::default(),
            len: 0,
        }
    }

    #[inline]
    fn cell_of(&self, p: Point) -> (i32, i32) {
        (
            (p.lat / self.cell_deg).floor() as i32,
            (p.lng / self.cell_deg).floor() as i32,
        )
    }

    pub fn insert(&mut self, loc: Point, item: T) {
        self.buckets
            .entry(self.cell_of(loc))
            .or_default()
            .push((loc, item));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Visits every item within `radius_m` of `center`, in deterministic cell
    /// order (row-major window, insertion order within a bucket). The callback
    /// receives the item's location, the item, and its true distance.
    pub fn for_each_within<'s>(
        &'s self,
        center: Point,
        radius_m: f64,
        mut f: impl FnMut(Point, &'s T, f64),
    ) {
        let lat_cells = (radius_m / (LAT_M_PER_DEGREE * self.cell_deg)).ceil() as i32 + 1;
        let lng_m = math::lng_m_per_degree(center.lat).max(1.);
        let lng_cells = (radius_m / (lng_m * self.cell_deg)).ceil() as i32 + 1;

        let (row, col) = self.cell_of(center);
        for r in (row - lat_cells)..=(row + lat_cells) {
            for c in (col - lng_cells)..=(col + lng_cells) {
                let Some(bucket) = self.buckets.get(&(r, c)) else {
                    continue;
                };
                for (loc, item) in bucket {
                    let dist = math::fast_distance(center, *loc);
                    if dist <= radius_m {
                        f(*loc, item, dist);
                    }
                }
            }
        }
    }

    pub fn count_within(&self, center: Point, radius_m: f64) -> usize {
        let mut count = 0;
        self.for_each_within(center, radius_m, |_, _, _| count += 1);
        count
    }

    /// Nearest item passing `pred`, by true distance. Stable for ties (first
    /// visited wins, and visit order is deterministic).
    pub fn nearest_within<'s>(
        &'s self,
        center: Point,
        radius_m: f64,
        mut pred: impl FnMut(&T) -> bool,
    ) -> Option<(Point, &'s T, f64)> {
        let mut best: Option<(Point, &'s T, f64)> = None;
        self.for_each_within(center, radius_m, |loc, item, dist| {
            if !pred(item) {
                return;
            }
            if best.is_none_or(|(_, _, d)| dist < d) {
                best = Some((loc, item, dist));
            }
        });
        best
    }
}
