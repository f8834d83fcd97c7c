use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::shape::Shape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Jittered sub-grid placement.
    Grid,
    /// Uniform random placement with minimum spacing.
    Random,
}

impl Strategy {
    /// Same spelling serde writes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Grid => "grid",
            Strategy::Random => "random",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            Strategy::Grid => "grid",
            Strategy::Random => "rand",
        }
    }
}

/// One accepted sampling footprint. `geometry` lies inside the sampled
/// region and `area_m2` is always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplePolygon {
    /// 1-based, in acceptance order across both strategies.
    pub id: usize,
    /// 1-based ordinal within its strategy.
    pub ordinal: usize,
    pub strategy: Strategy,
    pub shape: Shape,
    pub center_x: f64,
    pub center_y: f64,
    pub size_m: f64,
    pub area_m2: f64,
    /// True when the footprint crossed the region edge and was cut to it.
    pub clipped: bool,
    pub geometry: MultiPolygon<f64>,
}

impl SamplePolygon {
    /// `grid_007`, `rand_012`, ...
    pub fn label(&self) -> String {
        format!("{}_{:03}", self.strategy.prefix(), self.ordinal)
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.center_x - x).hypot(self.center_y - y)
    }
}

/// Per-reason count of rejected candidates. Every evaluated candidate ends
/// up either accepted or in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub outside_region: usize,
    pub no_data: usize,
    pub too_close: usize,
    pub empty_geometry: usize,
    pub provider_error: usize,
}

impl RejectionCounts {
    pub fn total(&self) -> usize {
        self.outside_region + self.no_data + self.too_close + self.empty_geometry + self.provider_error
    }

    /// `(reason, count)` pairs in a fixed order, for reports.
    pub fn breakdown(&self) -> [(&'static str, usize); 5] {
        [
            ("outside_region", self.outside_region),
            ("no_data", self.no_data),
            ("too_close", self.too_close),
            ("empty_geometry", self.empty_geometry),
            ("provider_error", self.provider_error),
        ]
    }
}

/// Result of one `sample` call. Built once, never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingManifest {
    pub polygons: Vec<SamplePolygon>,
    pub target_count: usize,
    /// Share of the target assigned to the grid pass.
    pub grid_target: usize,
    pub region_area_m2: f64,
    /// Candidates evaluated across both passes.
    pub attempts: usize,
    pub max_attempts: usize,
    pub rejections: RejectionCounts,
    /// `target_count - accepted`; non-zero when the attempt budget ran out.
    pub shortfall: usize,
}

impl SamplingManifest {
    pub fn accepted(&self) -> usize {
        self.polygons.len()
    }

    pub fn count_by(&self, strategy: Strategy) -> usize {
        self.polygons.iter().filter(|p| p.strategy == strategy).count()
    }

    pub fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}
