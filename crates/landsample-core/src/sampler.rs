//! Stratified Polygon Sampler.
//!
//! Two passes over a region:
//!   1. Grid pass: a jittered sub-grid over the bounding box gives even
//!      spatial coverage (`grid_fraction` of the target, 70 % by default).
//!   2. Random pass: uniform draws with a minimum centre spacing fill the rest
//!      and add statistical independence.
//!
//! Both passes share one attempt budget (`target × 20` by default), so a run
//! always terminates. The grid pass may use only its proportional share of
//! it, and sub-grid cells that miss the region cost no attempts. Running out of attempts is reported as a shortfall in
//! the manifest, never as an error.

use geo::{coord, Area, Intersects, MultiPolygon, Rect};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::coverage::Section;
use crate::error::{Error, ProviderError, Result};
use crate::extent::Extent;
use crate::manifest::{RejectionCounts, SamplePolygon, SamplingManifest, Strategy};
use crate::provider::GeometryProvider;
use crate::region::Region;
use crate::shape::{build_polygon, IrregularParams, Shape};

/// Sampling parameters. Every field has a default so partial JSON configs
/// deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub target_count: usize,
    /// Nominal footprint diameter in metres.
    pub polygon_size_m: f64,
    pub shape: Shape,
    /// Share of `target_count` placed by the grid pass, in `[0, 1]`.
    pub grid_fraction: f64,
    /// Minimum centre distance in the random pass; `None` means twice the
    /// polygon size.
    pub min_spacing_m: Option<f64>,
    /// Candidate evaluation budget; `None` means
    /// `target_count × attempts_per_target`.
    pub max_attempts: Option<usize>,
    pub attempts_per_target: usize,
    /// Provider errors tolerated in a row before the run is aborted.
    pub max_consecutive_provider_failures: usize,
    pub irregular_min_vertices: usize,
    pub irregular_max_vertices: usize,
    pub irregular_angle_jitter_rad: f64,
    pub irregular_radius_jitter: (f64, f64),
    pub circle_segments: usize,
    /// Fixed seed for reproducible runs; entropy when `None`.
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            target_count: 200,
            polygon_size_m: 6.0,
            shape: Shape::Hexagon,
            grid_fraction: 0.7,
            min_spacing_m: None,
            max_attempts: None,
            attempts_per_target: 20,
            max_consecutive_provider_failures: 5,
            irregular_min_vertices: 6,
            irregular_max_vertices: 15,
            irregular_angle_jitter_rad: 0.35,
            irregular_radius_jitter: (0.5, 1.5),
            circle_segments: 32,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.polygon_size_m > 0.0) || !self.polygon_size_m.is_finite() {
            return Err(Error::invalid_parameter(
                "polygon_size_m",
                format!("must be positive, got {}", self.polygon_size_m),
            ));
        }
        if !(0.0..=1.0).contains(&self.grid_fraction) {
            return Err(Error::invalid_parameter(
                "grid_fraction",
                format!("must be in [0, 1], got {}", self.grid_fraction),
            ));
        }
        if let Some(s) = self.min_spacing_m {
            if !(s >= 0.0) {
                return Err(Error::invalid_parameter("min_spacing_m", format!("must be >= 0, got {s}")));
            }
        }
        if self.irregular_min_vertices < 3 || self.irregular_min_vertices > self.irregular_max_vertices {
            return Err(Error::invalid_parameter(
                "irregular_min_vertices",
                format!(
                    "vertex range {}..={} must start at 3 or more and not be empty",
                    self.irregular_min_vertices, self.irregular_max_vertices
                ),
            ));
        }
        let (lo, hi) = self.irregular_radius_jitter;
        if !(lo > 0.0 && lo <= hi) {
            return Err(Error::invalid_parameter(
                "irregular_radius_jitter",
                format!("need 0 < lo <= hi, got ({lo}, {hi})"),
            ));
        }
        if !(self.irregular_angle_jitter_rad >= 0.0) {
            return Err(Error::invalid_parameter(
                "irregular_angle_jitter_rad",
                format!("must be >= 0, got {}", self.irregular_angle_jitter_rad),
            ));
        }
        Ok(())
    }

    pub fn min_spacing(&self) -> f64 {
        self.min_spacing_m.unwrap_or(2.0 * self.polygon_size_m)
    }

    pub fn attempt_budget(&self) -> usize {
        self.max_attempts
            .unwrap_or_else(|| self.target_count.saturating_mul(self.attempts_per_target))
    }

    /// `floor(target × grid_fraction)`; the small epsilon keeps exact
    /// products such as 10 × 0.7 from rounding down to 6.
    pub fn grid_target(&self) -> usize {
        ((self.target_count as f64 * self.grid_fraction) + 1e-9).floor() as usize
    }

    fn irregular_params(&self) -> IrregularParams {
        IrregularParams {
            vertices: self.irregular_min_vertices..=self.irregular_max_vertices,
            angle_jitter: self.irregular_angle_jitter_rad,
            radius_jitter: self.irregular_radius_jitter,
        }
    }
}

/// Polygon count for a section of `area_km2`: about 40 per km² for five
/// land-cover classes, scaled by `classes / 5` and clamped to `[min, max]`.
pub fn recommended_target_count(area_km2: f64, classes: usize, min: usize, max: usize) -> usize {
    let base = (area_km2.max(0.0) * 40.0).floor();
    let adjusted = (base * classes as f64 / 5.0).floor() as usize;
    adjusted.clamp(min, max.max(min))
}

/// Generate sampling polygons inside `region`.
pub fn sample<P>(provider: &P, region: &Region, config: &SamplerConfig) -> Result<SamplingManifest>
where
    P: GeometryProvider + ?Sized,
{
    config.validate()?;
    let area = region.area();
    let bounds = match region.bounds() {
        Some(b) if area > 0.0 => b,
        _ => return Err(Error::EmptyRegion { area }),
    };

    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut run = Run {
        provider,
        region,
        config,
        rng,
        irregular: config.irregular_params(),
        min_spacing: config.min_spacing(),
        max_attempts: config.attempt_budget(),
        polygons: Vec::with_capacity(config.target_count),
        rejections: RejectionCounts::default(),
        attempts: 0,
        consecutive_failures: 0,
    };

    let grid_target = config.grid_target().min(config.target_count);
    info!(
        target = config.target_count,
        grid = grid_target,
        random = config.target_count - grid_target,
        area_m2 = area,
        shape = config.shape.as_str(),
        "sampling region"
    );

    run.grid_pass(&bounds, area, grid_target)?;
    let grid_accepted = run.polygons.len();
    debug!(accepted = grid_accepted, attempts = run.attempts, "grid pass done");

    run.random_pass(&bounds)?;
    debug!(
        accepted = run.polygons.len() - grid_accepted,
        attempts = run.attempts,
        "random pass done"
    );

    let shortfall = config.target_count.saturating_sub(run.polygons.len());
    if shortfall > 0 {
        warn!(
            shortfall,
            accepted = run.polygons.len(),
            target = config.target_count,
            attempts = run.attempts,
            "attempt budget exhausted before reaching target"
        );
    }

    Ok(SamplingManifest {
        target_count: config.target_count,
        grid_target,
        region_area_m2: area,
        attempts: run.attempts,
        max_attempts: run.max_attempts,
        rejections: run.rejections,
        shortfall,
        polygons: run.polygons,
    })
}

/// Sample every section independently. With a fixed seed, the section with id `i` uses
/// `seed ^ i` so results do not depend on scheduling.
pub fn sample_sections<P>(
    provider: &P,
    sections: &[Section],
    config: &SamplerConfig,
) -> Vec<Result<SamplingManifest>>
where
    P: GeometryProvider + Sync + ?Sized,
{
    let run_one = |section: &Section| {
        let mut cfg = config.clone();
        cfg.seed = config.seed.map(|s| s ^ section.id as u64);
        let span = tracing::info_span!("section", id = section.id, cell = %section.cell.label());
        let _guard = span.enter();
        sample(provider, &section.region, &cfg)
    };

    #[cfg(feature = "threading")]
    {
        use rayon::prelude::*;
        sections.par_iter().map(run_one).collect()
    }
    #[cfg(not(feature = "threading"))]
    {
        sections.iter().map(run_one).collect()
    }
}

/// State owned by a single `sample` call.
struct Run<'a, P: ?Sized> {
    provider: &'a P,
    region: &'a Region,
    config: &'a SamplerConfig,
    rng: StdRng,
    irregular: IrregularParams,
    min_spacing: f64,
    max_attempts: usize,
    polygons: Vec<SamplePolygon>,
    rejections: RejectionCounts,
    attempts: usize,
    consecutive_failures: usize,
}

impl<P: GeometryProvider + ?Sized> Run<'_, P> {
    fn budget_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    fn grid_pass(&mut self, bounds: &Extent, area: f64, grid_target: usize) -> Result<()> {
        if grid_target == 0 {
            return Ok(());
        }
        // The grid pass may spend only its proportional share of the budget,
        // so the random pass keeps at least `target - grid_target` attempts.
        let limit = self.max_attempts * grid_target / self.config.target_count.max(1);
        // Enlarge the sub-grid for irregular regions so that roughly
        // `grid_target` cell centres land inside.
        let fill = (area / bounds.area()).clamp(1e-4, 1.0);
        let n = ((grid_target as f64 / fill).sqrt().ceil() as usize).max(1);
        let sx = bounds.width() / n as f64;
        let sy = bounds.height() / n as f64;
        debug!(n, spacing_x = sx, spacing_y = sy, limit, "grid pass sub-grid");

        let region: &Region = self.region;
        let region = region.geometry();
        for r in 0..n {
            let y0 = bounds.ymin + r as f64 * sy;
            let row = Rect::new(coord! { x: bounds.xmin, y: y0 }, coord! { x: bounds.xmax, y: y0 + sy });
            if !region.intersects(&row.to_polygon()) {
                continue;
            }
            for c in 0..n {
                if self.polygons.len() >= grid_target || self.attempts >= limit {
                    return Ok(());
                }
                // Jitter keeps the centre inside its cell, so a cell that
                // misses the region can never yield a sample.
                let x0 = bounds.xmin + c as f64 * sx;
                let cell = Rect::new(coord! { x: x0, y: y0 }, coord! { x: x0 + sx, y: y0 + sy });
                if !region.intersects(&cell.to_polygon()) {
                    continue;
                }
                let jx = self.rng.gen_range(-sx / 4.0..=sx / 4.0);
                let jy = self.rng.gen_range(-sy / 4.0..=sy / 4.0);
                self.evaluate(x0 + 0.5 * sx + jx, y0 + 0.5 * sy + jy, Strategy::Grid)?;
            }
        }
        Ok(())
    }

    fn random_pass(&mut self, bounds: &Extent) -> Result<()> {
        let size = self.config.polygon_size_m;
        // Border buffer of one polygon size, dropped on an axis too narrow for it.
        let bx = if bounds.width() > 2.0 * size { size } else { 0.0 };
        let by = if bounds.height() > 2.0 * size { size } else { 0.0 };

        while self.polygons.len() < self.config.target_count && self.budget_left() {
            let x = self.rng.gen_range(bounds.xmin + bx..=bounds.xmax - bx);
            let y = self.rng.gen_range(bounds.ymin + by..=bounds.ymax - by);
            self.evaluate(x, y, Strategy::Random)?;
        }
        Ok(())
    }

    fn too_close(&self, x: f64, y: f64) -> bool {
        self.polygons.iter().any(|p| p.distance_to(x, y) < self.min_spacing)
    }

    /// Evaluate one candidate centre. Rejections are counted; only an
    /// unavailable provider is an error.
    fn evaluate(&mut self, x: f64, y: f64, strategy: Strategy) -> Result<()> {
        self.attempts += 1;

        if strategy == Strategy::Random && self.too_close(x, y) {
            self.rejections.too_close += 1;
            return Ok(());
        }

        let candidate = match self.try_candidate(x, y, strategy) {
            Ok(c) => {
                self.consecutive_failures = 0;
                c
            }
            Err(e) => return self.provider_failure(e),
        };

        match candidate {
            Candidate::Accepted { geometry, area, clipped } => {
                let ordinal = self.polygons.iter().filter(|p| p.strategy == strategy).count() + 1;
                self.polygons.push(SamplePolygon {
                    id: self.polygons.len() + 1,
                    ordinal,
                    strategy,
                    shape: self.config.shape,
                    center_x: x,
                    center_y: y,
                    size_m: self.config.polygon_size_m,
                    area_m2: area,
                    clipped,
                    geometry,
                });
            }
            Candidate::Outside => self.rejections.outside_region += 1,
            Candidate::NoData => self.rejections.no_data += 1,
            Candidate::Empty => self.rejections.empty_geometry += 1,
        }
        Ok(())
    }

    fn try_candidate(&mut self, x: f64, y: f64, strategy: Strategy) -> std::result::Result<Candidate, ProviderError> {
        let inside = self.provider.contains_point(self.region.geometry(), x, y)?;
        // Grid candidates must sit inside; random ones may straddle the edge.
        if !inside && strategy == Strategy::Grid {
            return Ok(Candidate::Outside);
        }
        if !self.provider.point_has_data(x, y)? {
            return Ok(Candidate::NoData);
        }

        let footprint = build_polygon(
            self.config.shape,
            x,
            y,
            self.config.polygon_size_m,
            self.config.circle_segments,
            &self.irregular,
            &mut self.rng,
        );
        let raw_area = footprint.unsigned_area();
        let footprint = MultiPolygon::new(vec![footprint]);

        let Some(geometry) = self.provider.intersect(self.region.geometry(), &footprint)? else {
            return Ok(if inside { Candidate::Empty } else { Candidate::Outside });
        };
        let area = geometry.unsigned_area();
        if !(area > 0.0) {
            return Ok(Candidate::Empty);
        }
        let clipped = (raw_area - area).abs() > raw_area * 1e-9;
        Ok(Candidate::Accepted { geometry, area, clipped })
    }

    fn provider_failure(&mut self, error: ProviderError) -> Result<()> {
        self.rejections.provider_error += 1;
        self.consecutive_failures += 1;
        warn!(
            consecutive = self.consecutive_failures,
            limit = self.config.max_consecutive_provider_failures,
            error = %error,
            "provider call failed, candidate rejected"
        );
        if self.consecutive_failures > self.config.max_consecutive_provider_failures {
            return Err(Error::ProviderUnavailable {
                failures: self.consecutive_failures,
                source: error,
            });
        }
        Ok(())
    }
}

enum Candidate {
    /// Stored geometry is always the candidate ∩ region.
    Accepted { geometry: MultiPolygon<f64>, area: f64, clipped: bool },
    Outside,
    NoData,
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PlanarProvider;
    use std::cell::Cell;

    fn square_region(side: f64) -> (PlanarProvider, Region) {
        let e = Extent::new(0.0, 0.0, side, side).unwrap();
        (PlanarProvider::for_extent(e), Region::from_extent(&e))
    }

    fn config(target: usize, seed: u64) -> SamplerConfig {
        SamplerConfig { target_count: target, polygon_size_m: 6.0, seed: Some(seed), ..Default::default() }
    }

    #[test]
    fn grid_target_is_floor_of_fraction() {
        assert_eq!(config(10, 0).grid_target(), 7);
        assert_eq!(config(3, 0).grid_target(), 2);
        let all_random = SamplerConfig { grid_fraction: 0.0, ..config(10, 0) };
        assert_eq!(all_random.grid_target(), 0);
    }

    #[test]
    fn same_seed_same_manifest() {
        let (provider, region) = square_region(500.0);
        let a = sample(&provider, &region, &config(40, 99)).unwrap();
        let b = sample(&provider, &region, &config(40, 99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_target_yields_empty_manifest() {
        let (provider, region) = square_region(100.0);
        let m = sample(&provider, &region, &config(0, 1)).unwrap();
        assert_eq!(m.accepted(), 0);
        assert_eq!(m.shortfall, 0);
        assert_eq!(m.attempts, 0);
    }

    #[test]
    fn empty_region_is_an_error() {
        let (provider, _) = square_region(10.0);
        let region = Region::new(MultiPolygon::new(Vec::new()));
        assert!(matches!(sample(&provider, &region, &config(5, 1)), Err(Error::EmptyRegion { .. })));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let (provider, region) = square_region(10.0);
        let bad = SamplerConfig { polygon_size_m: 0.0, ..config(5, 1) };
        assert!(matches!(sample(&provider, &region, &bad), Err(Error::InvalidParameter { .. })));
        let bad = SamplerConfig { grid_fraction: 1.2, ..config(5, 1) };
        assert!(matches!(sample(&provider, &region, &bad), Err(Error::InvalidParameter { .. })));
        let bad = SamplerConfig { irregular_min_vertices: 9, irregular_max_vertices: 8, ..config(5, 1) };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn crowded_region_reports_shortfall() {
        // 30 m square with 12 m spacing fits only a handful of random polygons.
        let (provider, region) = square_region(30.0);
        let cfg = SamplerConfig { grid_fraction: 0.0, ..config(50, 3) };
        let m = sample(&provider, &region, &cfg).unwrap();
        assert!(m.shortfall > 0);
        assert_eq!(m.accepted() + m.shortfall, 50);
        assert_eq!(m.attempts, 1000);
        assert!(m.rejections.too_close > 0);
    }

    /// Data only west of x = 50.
    struct HalfMask;

    impl GeometryProvider for HalfMask {
        fn point_has_data(&self, x: f64, _y: f64) -> std::result::Result<bool, ProviderError> {
            Ok(x < 50.0)
        }
    }

    #[test]
    fn no_data_candidates_are_rejected() {
        let (_, region) = square_region(100.0);
        let m = sample(&HalfMask, &region, &config(30, 5)).unwrap();
        assert!(m.rejections.no_data > 0);
        assert!(m.polygons.iter().all(|p| p.center_x < 50.0));
    }

    /// Every data lookup fails.
    struct Down {
        calls: Cell<usize>,
    }

    impl GeometryProvider for Down {
        fn point_has_data(&self, _x: f64, _y: f64) -> std::result::Result<bool, ProviderError> {
            self.calls.set(self.calls.get() + 1);
            Err(ProviderError::Service { operation: "point_has_data", message: "503".into() })
        }
    }

    #[test]
    fn consecutive_provider_failures_escalate() {
        let (_, region) = square_region(100.0);
        let down = Down { calls: Cell::new(0) };
        let cfg = SamplerConfig { max_consecutive_provider_failures: 3, ..config(10, 2) };
        let err = sample(&down, &region, &cfg).unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { failures: 4, .. }));
        assert_eq!(down.calls.get(), 4);
    }

    /// Fails every other lookup.
    struct Intermittent {
        calls: Cell<usize>,
    }

    impl GeometryProvider for Intermittent {
        fn point_has_data(&self, _x: f64, _y: f64) -> std::result::Result<bool, ProviderError> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n % 2 == 0 {
                Err(ProviderError::Timeout { operation: "point_has_data" })
            } else {
                Ok(true)
            }
        }
    }

    #[test]
    fn isolated_provider_failures_are_rejections() {
        let (_, region) = square_region(200.0);
        let p = Intermittent { calls: Cell::new(0) };
        let m = sample(&p, &region, &config(10, 8)).unwrap();
        assert_eq!(m.accepted(), 10);
        assert!(m.rejections.provider_error >= 10);
    }

    #[test]
    fn recommended_count_is_clamped() {
        assert_eq!(recommended_target_count(0.5, 5, 50, 300), 50);
        assert_eq!(recommended_target_count(3.0, 5, 50, 300), 120);
        assert_eq!(recommended_target_count(3.0, 10, 50, 300), 240);
        assert_eq!(recommended_target_count(100.0, 5, 50, 300), 300);
    }

    #[test]
    fn sections_use_derived_seeds() {
        use crate::coverage::{filter, sections, MinCoverage};
        use crate::grid::partition;

        let e = Extent::new(0.0, 0.0, 400.0, 200.0).unwrap();
        let region = Region::from_extent(&e);
        let cells = partition(&e, 1, 2).unwrap();
        let outcome = filter(&cells, &region, MinCoverage::Ratio(0.5)).unwrap();
        let secs = sections(&region, &outcome.retained);
        let provider = PlanarProvider::for_extent(e);
        let cfg = config(15, 11);

        let manifests: Vec<_> = sample_sections(&provider, &secs, &cfg)
            .into_iter()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(manifests.len(), 2);
        for (section, m) in secs.iter().zip(&manifests) {
            assert_eq!(m.accepted(), 15);
            let b = section.cell.extent;
            assert!(m.polygons.iter().all(|p| b.contains_point(p.center_x, p.center_y)));
        }

        let again = sample(&provider, &secs[1].region, &SamplerConfig { seed: Some(11 ^ 2), ..cfg }).unwrap();
        assert_eq!(again, manifests[1]);
    }

    #[test]
    fn thin_region_leaves_attempts_for_random_pass() {
        // 10 m band along the diagonal of a 1 km box: under 2 % of the bounds.
        let band = geo::Polygon::new(
            vec![(0.0, 0.0), (10.0, 0.0), (1000.0, 990.0), (1000.0, 1000.0), (990.0, 1000.0), (0.0, 10.0), (0.0, 0.0)]
                .into(),
            vec![],
        );
        let region = Region::from_polygon(band);
        let provider = PlanarProvider::for_extent(region.bounds().unwrap());
        let cfg = SamplerConfig { polygon_size_m: 20.0, min_spacing_m: Some(0.0), ..config(40, 6) };
        let m = sample(&provider, &region, &cfg).unwrap();

        assert_eq!(m.shortfall, 0);
        assert_eq!(m.count_by(Strategy::Grid), 28);
        assert_eq!(m.count_by(Strategy::Random), 12);
        assert!(m.attempts <= 800);
        assert!(m.polygons.iter().any(|p| p.center_y > 500.0));
    }
}
