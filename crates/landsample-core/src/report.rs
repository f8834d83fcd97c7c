//! Summary statistics for sampling runs.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::manifest::{RejectionCounts, SamplingManifest, Strategy};

/// Density below which labelled accuracy suffers (polygons per km²).
const LOW_DENSITY_PER_KM2: f64 = 20.0;
/// Density above which the section is likely over-sampled.
const HIGH_DENSITY_PER_KM2: f64 = 100.0;
/// Land-cover classes a labelling team is expected to distinguish.
const RECOMMENDED_CLASSES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DensityRating {
    Low,
    Adequate,
    High,
}

impl DensityRating {
    pub fn from_density(per_km2: f64) -> Self {
        if per_km2 < LOW_DENSITY_PER_KM2 {
            DensityRating::Low
        } else if per_km2 > HIGH_DENSITY_PER_KM2 {
            DensityRating::High
        } else {
            DensityRating::Adequate
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            DensityRating::Low => "low density, consider more polygons",
            DensityRating::Adequate => "density adequate for classification",
            DensityRating::High => "high density, likely over-sampled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub target: usize,
    pub accepted: usize,
    pub shortfall: usize,
    pub grid_count: usize,
    pub random_count: usize,
    pub region_area_km2: f64,
    pub density_per_km2: f64,
    pub density: DensityRating,
    pub attempts: usize,
    pub rejections: RejectionCounts,
    pub total_rejections: usize,
    /// Rejected share of evaluated candidates.
    pub rejection_rate: f64,
    /// Polygons available per land-cover class if split evenly.
    pub min_per_class: usize,
}

/// Summarise a manifest. Pure; writing the report is the caller's job.
pub fn emit(manifest: &SamplingManifest) -> Report {
    let accepted = manifest.accepted();
    let region_area_km2 = manifest.region_area_m2 / 1_000_000.0;
    let density_per_km2 = if region_area_km2 > 0.0 { accepted as f64 / region_area_km2 } else { 0.0 };
    let total_rejections = manifest.rejections.total();

    Report {
        target: manifest.target_count,
        accepted,
        shortfall: manifest.shortfall,
        grid_count: manifest.count_by(Strategy::Grid),
        random_count: manifest.count_by(Strategy::Random),
        region_area_km2,
        density_per_km2,
        density: DensityRating::from_density(density_per_km2),
        attempts: manifest.attempts,
        rejections: manifest.rejections,
        total_rejections,
        rejection_rate: if manifest.attempts > 0 {
            total_rejections as f64 / manifest.attempts as f64
        } else {
            0.0
        },
        min_per_class: accepted / RECOMMENDED_CLASSES,
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Accepted polygons: {} / {} (shortfall {})", self.accepted, self.target, self.shortfall)?;
        writeln!(f, "  grid-based: {} ({:.1}%)", self.grid_count, pct(self.grid_count, self.accepted))?;
        writeln!(f, "  random:     {} ({:.1}%)", self.random_count, pct(self.random_count, self.accepted))?;
        writeln!(f, "Region area: {:.3} km²", self.region_area_km2)?;
        writeln!(f, "Density: {:.1} polygons/km² ({})", self.density_per_km2, self.density.advice())?;
        writeln!(
            f,
            "Candidates: {} evaluated, {} rejected ({:.1}%)",
            self.attempts,
            self.total_rejections,
            self.rejection_rate * 100.0
        )?;
        for (reason, count) in self.rejections.breakdown() {
            if count > 0 {
                writeln!(f, "  {reason}: {count}")?;
            }
        }
        write!(f, "Polygons per class ({RECOMMENDED_CLASSES} classes): {}", self.min_per_class)
    }
}

/// Totals across several sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sections: usize,
    pub total_area_km2: f64,
    pub total_polygons: usize,
    pub total_shortfall: usize,
    pub average_density_per_km2: f64,
    pub per_section: Vec<(String, Report)>,
}

pub fn summarize(reports: &[(String, Report)]) -> RunSummary {
    let total_area_km2: f64 = reports.iter().map(|(_, r)| r.region_area_km2).sum();
    let total_polygons = reports.iter().map(|(_, r)| r.accepted).sum();
    RunSummary {
        sections: reports.len(),
        total_area_km2,
        total_polygons,
        total_shortfall: reports.iter().map(|(_, r)| r.shortfall).sum(),
        average_density_per_km2: if total_area_km2 > 0.0 { total_polygons as f64 / total_area_km2 } else { 0.0 },
        per_section: reports.to_vec(),
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total sections: {}", self.sections)?;
        writeln!(f, "Total area: {:.2} km²", self.total_area_km2)?;
        writeln!(f, "Total polygons: {} (shortfall {})", self.total_polygons, self.total_shortfall)?;
        writeln!(f, "Average density: {:.1} polygons/km²", self.average_density_per_km2)?;
        for (name, r) in &self.per_section {
            write!(
                f,
                "\n{name}: {:.2} km², {} polygons, {:.1}/km²",
                r.region_area_km2, r.accepted, r.density_per_km2
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SamplePolygon;
    use crate::shape::Shape;
    use approx::assert_relative_eq;
    use geo::MultiPolygon;

    fn polygon(id: usize, strategy: Strategy) -> SamplePolygon {
        SamplePolygon {
            id,
            ordinal: id,
            strategy,
            shape: Shape::Square,
            center_x: 0.0,
            center_y: 0.0,
            size_m: 5.0,
            area_m2: 12.5,
            clipped: false,
            geometry: MultiPolygon::new(Vec::new()),
        }
    }

    fn manifest() -> SamplingManifest {
        let mut polygons: Vec<_> = (1..=7).map(|i| polygon(i, Strategy::Grid)).collect();
        polygons.extend((8..=12).map(|i| polygon(i, Strategy::Random)));
        SamplingManifest {
            polygons,
            target_count: 15,
            grid_target: 10,
            region_area_m2: 250_000.0,
            attempts: 40,
            max_attempts: 300,
            rejections: RejectionCounts { outside_region: 20, too_close: 8, ..Default::default() },
            shortfall: 3,
        }
    }

    #[test]
    fn emit_counts_and_density() {
        let r = emit(&manifest());
        assert_eq!((r.accepted, r.grid_count, r.random_count, r.shortfall), (12, 7, 5, 3));
        assert_relative_eq!(r.region_area_km2, 0.25);
        assert_relative_eq!(r.density_per_km2, 48.0);
        assert_eq!(r.density, DensityRating::Adequate);
        assert_eq!(r.total_rejections, 28);
        assert_relative_eq!(r.rejection_rate, 0.7);
        assert_eq!(r.min_per_class, 2);
    }

    #[test]
    fn density_ratings() {
        assert_eq!(DensityRating::from_density(5.0), DensityRating::Low);
        assert_eq!(DensityRating::from_density(20.0), DensityRating::Adequate);
        assert_eq!(DensityRating::from_density(100.5), DensityRating::High);
    }

    #[test]
    fn display_lists_nonzero_rejections() {
        let text = emit(&manifest()).to_string();
        assert!(text.contains("Accepted polygons: 12 / 15 (shortfall 3)"));
        assert!(text.contains("outside_region: 20"));
        assert!(!text.contains("no_data"));
    }

    #[test]
    fn summary_aggregates_sections() {
        let r = emit(&manifest());
        let s = summarize(&[("A".into(), r.clone()), ("B".into(), r)]);
        assert_eq!(s.total_polygons, 24);
        assert_eq!(s.total_shortfall, 6);
        assert_relative_eq!(s.total_area_km2, 0.5);
        assert_relative_eq!(s.average_density_per_km2, 48.0);
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"average_density_per_km2\":48.0"));
    }
}
