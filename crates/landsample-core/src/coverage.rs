//! Coverage Filter: keep only grid cells with enough valid data.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::grid::GridCell;
use crate::region::Region;

/// Minimum intersection a cell needs to be kept. The comparison is strict:
/// a cell is retained only if its coverage exceeds the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinCoverage {
    /// Absolute area in square metres.
    Absolute(f64),
    /// Fraction of the cell's own area, in `[0, 1]`.
    Ratio(f64),
}

impl MinCoverage {
    pub fn km2(km2: f64) -> Self {
        MinCoverage::Absolute(km2 * 1_000_000.0)
    }

    fn threshold_for(&self, cell: &GridCell) -> f64 {
        match *self {
            MinCoverage::Absolute(area) => area,
            MinCoverage::Ratio(ratio) => ratio * cell.extent.area(),
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            MinCoverage::Absolute(a) if !(a >= 0.0) || !a.is_finite() => {
                Err(Error::invalid_parameter("min_coverage", format!("absolute area must be >= 0, got {a}")))
            }
            MinCoverage::Ratio(r) if !(0.0..=1.0).contains(&r) => {
                Err(Error::invalid_parameter("min_coverage", format!("ratio must be in [0, 1], got {r}")))
            }
            _ => Ok(()),
        }
    }
}

impl Default for MinCoverage {
    /// One square kilometre of imagery.
    fn default() -> Self {
        MinCoverage::km2(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    /// No overlap with the region at all.
    Outside,
    /// Some overlap, but not above the threshold.
    BelowThreshold,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Outside => "outside",
            RejectReason::BelowThreshold => "below-threshold",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageOutcome {
    /// Kept cells, in input order, with `coverage_area` set.
    pub retained: Vec<GridCell>,
    pub rejected: Vec<(GridCell, RejectReason)>,
}

impl CoverageOutcome {
    /// `(outside, below_threshold)` counts.
    pub fn rejection_counts(&self) -> (usize, usize) {
        self.rejected.iter().fold((0, 0), |(out, low), (_, reason)| match reason {
            RejectReason::Outside => (out + 1, low),
            RejectReason::BelowThreshold => (out, low + 1),
        })
    }
}

/// Relative area under which an intersection counts as empty (sliver noise
/// from the boolean ops on shared edges).
const ZERO_AREA_EPS: f64 = 1e-12;

/// Measure every cell against `region` and split into retained and rejected.
pub fn filter(cells: &[GridCell], region: &Region, min: MinCoverage) -> Result<CoverageOutcome> {
    min.validate()?;
    let mut outcome = CoverageOutcome::default();

    for cell in cells {
        let area = region.intersection_area(&cell.extent);
        let mut measured = *cell;
        measured.coverage_area = area;

        if area <= cell.extent.area() * ZERO_AREA_EPS {
            measured.coverage_area = 0.0;
            debug!(cell = %cell.label(), "cell outside region");
            outcome.rejected.push((measured, RejectReason::Outside));
        } else if area <= min.threshold_for(cell) {
            debug!(cell = %cell.label(), area, "cell below coverage threshold");
            outcome.rejected.push((measured, RejectReason::BelowThreshold));
        } else {
            outcome.retained.push(measured);
        }
    }

    let (outside, low) = outcome.rejection_counts();
    info!(retained = outcome.retained.len(), outside, below_threshold = low, "coverage filter done");
    Ok(outcome)
}

/// A retained cell together with the part of the region inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// 1-based, in retained order.
    pub id: usize,
    pub cell: GridCell,
    pub region: Region,
}

/// Clip each retained cell to `region`, giving the irregular per-section
/// domains handed to the sampler.
pub fn sections(region: &Region, retained: &[GridCell]) -> Vec<Section> {
    retained
        .iter()
        .enumerate()
        .map(|(i, cell)| Section {
            id: i + 1,
            cell: *cell,
            region: Region::new(region.clip(&cell.extent.to_multi_polygon())),
        })
        .collect()
}
