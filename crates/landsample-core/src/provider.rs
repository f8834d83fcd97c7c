//! Boundary to the raster/geometry engine.
//!
//! The sampler and the CLI tools only talk to rasters and polygons through
//! [`GeometryProvider`]. Polygon operations have in-process defaults built on
//! `geo`; raster queries (`describe`, `point_has_data`) are what an
//! implementation has to supply.

use geo::{Area, BooleanOps, Contains, MultiPolygon, Point, Polygon};
use tracing::debug;

use crate::error::{Error, ProviderError, Result};
use crate::extent::{Extent, RasterInfo};
use crate::region::Region;

pub trait GeometryProvider {
    /// Extent, spatial reference and cell size of the source this provider
    /// was built for.
    fn describe(&self) -> std::result::Result<RasterInfo, ProviderError> {
        Err(ProviderError::Unsupported { operation: "describe" })
    }

    /// `false` when `(x, y)` falls on no-data or outside the raster.
    fn point_has_data(&self, x: f64, y: f64) -> std::result::Result<bool, ProviderError>;

    /// Polygonised valid-data area of the source.
    fn valid_region(&self) -> std::result::Result<Region, ProviderError> {
        Err(ProviderError::Unsupported { operation: "valid_region" })
    }

    /// Intersection of two polygon sets, `None` when it has no area.
    fn intersect(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> std::result::Result<Option<MultiPolygon<f64>>, ProviderError> {
        let out = a.intersection(b);
        Ok((out.unsigned_area() > 0.0).then_some(out))
    }

    fn union(&self, parts: &[MultiPolygon<f64>]) -> std::result::Result<MultiPolygon<f64>, ProviderError> {
        let mut iter = parts.iter();
        let Some(first) = iter.next() else {
            return Ok(MultiPolygon::new(Vec::new()));
        };
        Ok(iter.fold(first.clone(), |acc, p| acc.union(p)))
    }

    fn contains_point(
        &self,
        region: &MultiPolygon<f64>,
        x: f64,
        y: f64,
    ) -> std::result::Result<bool, ProviderError> {
        Ok(region.contains(&Point::new(x, y)))
    }

    fn overlaps(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> std::result::Result<bool, ProviderError> {
        Ok(self.intersect(a, b)?.is_some())
    }
}

impl<P: GeometryProvider + ?Sized> GeometryProvider for &P {
    fn describe(&self) -> std::result::Result<RasterInfo, ProviderError> {
        (**self).describe()
    }

    fn point_has_data(&self, x: f64, y: f64) -> std::result::Result<bool, ProviderError> {
        (**self).point_has_data(x, y)
    }

    fn valid_region(&self) -> std::result::Result<Region, ProviderError> {
        (**self).valid_region()
    }

    fn intersect(
        &self,
        a: &MultiPolygon<f64>,
        b: &MultiPolygon<f64>,
    ) -> std::result::Result<Option<MultiPolygon<f64>>, ProviderError> {
        (**self).intersect(a, b)
    }

    fn union(&self, parts: &[MultiPolygon<f64>]) -> std::result::Result<MultiPolygon<f64>, ProviderError> {
        (**self).union(parts)
    }

    fn contains_point(
        &self,
        region: &MultiPolygon<f64>,
        x: f64,
        y: f64,
    ) -> std::result::Result<bool, ProviderError> {
        (**self).contains_point(region, x, y)
    }

    fn overlaps(&self, a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> std::result::Result<bool, ProviderError> {
        (**self).overlaps(a, b)
    }
}

/// Provider with data everywhere inside its extent.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanarProvider {
    info: RasterInfo,
}

impl PlanarProvider {
    pub fn new(info: RasterInfo) -> Self {
        Self { info }
    }

    /// One-metre cells over `extent`, unknown spatial reference.
    pub fn for_extent(extent: Extent) -> Self {
        Self::new(RasterInfo {
            extent,
            spatial_ref: "unknown".to_string(),
            cell_size: (1.0, 1.0),
        })
    }
}

impl GeometryProvider for PlanarProvider {
    fn describe(&self) -> std::result::Result<RasterInfo, ProviderError> {
        Ok(self.info.clone())
    }

    fn point_has_data(&self, x: f64, y: f64) -> std::result::Result<bool, ProviderError> {
        Ok(self.info.extent.contains_point(x, y))
    }

    fn valid_region(&self) -> std::result::Result<Region, ProviderError> {
        Ok(Region::from_extent(&self.info.extent))
    }
}

/// Single-band validity grid: `true` where the raster has data.
///
/// Row 0 is the northern edge (raster storage order).
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMask {
    info: RasterInfo,
    width: usize,
    height: usize,
    valid: Vec<bool>,
}

impl RasterMask {
    pub fn new(extent: Extent, spatial_ref: impl Into<String>, width: usize, height: usize, valid: Vec<bool>) -> Result<Self> {
        extent.validate()?;
        if width == 0 || height == 0 {
            return Err(Error::invalid_parameter("mask", format!("empty raster ({width} x {height})")));
        }
        if valid.len() != width * height {
            return Err(Error::invalid_parameter(
                "mask",
                format!("{} values for a {width} x {height} raster", valid.len()),
            ));
        }
        let cell_size = (extent.width() / width as f64, extent.height() / height as f64);
        Ok(Self {
            info: RasterInfo { extent, spatial_ref: spatial_ref.into(), cell_size },
            width,
            height,
            valid,
        })
    }

    /// Build from decoded pixel values; NaN and `nodata` are invalid.
    pub fn from_values(
        extent: Extent,
        spatial_ref: impl Into<String>,
        width: usize,
        height: usize,
        values: &[f64],
        nodata: Option<f64>,
    ) -> Result<Self> {
        let valid = values
            .iter()
            .map(|&v| !v.is_nan() && nodata.map_or(true, |nd| v != nd))
            .collect();
        Self::new(extent, spatial_ref, width, height, valid)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    pub fn valid_fraction(&self) -> f64 {
        self.valid_count() as f64 / self.valid.len() as f64
    }

    #[inline]
    fn pixel_index(&self, x: f64, y: f64) -> Option<usize> {
        let e = &self.info.extent;
        if !e.contains_point(x, y) {
            return None;
        }
        let col = (((x - e.xmin) / self.info.cell_size.0) as usize).min(self.width - 1);
        let row = (((e.ymax - y) / self.info.cell_size.1) as usize).min(self.height - 1);
        Some(row * self.width + col)
    }

    fn pixel_x(&self, col: usize) -> f64 {
        let e = &self.info.extent;
        if col >= self.width {
            e.xmax
        } else {
            e.xmin + col as f64 * self.info.cell_size.0
        }
    }

    fn pixel_y(&self, row: usize) -> f64 {
        let e = &self.info.extent;
        if row >= self.height {
            e.ymin
        } else {
            e.ymax - row as f64 * self.info.cell_size.1
        }
    }

    /// Polygonise the valid pixels into a dissolved region.
    ///
    /// Runs of valid pixels are collected per row, identical runs in
    /// consecutive rows are stacked into one rectangle, then all rectangles
    /// are unioned.
    pub fn raster_to_polygon(&self) -> Region {
        // (col_start, col_end, row_start) for rectangles still growing downward.
        let mut open: Vec<(usize, usize, usize)> = Vec::new();
        let mut rects: Vec<Polygon<f64>> = Vec::new();

        for row in 0..=self.height {
            let runs = if row < self.height { self.row_runs(row) } else { Vec::new() };
            let mut next_open = Vec::with_capacity(runs.len());
            for &(c0, c1) in &runs {
                match open.iter().position(|&(o0, o1, _)| o0 == c0 && o1 == c1) {
                    Some(i) => next_open.push(open.swap_remove(i)),
                    None => next_open.push((c0, c1, row)),
                }
            }
            for (c0, c1, r0) in open.drain(..) {
                rects.push(self.block(c0, c1, r0, row));
            }
            open = next_open;
        }

        debug!(rectangles = rects.len(), "mask polygonised");
        Region::dissolve(rects)
    }

    fn row_runs(&self, row: usize) -> Vec<(usize, usize)> {
        let line = &self.valid[row * self.width..(row + 1) * self.width];
        let mut runs = Vec::new();
        let mut start = None;
        for (c, &v) in line.iter().enumerate() {
            match (v, start) {
                (true, None) => start = Some(c),
                (false, Some(s)) => {
                    runs.push((s, c));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push((s, self.width));
        }
        runs
    }

    /// Rectangle over columns `c0..c1` and rows `r0..r1`.
    fn block(&self, c0: usize, c1: usize, r0: usize, r1: usize) -> Polygon<f64> {
        Extent {
            xmin: self.pixel_x(c0),
            xmax: self.pixel_x(c1),
            ymin: self.pixel_y(r1),
            ymax: self.pixel_y(r0),
        }
        .to_polygon()
    }
}

impl GeometryProvider for RasterMask {
    fn describe(&self) -> std::result::Result<RasterInfo, ProviderError> {
        Ok(self.info.clone())
    }

    fn point_has_data(&self, x: f64, y: f64) -> std::result::Result<bool, ProviderError> {
        Ok(self.pixel_index(x, y).is_some_and(|i| self.valid[i]))
    }

    fn valid_region(&self) -> std::result::Result<Region, ProviderError> {
        Ok(self.raster_to_polygon())
    }
}
