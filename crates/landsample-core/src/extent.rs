use geo::{Coord, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Axis-aligned bounding box in projected map units (metres).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    /// Checked constructor: both sides must be finite and strictly positive.
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        let extent = Self { xmin, ymin, xmax, ymax };
        extent.validate()?;
        Ok(extent)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.xmin, self.ymin, self.xmax, self.ymax].iter().all(|v| v.is_finite());
        if !finite {
            return Err(Error::invalid_extent(format!("non-finite bounds {self:?}")));
        }
        if self.xmax <= self.xmin || self.ymax <= self.ymin {
            return Err(Error::invalid_extent(format!(
                "degenerate extent {self:?} (width {}, height {})",
                self.width(),
                self.height()
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }

    /// True if the two boxes share interior area (touching edges do not count).
    pub fn intersects(&self, other: &Extent) -> bool {
        self.xmin < other.xmax && self.xmax > other.xmin && self.ymin < other.ymax && self.ymax > other.ymin
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.xmin && x <= self.xmax && y >= self.ymin && y <= self.ymax
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(Coord { x: self.xmin, y: self.ymin }, Coord { x: self.xmax, y: self.ymax })
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.to_polygon()])
    }
}

impl From<Rect<f64>> for Extent {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            xmin: rect.min().x,
            ymin: rect.min().y,
            xmax: rect.max().x,
            ymax: rect.max().y,
        }
    }
}

/// What `describe` reports about a raster source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub extent: Extent,
    /// Opaque identifier such as `"EPSG:26917"`; never interpreted here.
    pub spatial_ref: String,
    /// Pixel size `(x, y)` in map units.
    pub cell_size: (f64, f64),
}

impl RasterInfo {
    /// Raster dimensions in whole pixels.
    pub fn dimensions(&self) -> (usize, usize) {
        let w = (self.extent.width() / self.cell_size.0).round() as usize;
        let h = (self.extent.height() / self.cell_size.1).round() as usize;
        (w, h)
    }
}
