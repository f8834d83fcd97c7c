use geo::{Area, BooleanOps, BoundingRect, Contains, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::extent::Extent;

/// The area of valid data: a polygon set, possibly irregular and with holes.
///
/// Regions are built once by the caller and only queried afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    geometry: MultiPolygon<f64>,
}

impl Region {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self { geometry }
    }

    pub fn from_polygon(polygon: Polygon<f64>) -> Self {
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_extent(extent: &Extent) -> Self {
        Self::new(extent.to_multi_polygon())
    }

    /// Union of sub-polygons, e.g. the per-pixel polygons of a validity mask.
    pub fn dissolve<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Polygon<f64>>,
    {
        let geometry = parts
            .into_iter()
            .map(|p| MultiPolygon::new(vec![p]))
            .fold(MultiPolygon::new(Vec::new()), |acc, part| {
                if acc.0.is_empty() {
                    part
                } else {
                    acc.union(&part)
                }
            });
        Self::new(geometry)
    }

    pub fn geometry(&self) -> &MultiPolygon<f64> {
        &self.geometry
    }

    pub fn into_geometry(self) -> MultiPolygon<f64> {
        self.geometry
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty() || self.area() <= 0.0
    }

    /// Bounding box, or `None` for an empty or zero-width region.
    pub fn bounds(&self) -> Option<Extent> {
        let extent = Extent::from(self.geometry.bounding_rect()?);
        extent.validate().ok().map(|_| extent)
    }

    /// Strict interior test; points on the boundary are outside.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.geometry.contains(&Point::new(x, y))
    }

    /// Part of `geometry` inside this region.
    pub fn clip(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        self.geometry.intersection(geometry)
    }

    pub fn intersection_area(&self, extent: &Extent) -> f64 {
        match self.bounds() {
            Some(bounds) if bounds.intersects(extent) => {
                self.clip(&extent.to_multi_polygon()).unsigned_area()
            }
            _ => 0.0,
        }
    }
}

impl From<MultiPolygon<f64>> for Region {
    fn from(geometry: MultiPolygon<f64>) -> Self {
        Self::new(geometry)
    }
}
