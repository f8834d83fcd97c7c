//! Sampling footprint geometry.

use std::f64::consts::TAU;
use std::ops::RangeInclusive;

use geo::{Coord, LineString, Polygon};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Square,
    Hexagon,
    Circle,
    /// Jittered star-shaped polygon with a random vertex count.
    Irregular,
}

impl Shape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Square => "square",
            Shape::Hexagon => "hexagon",
            Shape::Circle => "circle",
            Shape::Irregular => "irregular",
        }
    }
}

impl std::str::FromStr for Shape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "square" => Ok(Shape::Square),
            "hexagon" | "hex" => Ok(Shape::Hexagon),
            "circle" => Ok(Shape::Circle),
            "irregular" | "irregular-jittered" => Ok(Shape::Irregular),
            other => Err(format!("unknown shape `{other}` (square, hexagon, circle, irregular)")),
        }
    }
}

/// Jitter bounds for [`Shape::Irregular`].
#[derive(Debug, Clone, PartialEq)]
pub struct IrregularParams {
    pub vertices: RangeInclusive<usize>,
    /// Max angular offset per vertex, radians.
    pub angle_jitter: f64,
    /// Radius multiplier range `(lo, hi)` applied per vertex.
    pub radius_jitter: (f64, f64),
}

impl Default for IrregularParams {
    fn default() -> Self {
        Self {
            vertices: 6..=15,
            angle_jitter: 0.35,
            radius_jitter: (0.5, 1.5),
        }
    }
}

/// Regular polygon with `n` vertices at `radius` around the centre, starting
/// at angle `phase`. The ring is closed.
pub fn regular_polygon(cx: f64, cy: f64, radius: f64, n: usize, phase: f64) -> Polygon<f64> {
    let step = TAU / n as f64;
    let coords: Vec<Coord<f64>> = (0..n)
        .map(|i| {
            let a = phase + i as f64 * step;
            Coord { x: cx + radius * a.cos(), y: cy + radius * a.sin() }
        })
        .collect();
    close_ring(coords)
}

/// Star-shaped polygon: vertex `i` sits near angle `i·2π/K` at a jittered
/// radius. Angles are wrapped into `[0, 2π)` and sorted, so the ring goes
/// around the centre once and never crosses itself.
pub fn irregular_polygon<R: Rng + ?Sized>(
    cx: f64,
    cy: f64,
    radius: f64,
    params: &IrregularParams,
    rng: &mut R,
) -> Polygon<f64> {
    let k = rng.gen_range(params.vertices.clone()).max(3);
    let step = TAU / k as f64;
    let (lo, hi) = params.radius_jitter;

    let mut polar: Vec<(f64, f64)> = (0..k)
        .map(|i| {
            let jitter = if params.angle_jitter > 0.0 {
                rng.gen_range(-params.angle_jitter..=params.angle_jitter)
            } else {
                0.0
            };
            let scale = rng.gen_range(lo..=hi);
            ((i as f64 * step + jitter).rem_euclid(TAU), radius * scale)
        })
        .collect();
    polar.sort_by(|a, b| a.0.total_cmp(&b.0));

    let coords = polar
        .into_iter()
        .map(|(a, r)| Coord { x: cx + r * a.cos(), y: cy + r * a.sin() })
        .collect();
    close_ring(coords)
}

fn close_ring(mut coords: Vec<Coord<f64>>) -> Polygon<f64> {
    if let Some(&first) = coords.first() {
        coords.push(first);
    }
    Polygon::new(LineString::new(coords), Vec::new())
}

/// Footprint of nominal size `size` (diameter) centred on `(cx, cy)`.
pub fn build_polygon<R: Rng + ?Sized>(
    shape: Shape,
    cx: f64,
    cy: f64,
    size: f64,
    circle_segments: usize,
    irregular: &IrregularParams,
    rng: &mut R,
) -> Polygon<f64> {
    let radius = size / 2.0;
    match shape {
        Shape::Square => regular_polygon(cx, cy, radius, 4, TAU / 8.0),
        Shape::Hexagon => regular_polygon(cx, cy, radius, 6, 0.0),
        Shape::Circle => regular_polygon(cx, cy, radius, circle_segments.max(8), 0.0),
        Shape::Irregular => irregular_polygon(cx, cy, radius, irregular, rng),
    }
}
