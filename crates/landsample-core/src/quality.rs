//! Tile-level quality checks on decoded pixel buffers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileVerdict {
    /// Every pixel is no-data.
    Empty,
    /// Some no-data pixels.
    Partial,
    Valid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileStats {
    pub pixel_count: usize,
    pub nodata_count: usize,
    /// Statistics over valid pixels only; `None` for an empty tile.
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

impl TileStats {
    /// Single-band values. NaN always counts as no-data, `nodata`
    /// additionally when given.
    pub fn from_pixels<I>(values: I, nodata: Option<f64>) -> Self
    where
        I: IntoIterator<Item = f64>,
    {
        let mut acc = Moments::default();
        for v in values {
            acc.pixel_count += 1;
            if v.is_nan() || nodata == Some(v) {
                acc.nodata_count += 1;
            } else {
                acc.push(v);
            }
        }
        acc.finish()
    }

    /// Band-interleaved samples (`bands` values per pixel). A pixel is
    /// no-data when any band is NaN or every band equals `nodata`; the
    /// statistics cover all bands of the remaining pixels.
    pub fn from_interleaved(samples: &[f64], bands: usize, nodata: Option<f64>) -> Self {
        let mut acc = Moments::default();
        for pixel in samples.chunks(bands.max(1)) {
            acc.pixel_count += 1;
            let missing =
                pixel.iter().any(|v| v.is_nan()) || nodata.is_some_and(|nd| pixel.iter().all(|&v| v == nd));
            if missing {
                acc.nodata_count += 1;
            } else {
                pixel.iter().for_each(|&v| acc.push(v));
            }
        }
        acc.finish()
    }

    pub fn nodata_ratio(&self) -> f64 {
        if self.pixel_count == 0 {
            1.0
        } else {
            self.nodata_count as f64 / self.pixel_count as f64
        }
    }

    pub fn verdict(&self) -> TileVerdict {
        if self.nodata_count == self.pixel_count {
            TileVerdict::Empty
        } else if self.nodata_count > 0 {
            TileVerdict::Partial
        } else {
            TileVerdict::Valid
        }
    }
}

/// Welford running mean / variance.
struct Moments {
    pixel_count: usize,
    nodata_count: usize,
    n: usize,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Default for Moments {
    fn default() -> Self {
        Self {
            pixel_count: 0,
            nodata_count: 0,
            n: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            m2: 0.0,
        }
    }
}

impl Moments {
    fn push(&mut self, v: f64) {
        self.n += 1;
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        let delta = v - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (v - self.mean);
    }

    fn finish(self) -> TileStats {
        let some = |x: f64| (self.n > 0).then_some(x);
        TileStats {
            pixel_count: self.pixel_count,
            nodata_count: self.nodata_count,
            min: some(self.min),
            max: some(self.max),
            mean: some(self.mean),
            std_dev: some((self.m2 / self.n.max(1) as f64).sqrt()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeVerdict {
    /// Under 1 % of the uncompressed size: almost certainly no-data.
    Suspicious,
    /// Under 10 %: worth a visual check.
    Small,
    Reasonable,
}

/// Compare an on-disk size with the uncompressed size of
/// `width × height × bands × bytes_per_sample`.
pub fn size_verdict(file_bytes: u64, width: usize, height: usize, bands: usize, bytes_per_sample: usize) -> SizeVerdict {
    let expected = (width * height * bands * bytes_per_sample) as f64;
    let actual = file_bytes as f64;
    if actual < expected * 0.01 {
        SizeVerdict::Suspicious
    } else if actual < expected * 0.1 {
        SizeVerdict::Small
    } else {
        SizeVerdict::Reasonable
    }
}
