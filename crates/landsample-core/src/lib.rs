//! Grid partitioning and stratified polygon sampling for imagery labelling.
//!
//! A large imagery extent is cut into sections ([`grid`]), sections without
//! enough valid data are dropped ([`coverage`]), and each remaining section
//! receives a set of small sampling polygons ([`sampler`]) that are later
//! labelled by hand. [`report`] turns a sampling run into summary statistics,
//! and [`quality`] checks exported tiles for no-data.
//!
//! All raster and polygon queries go through a [`provider::GeometryProvider`].

pub mod coverage;
pub mod error;
pub mod extent;
pub mod grid;
pub mod manifest;
pub mod provider;
pub mod quality;
pub mod region;
pub mod report;
pub mod retry;
pub mod sampler;
pub mod shape;

pub use coverage::{filter, sections, CoverageOutcome, MinCoverage, RejectReason, Section};
pub use error::{Error, ProviderError, Result};
pub use extent::{Extent, RasterInfo};
pub use grid::{partition, partition_by_tile_size, partition_sections, GridCell, GridLayout};
pub use manifest::{RejectionCounts, SamplePolygon, SamplingManifest, Strategy};
pub use provider::{GeometryProvider, PlanarProvider, RasterMask};
pub use quality::{size_verdict, SizeVerdict, TileStats, TileVerdict};
pub use region::Region;
pub use report::{emit, summarize, DensityRating, Report, RunSummary};
pub use retry::{RetryPolicy, Retrying};
pub use sampler::{recommended_target_count, sample, sample_sections, SamplerConfig};
pub use shape::Shape;
