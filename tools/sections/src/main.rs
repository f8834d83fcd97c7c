/// Section builder: cuts an imagery extent into grid cells, drops cells with
/// too little coverage and writes the surviving sections as GeoJSON together
/// with a metadata file for the sampling step.
///
/// The covered area is either the full `--extent` or the polygons of a
/// `--boundary` GeoJSON file (typically a no-data boundary traced from the
/// imagery). Each section is its cell clipped to that area.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use geo::{Geometry, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use landsample_core::{
    filter, partition, partition_by_tile_size, partition_sections, recommended_target_count, sections, Extent,
    GridCell, MinCoverage, Region,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sections", about = "Partition an imagery extent into sampling sections")]
struct Args {
    /// Extent as `xmin,ymin,xmax,ymax` in projected metres
    #[arg(long, value_parser = parse_extent)]
    extent: Option<Extent>,

    /// GeoJSON with the valid-data boundary; its bounds are used when
    /// `--extent` is omitted
    #[arg(long)]
    boundary: Option<PathBuf>,

    /// Number of sections; picks a near-square layout (max 12)
    #[arg(long, conflicts_with_all = ["rows", "tile_size"])]
    sections: Option<usize>,

    /// Explicit grid rows (requires --cols)
    #[arg(long, requires = "cols")]
    rows: Option<usize>,

    /// Explicit grid columns (requires --rows)
    #[arg(long, requires = "rows")]
    cols: Option<usize>,

    /// Fixed tile size as `width[,height]` in metres
    #[arg(long, value_parser = parse_tile_size, conflicts_with = "rows")]
    tile_size: Option<(f64, f64)>,

    /// Minimum covered area per section, km²
    #[arg(long, default_value = "1.0")]
    min_coverage_km2: f64,

    /// Minimum covered share of the cell instead of an absolute area
    #[arg(long, conflicts_with = "min_coverage_km2")]
    min_coverage_ratio: Option<f64>,

    /// Land-cover classes, used for the recommended polygon count
    #[arg(long, default_value = "5")]
    classes: usize,

    /// Lower bound of the recommended polygon count
    #[arg(long, default_value = "50")]
    min_polygons: usize,

    /// Upper bound of the recommended polygon count
    #[arg(long, default_value = "300")]
    max_polygons: usize,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "data/sections")]
    output: PathBuf,
}

fn parse_extent(s: &str) -> Result<Extent, String> {
    let v: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<Result<_, _>>()?;
    let [xmin, ymin, xmax, ymax] = v[..] else {
        return Err(format!("expected xmin,ymin,xmax,ymax, got {} values", v.len()));
    };
    Extent::new(xmin, ymin, xmax, ymax).map_err(|e| e.to_string())
}

fn parse_tile_size(s: &str) -> Result<(f64, f64), String> {
    let v: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().map_err(|e| format!("`{p}`: {e}")))
        .collect::<Result<_, _>>()?;
    match v[..] {
        [w] => Ok((w, w)),
        [w, h] => Ok((w, h)),
        _ => Err(format!("expected width[,height], got {} values", v.len())),
    }
}

// ── Output schema ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Metadata {
    extent: Extent,
    layout: String,
    min_coverage: MinCoverage,
    cells_total: usize,
    sections: Vec<SectionMeta>,
    rejected: Vec<RejectedMeta>,
    total_area_km2: f64,
    recommended_polygons_total: usize,
}

#[derive(Serialize)]
struct SectionMeta {
    section_id: usize,
    grid_position: String,
    bounds: Extent,
    area_m2: f64,
    area_km2: f64,
    coverage_ratio: f64,
    recommended_polygons: usize,
}

#[derive(Serialize)]
struct RejectedMeta {
    grid_position: String,
    reason: &'static str,
    coverage_area_m2: f64,
}

// ── GeoJSON helpers ──────────────────────────────────────────────────────────

fn collect_polygons(geometry: Geometry<f64>, out: &mut Vec<Polygon<f64>>) {
    match geometry {
        Geometry::Polygon(p) => out.push(p),
        Geometry::MultiPolygon(mp) => out.extend(mp),
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_polygons(g, out);
            }
        }
        _ => warn!("ignoring non-areal geometry in boundary"),
    }
}

fn read_boundary(path: &Path) -> Result<Region> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let gj: GeoJson = text.parse().with_context(|| format!("Invalid GeoJSON: {}", path.display()))?;
    let collection = geojson::quick_collection::<f64>(&gj).context("Unsupported GeoJSON geometry")?;
    let mut polygons = Vec::new();
    for g in collection {
        collect_polygons(g, &mut polygons);
    }
    if polygons.is_empty() {
        bail!("{} contains no polygons", path.display());
    }
    Ok(Region::dissolve(polygons))
}

fn feature(geometry: &MultiPolygon<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn build_cells(args: &Args, extent: &Extent) -> Result<(String, Vec<GridCell>)> {
    if let Some((w, h)) = args.tile_size {
        let cells = partition_by_tile_size(extent, w, h)?;
        return Ok((format!("tiles {w}x{h} m"), cells));
    }
    if let (Some(rows), Some(cols)) = (args.rows, args.cols) {
        return Ok((format!("{cols}x{rows} grid"), partition(extent, rows, cols)?));
    }
    let (layout, cells) = partition_sections(extent, args.sections.unwrap_or(4))?;
    Ok((format!("{}x{} grid, {} sections", layout.cols, layout.rows, layout.cells), cells))
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let boundary = args.boundary.as_deref().map(read_boundary).transpose()?;
    let extent = match (args.extent, &boundary) {
        (Some(e), _) => e,
        (None, Some(region)) => region.bounds().context("Boundary has no extent")?,
        (None, None) => bail!("Either --extent or --boundary is required"),
    };
    let region = boundary.unwrap_or_else(|| Region::from_extent(&extent));
    info!(
        width_km = extent.width() / 1000.0,
        height_km = extent.height() / 1000.0,
        covered_km2 = region.area() / 1_000_000.0,
        "extent loaded"
    );

    let (layout, cells) = build_cells(&args, &extent)?;
    info!(layout = %layout, cells = cells.len(), "grid built");

    let min_coverage = match args.min_coverage_ratio {
        Some(r) => MinCoverage::Ratio(r),
        None => MinCoverage::km2(args.min_coverage_km2),
    };
    let outcome = filter(&cells, &region, min_coverage)?;
    if outcome.retained.is_empty() {
        warn!("no cell passed the coverage threshold");
    }
    let sections = sections(&region, &outcome.retained);

    fs::create_dir_all(&args.output).with_context(|| format!("Cannot create {}", args.output.display()))?;

    let mut features = Vec::with_capacity(sections.len());
    let mut section_meta = Vec::with_capacity(sections.len());
    for s in &sections {
        let area_m2 = s.region.area();
        let area_km2 = area_m2 / 1_000_000.0;
        let recommended = recommended_target_count(area_km2, args.classes, args.min_polygons, args.max_polygons);

        let mut props = JsonObject::new();
        props.insert("section_id".into(), json!(s.id));
        props.insert("grid_position".into(), json!(s.cell.label()));
        props.insert("area_m2".into(), json!(area_m2));
        props.insert("area_km2".into(), json!(area_km2));
        props.insert("recommended_polygons".into(), json!(recommended));
        features.push(feature(s.region.geometry(), props));

        info!(
            section = s.id,
            position = %s.cell.label(),
            area_km2 = %format!("{area_km2:.2}"),
            recommended,
            "section kept"
        );
        section_meta.push(SectionMeta {
            section_id: s.id,
            grid_position: s.cell.label(),
            bounds: s.cell.extent,
            area_m2,
            area_km2,
            coverage_ratio: s.cell.coverage_ratio(),
            recommended_polygons: recommended,
        });
    }

    let collection = FeatureCollection { bbox: None, features, foreign_members: None };
    let geojson_path = args.output.join("sections.geojson");
    fs::write(&geojson_path, serde_json::to_string_pretty(&collection)?)
        .with_context(|| format!("Write failed: {}", geojson_path.display()))?;

    let metadata = Metadata {
        extent,
        layout,
        min_coverage,
        cells_total: cells.len(),
        total_area_km2: section_meta.iter().map(|s| s.area_km2).sum(),
        recommended_polygons_total: section_meta.iter().map(|s| s.recommended_polygons).sum(),
        sections: section_meta,
        rejected: outcome
            .rejected
            .iter()
            .map(|(cell, reason)| RejectedMeta {
                grid_position: cell.label(),
                reason: reason.as_str(),
                coverage_area_m2: cell.coverage_area,
            })
            .collect(),
    };
    let meta_path = args.output.join("sections_metadata.json");
    fs::write(&meta_path, serde_json::to_string_pretty(&metadata)?)
        .with_context(|| format!("Write failed: {}", meta_path.display()))?;

    let (outside, below) = outcome.rejection_counts();
    info!(
        sections = metadata.sections.len(),
        outside,
        below_threshold = below,
        total_km2 = %format!("{:.2}", metadata.total_area_km2),
        recommended_polygons = metadata.recommended_polygons_total,
        output = %args.output.display(),
        "done"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_parses_four_values() {
        let e = parse_extent("0, 10, 500,1000").unwrap();
        assert_eq!((e.xmin, e.ymin, e.xmax, e.ymax), (0.0, 10.0, 500.0, 1000.0));
        assert!(parse_extent("0,0,1").is_err());
        assert!(parse_extent("5,0,1,1").is_err());
    }

    #[test]
    fn tile_size_accepts_one_or_two_values() {
        assert_eq!(parse_tile_size("250").unwrap(), (250.0, 250.0));
        assert_eq!(parse_tile_size("250,100").unwrap(), (250.0, 100.0));
        assert!(parse_tile_size("a").is_err());
    }

    #[test]
    fn nested_collections_are_flattened() {
        let square = Extent::new(0.0, 0.0, 1.0, 1.0).unwrap().to_polygon();
        let gc = geo::GeometryCollection::new_from(vec![
            Geometry::Polygon(square.clone()),
            Geometry::MultiPolygon(MultiPolygon::new(vec![square.clone(), square])),
            Geometry::Point(geo::Point::new(0.0, 0.0)),
        ]);
        let mut out = Vec::new();
        collect_polygons(Geometry::GeometryCollection(gc), &mut out);
        assert_eq!(out.len(), 3);
    }
}
