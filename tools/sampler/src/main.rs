/// Polygon sampler: places stratified sampling polygons inside every section
/// of a sections GeoJSON and writes them out for hand labelling.
///
/// Per section `N` the output directory receives
///   section_N_polygons.geojson   one feature per polygon, `land_cover` empty
///   section_N_report.json        counts, density and rejection breakdown
/// plus `summary.json` across all sections and the effective `run_config.json`.
///
/// An optional validity mask (`--mask`, a single-band TIFF) rejects candidates
/// that fall on no-data pixels.
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use geo::{Geometry, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use landsample_core::{
    emit, recommended_target_count, sample, sample_sections, summarize, Extent, GeometryProvider, GridCell,
    PlanarProvider, RasterMask, Region, Report, RetryPolicy, Retrying, SamplerConfig, SamplingManifest, Section,
    Shape,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "sampler", about = "Generate stratified sampling polygons for each section")]
struct Args {
    /// Sections GeoJSON (output of `sections`) or any polygon collection
    #[arg(long, default_value = "data/sections/sections.geojson")]
    sections: PathBuf,

    /// JSON file with `sampler` and `retry` settings; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "data/samples")]
    output: PathBuf,

    /// Process only this section id
    #[arg(long)]
    section: Option<usize>,

    /// Polygons per section
    #[arg(long)]
    target: Option<usize>,

    /// Derive the target per section from its area (about 40 per km²)
    #[arg(long, conflicts_with = "target")]
    auto_target: bool,

    /// Land-cover classes, for --auto-target
    #[arg(long, default_value = "5")]
    classes: usize,

    /// Bounds for --auto-target
    #[arg(long, default_value = "50")]
    min_polygons: usize,
    #[arg(long, default_value = "300")]
    max_polygons: usize,

    /// Polygon diameter in metres
    #[arg(long)]
    size: Option<f64>,

    /// square, hexagon, circle or irregular
    #[arg(long)]
    shape: Option<Shape>,

    /// Share of polygons placed by the jittered grid pass
    #[arg(long)]
    grid_fraction: Option<f64>,

    /// Minimum centre spacing in the random pass, metres
    #[arg(long)]
    min_spacing: Option<f64>,

    /// Seed for reproducible output
    #[arg(long)]
    seed: Option<u64>,

    /// Single-band TIFF marking valid pixels
    #[arg(long, requires = "mask_extent")]
    mask: Option<PathBuf>,

    /// Mask extent as `xmin,ymin,xmax,ymax`
    #[arg(long, value_parser = parse_extent)]
    mask_extent: Option<Extent>,

    /// Mask no-data value (NaN is always no-data)
    #[arg(long)]
    nodata: Option<f64>,

    /// Spatial reference recorded with the mask, e.g. `EPSG:32633`
    #[arg(long, default_value = "")]
    spatial_ref: String,

    /// Cut sections to the mask's valid area before sampling
    #[arg(long, requires = "mask")]
    clip_to_mask: bool,
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

// ── Config file ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    sampler: SamplerConfig,
    retry: RetryPolicy,
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))?
        }
        None => RunConfig::default(),
    };
    let s = &mut cfg.sampler;
    if let Some(v) = args.target {
        s.target_count = v;
    }
    if let Some(v) = args.size {
        s.polygon_size_m = v;
    }
    if let Some(v) = args.shape {
        s.shape = v;
    }
    if let Some(v) = args.grid_fraction {
        s.grid_fraction = v;
    }
    if let Some(v) = args.min_spacing {
        s.min_spacing_m = Some(v);
    }
    if let Some(v) = args.seed {
        s.seed = Some(v);
    }
    s.validate()?;
    Ok(cfg)
}

// ── Input ────────────────────────────────────────────────────────────────────

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
        _ => {}
    }
}

/// `R2C3` → `(2, 3)`.
fn parse_grid_position(s: &str) -> Option<(usize, usize)> {
    let (r, c) = s.strip_prefix('R')?.split_once('C')?;
    Some((r.parse().ok()?, c.parse().ok()?))
}

fn read_sections(path: &Path) -> Result<Vec<Section>> {
    let text = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let gj: GeoJson = text.parse().with_context(|| format!("Invalid GeoJSON: {}", path.display()))?;
    let GeoJson::FeatureCollection(fc) = gj else {
        bail!("{} is not a FeatureCollection", path.display());
    };

    let mut sections = Vec::with_capacity(fc.features.len());
    for (i, feature) in fc.features.into_iter().enumerate() {
        let id = feature
            .property("section_id")
            .and_then(|v| v.as_u64())
            .map_or(i + 1, |v| v as usize);
        let (row, col) = feature
            .property("grid_position")
            .and_then(|v| v.as_str())
            .and_then(parse_grid_position)
            .unwrap_or((1, id));
        let Some(geometry) = feature.geometry else {
            warn!(section = id, "feature without geometry, skipped");
            continue;
        };
        let geometry: Geometry<f64> =
            geometry.try_into().with_context(|| format!("Section {id}: unsupported geometry"))?;
        let mut polygons = Vec::new();
        collect_polygons(geometry, &mut polygons);
        let region = Region::new(MultiPolygon::new(polygons));
        let Some(extent) = region.bounds() else {
            warn!(section = id, "section has no area, skipped");
            continue;
        };
        sections.push(Section {
            id,
            cell: GridCell { row, col, extent, coverage_area: region.area() },
            region,
        });
    }
    Ok(sections)
}

/// Restrict each section to `valid`, dropping sections left without area.
fn clip_sections(sections: Vec<Section>, valid: &Region) -> Vec<Section> {
    sections
        .into_iter()
        .filter_map(|s| {
            let region = Region::new(valid.clip(s.region.geometry()));
            if region.is_empty() {
                warn!(section = s.id, "no valid data left after clipping, skipped");
                return None;
            }
            info!(
                section = s.id,
                kept = %format!("{:.1}%", region.area() / s.region.area() * 100.0),
                "clipped to mask"
            );
            Some(Section { region, ..s })
        })
        .collect()
}

fn to_f64(image: DecodingResult) -> Vec<f64> {
    match image {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
    }
}

/// Decode the first band of a TIFF into a validity mask.
fn load_mask(path: &Path, extent: Extent, nodata: Option<f64>, spatial_ref: &str) -> Result<RasterMask> {
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder =
        Decoder::new(BufReader::new(file)).with_context(|| format!("Not a valid TIFF: {}", path.display()))?;
    let (width, height) = decoder.dimensions().context("Cannot read TIFF dimensions")?;
    let (width, height) = (width as usize, height as usize);
    let samples = to_f64(decoder.read_image().context("Cannot decode TIFF image")?);

    let pixels = width * height;
    if pixels == 0 || samples.len() < pixels {
        bail!("{}: {} samples for {width}x{height} pixels", path.display(), samples.len());
    }
    let bands = samples.len() / pixels;
    let values: Vec<f64> = samples.into_iter().step_by(bands).take(pixels).collect();

    let mask = RasterMask::from_values(extent, spatial_ref, width, height, &values, nodata)?;
    info!(
        width,
        height,
        bands,
        valid = %format!("{:.1}%", mask.valid_fraction() * 100.0),
        "mask loaded"
    );
    Ok(mask)
}

// ── Output ───────────────────────────────────────────────────────────────────

fn polygons_geojson(section_id: usize, manifest: &SamplingManifest) -> FeatureCollection {
    let features = manifest
        .polygons
        .iter()
        .map(|p| {
            let mut props = JsonObject::new();
            props.insert("id".into(), json!(p.id));
            props.insert("label".into(), json!(p.label()));
            props.insert("section_id".into(), json!(section_id));
            props.insert("strategy".into(), json!(p.strategy.as_str()));
            props.insert("shape".into(), json!(p.shape.as_str()));
            props.insert("center_x".into(), json!(p.center_x));
            props.insert("center_y".into(), json!(p.center_y));
            props.insert("size_m".into(), json!(p.size_m));
            props.insert("area_m2".into(), json!(p.area_m2));
            props.insert("clipped".into(), json!(p.clipped));
            props.insert("land_cover".into(), json!(""));
            Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(&p.geometry))),
                id: None,
                properties: Some(props),
                foreign_members: None,
            }
        })
        .collect();
    FeatureCollection { bbox: None, features, foreign_members: None }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?).with_context(|| format!("Write failed: {}", path.display()))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn run(
    provider: &(dyn GeometryProvider + Sync),
    sections: &[Section],
    args: &Args,
    config: &SamplerConfig,
) -> Vec<landsample_core::Result<SamplingManifest>> {
    if !args.auto_target {
        return sample_sections(provider, sections, config);
    }
    sections
        .iter()
        .map(|s| {
            let area_km2 = s.region.area() / 1_000_000.0;
            let target = recommended_target_count(area_km2, args.classes, args.min_polygons, args.max_polygons);
            info!(section = s.id, area_km2, target, "auto target");
            let cfg = SamplerConfig {
                target_count: target,
                seed: config.seed.map(|seed| seed ^ s.id as u64),
                ..config.clone()
            };
            sample(provider, &s.region, &cfg)
        })
        .collect()
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;

    let mut sections = read_sections(&args.sections)?;
    if let Some(only) = args.section {
        sections.retain(|s| s.id == only);
    }
    if sections.is_empty() {
        bail!("No sections to sample in {}", args.sections.display());
    }
    info!(sections = sections.len(), "sections loaded");

    let provider: Box<dyn GeometryProvider + Sync> = match (&args.mask, args.mask_extent) {
        (Some(path), Some(extent)) => {
            let mask = load_mask(path, extent, args.nodata, &args.spatial_ref)?;
            Box::new(Retrying::new(mask, config.retry.clone()))
        }
        _ => {
            let bounds = sections
                .iter()
                .map(|s| s.cell.extent)
                .reduce(|a, b| Extent {
                    xmin: a.xmin.min(b.xmin),
                    ymin: a.ymin.min(b.ymin),
                    xmax: a.xmax.max(b.xmax),
                    ymax: a.ymax.max(b.ymax),
                })
                .context("No section bounds")?;
            Box::new(Retrying::new(PlanarProvider::for_extent(bounds), config.retry.clone()))
        }
    };

    if args.clip_to_mask {
        let valid = provider.valid_region().context("Cannot polygonise mask")?;
        sections = clip_sections(sections, &valid);
        if sections.is_empty() {
            bail!("No section overlaps the valid mask area");
        }
    }

    fs::create_dir_all(&args.output).with_context(|| format!("Cannot create {}", args.output.display()))?;
    write_json(&args.output.join("run_config.json"), &config)?;

    let results = run(provider.as_ref(), &sections, &args, &config.sampler);

    let mut reports: Vec<(String, Report)> = Vec::with_capacity(sections.len());
    let mut failed = 0usize;
    for (section, result) in sections.iter().zip(results) {
        let manifest = match result {
            Ok(m) => m,
            Err(e) => {
                error!(section = section.id, error = %e, "sampling failed");
                failed += 1;
                continue;
            }
        };
        let geojson_path = args.output.join(format!("section_{}_polygons.geojson", section.id));
        write_json(&geojson_path, &polygons_geojson(section.id, &manifest))?;

        let report = emit(&manifest);
        write_json(&args.output.join(format!("section_{}_report.json", section.id)), &report)?;
        println!("── Section {} ({}) ──\n{report}\n", section.id, section.cell.label());
        reports.push((format!("section_{}", section.id), report));
    }

    if !reports.is_empty() {
        let summary = summarize(&reports);
        write_json(&args.output.join("summary.json"), &summary)?;
        println!("{summary}");
    }
    info!(output = %args.output.display(), written = reports.len(), failed, "done");

    if failed > 0 {
        bail!("{failed} section(s) failed");
    }
    Ok(())
}
