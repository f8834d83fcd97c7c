/// Tile quality check for exported GeoTIFF tiles.
///
/// For every tile: dimensions, band count, no-data share, value statistics
/// and a verdict (empty / partial / valid). File sizes are compared with the
/// uncompressed size; tiles far below it are usually mostly no-data.
/// `--max-nodata` additionally marks tiles that should be left out of a mosaic.
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use landsample_core::{size_verdict, SizeVerdict, TileStats, TileVerdict};
use serde::Serialize;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tilecheck", about = "Quality check of exported GeoTIFF tiles")]
struct Args {
    /// Tile files or directories containing `.tif` / `.tiff` tiles
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// No-data value (NaN is always no-data)
    #[arg(long)]
    nodata: Option<f64>,

    /// Tiles with a larger no-data share are marked unfit for mosaicking
    #[arg(long, default_value = "0.3")]
    max_nodata: f64,

    /// Write the per-tile results as JSON
    #[arg(long)]
    json: Option<PathBuf>,
}

#[derive(Serialize)]
struct TileReport {
    path: PathBuf,
    width: usize,
    height: usize,
    bands: usize,
    bytes_per_sample: usize,
    file_bytes: u64,
    stats: TileStats,
    nodata_ratio: f64,
    verdict: TileVerdict,
    size: SizeVerdict,
    mosaic_ready: bool,
}

#[derive(Serialize)]
struct Overview {
    tiles: usize,
    failed: usize,
    empty: usize,
    partial: usize,
    valid: usize,
    mosaic_ready: usize,
    total_bytes: u64,
    reports: Vec<TileReport>,
}

fn is_tiff(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("tif" | "tiff")
    )
}

fn collect_tiles(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut tiles = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("Cannot list {}", input.display()))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| is_tiff(p))
                .collect();
            found.sort();
            tiles.extend(found);
        } else {
            tiles.push(input.clone());
        }
    }
    Ok(tiles)
}

/// Samples as f64 plus the on-disk width of one sample.
fn to_f64(image: DecodingResult) -> (Vec<f64>, usize) {
    match image {
        DecodingResult::U8(v) => (v.into_iter().map(f64::from).collect(), 1),
        DecodingResult::U16(v) => (v.into_iter().map(f64::from).collect(), 2),
        DecodingResult::U32(v) => (v.into_iter().map(f64::from).collect(), 4),
        DecodingResult::U64(v) => (v.into_iter().map(|x| x as f64).collect(), 8),
        DecodingResult::I8(v) => (v.into_iter().map(f64::from).collect(), 1),
        DecodingResult::I16(v) => (v.into_iter().map(f64::from).collect(), 2),
        DecodingResult::I32(v) => (v.into_iter().map(f64::from).collect(), 4),
        DecodingResult::I64(v) => (v.into_iter().map(|x| x as f64).collect(), 8),
        DecodingResult::F32(v) => (v.into_iter().map(f64::from).collect(), 4),
        DecodingResult::F64(v) => (v, 8),
    }
}

fn check_tile(path: &Path, nodata: Option<f64>, max_nodata: f64) -> Result<TileReport> {
    let file_bytes = fs::metadata(path).with_context(|| format!("Cannot stat {}", path.display()))?.len();
    let file = fs::File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut decoder = Decoder::new(BufReader::new(file)).context("Not a valid TIFF")?;
    let (width, height) = decoder.dimensions().context("Cannot read dimensions")?;
    let (width, height) = (width as usize, height as usize);
    let (samples, bytes_per_sample) = to_f64(decoder.read_image().context("Cannot decode image")?);

    let pixels = width * height;
    if pixels == 0 {
        bail!("zero-sized tile");
    }
    let bands = (samples.len() / pixels).max(1);
    let stats = TileStats::from_interleaved(&samples, bands, nodata);
    let nodata_ratio = stats.nodata_ratio();

    Ok(TileReport {
        path: path.to_path_buf(),
        width,
        height,
        bands,
        bytes_per_sample,
        file_bytes,
        verdict: stats.verdict(),
        size: size_verdict(file_bytes, width, height, bands, bytes_per_sample),
        mosaic_ready: nodata_ratio <= max_nodata,
        nodata_ratio,
        stats,
    })
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

fn print_report(r: &TileReport) {
    println!("── {} ──", r.path.display());
    println!(
        "  {} x {} px, {} band(s), {} byte(s)/sample, {:.2} MB on disk",
        r.width,
        r.height,
        r.bands,
        r.bytes_per_sample,
        r.file_bytes as f64 / (1024.0 * 1024.0)
    );
    println!(
        "  min {}  max {}  mean {}  std {}",
        fmt_opt(r.stats.min),
        fmt_opt(r.stats.max),
        fmt_opt(r.stats.mean),
        fmt_opt(r.stats.std_dev)
    );
    let verdict = match r.verdict {
        TileVerdict::Empty => "entirely no-data",
        TileVerdict::Partial => "contains some no-data",
        TileVerdict::Valid => "valid imagery",
    };
    let size = match r.size {
        SizeVerdict::Suspicious => "extremely small, likely mostly no-data",
        SizeVerdict::Small => "much smaller than expected",
        SizeVerdict::Reasonable => "reasonable",
    };
    println!("  no-data {:.1}%: {verdict}; size {size}", r.nodata_ratio * 100.0);
    if !r.mosaic_ready {
        println!("  not fit for mosaicking");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.max_nodata) {
        bail!("--max-nodata must be in [0, 1], got {}", args.max_nodata);
    }

    let tiles = collect_tiles(&args.inputs)?;
    if tiles.is_empty() {
        bail!("No tile files found");
    }
    info!(tiles = tiles.len(), "checking tiles");

    let mut reports = Vec::with_capacity(tiles.len());
    let mut failed = 0usize;
    for path in &tiles {
        match check_tile(path, args.nodata, args.max_nodata) {
            Ok(r) => {
                print_report(&r);
                reports.push(r);
            }
            Err(e) => {
                warn!(tile = %path.display(), error = %format!("{e:#}"), "skipping tile");
                failed += 1;
            }
        }
    }

    let count = |v: TileVerdict| reports.iter().filter(|r| r.verdict == v).count();
    let overview = Overview {
        tiles: tiles.len(),
        failed,
        empty: count(TileVerdict::Empty),
        partial: count(TileVerdict::Partial),
        valid: count(TileVerdict::Valid),
        mosaic_ready: reports.iter().filter(|r| r.mosaic_ready).count(),
        total_bytes: reports.iter().map(|r| r.file_bytes).sum(),
        reports,
    };

    println!(
        "\n{} tile(s): {} valid, {} partial, {} empty, {} unreadable; {} fit for mosaicking",
        overview.tiles, overview.valid, overview.partial, overview.empty, overview.failed, overview.mosaic_ready
    );
    if !overview.reports.is_empty() {
        let avg = overview.total_bytes as f64 / overview.reports.len() as f64 / (1024.0 * 1024.0);
        println!("Average tile size: {avg:.2} MB");
    }

    if let Some(path) = &args.json {
        fs::write(path, serde_json::to_string_pretty(&overview)?)
            .with_context(|| format!("Write failed: {}", path.display()))?;
        info!(path = %path.display(), "report written");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiff_extension_is_case_insensitive() {
        assert!(is_tiff(Path::new("a/tile_001.TIF")));
        assert!(is_tiff(Path::new("tile.tiff")));
        assert!(!is_tiff(Path::new("tile.tif.aux.xml")));
        assert!(!is_tiff(Path::new("README")));
    }

    #[test]
    fn sample_width_follows_pixel_type() {
        let (v, w) = to_f64(DecodingResult::U16(vec![1, 2, 3]));
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
        assert_eq!(w, 2);
        let (_, w) = to_f64(DecodingResult::F32(vec![0.5]));
        assert_eq!(w, 4);
    }

    #[test]
    fn rgb_tile_counts_nodata_per_pixel() {
        use tiff::encoder::{colortype, TiffEncoder};

        let path = std::env::temp_dir().join(format!("tilecheck-rgb-{}.tif", std::process::id()));
        {
            let mut file = fs::File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(&mut file).unwrap();
            encoder.write_image::<colortype::RGB8>(2, 1, &[255, 0, 0, 0, 80, 0]).unwrap();
        }
        let report = check_tile(&path, Some(0.0), 0.3).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(report.bands, 3);
        assert_eq!(report.stats.pixel_count, 2);
        assert_eq!(report.nodata_ratio, 0.0);
        assert_eq!(report.verdict, TileVerdict::Valid);
        assert!(report.mosaic_ready);
    }

    #[test]
    fn missing_optional_stats_print_as_dash() {
        assert_eq!(fmt_opt(None), "-");
        assert_eq!(fmt_opt(Some(1.234)), "1.23");
    }
}
