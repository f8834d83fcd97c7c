//! End-to-end runs on small hand-built inputs.

use approx::assert_relative_eq;
use geo::{Area, BooleanOps, MultiPolygon, Polygon};
use landsample_core::{
    emit, filter, partition, partition_sections, sample, sample_sections, sections, summarize, Extent, MinCoverage,
    PlanarProvider, RasterMask, RejectReason, Region, Report, SamplerConfig, Strategy,
};

#[test]
fn square_split_into_four_cells() {
    let e = Extent::new(0.0, 0.0, 1000.0, 1000.0).unwrap();
    let cells = partition(&e, 2, 2).unwrap();
    assert_eq!(cells.len(), 4);
    for cell in &cells {
        assert_relative_eq!(cell.extent.width(), 500.0);
        assert_relative_eq!(cell.extent.height(), 500.0);
    }
    let labels: Vec<_> = cells.iter().map(|c| c.label()).collect();
    assert_eq!(labels, ["R1C1", "R1C2", "R2C1", "R2C2"]);
    let total: f64 = cells.iter().map(|c| c.extent.area()).sum();
    assert_relative_eq!(total, 1_000_000.0);
}

#[test]
fn five_sections_use_three_by_two_layout() {
    let e = Extent::new(0.0, 0.0, 3000.0, 2000.0).unwrap();
    let (layout, cells) = partition_sections(&e, 5).unwrap();
    assert_eq!((layout.cols, layout.rows), (3, 2));
    assert_eq!(cells.len(), 5);
    assert_eq!(cells[4].label(), "R2C2");
}

#[test]
fn full_square_splits_seven_grid_three_random() {
    let e = Extent::new(0.0, 0.0, 100.0, 100.0).unwrap();
    let region = Region::from_extent(&e);
    let cfg = SamplerConfig {
        target_count: 10,
        polygon_size_m: 6.0,
        grid_fraction: 0.7,
        seed: Some(2024),
        ..Default::default()
    };
    let m = sample(&PlanarProvider::for_extent(e), &region, &cfg).unwrap();
    assert_eq!(m.grid_target, 7);
    assert_eq!(m.count_by(Strategy::Grid), 7);
    assert_eq!(m.count_by(Strategy::Random), 3);
    assert_eq!(m.accepted(), 10);
    assert_eq!(m.shortfall, 0);
    assert!(m.is_complete());

    // Ids run across both passes, ordinals restart per strategy.
    let ids: Vec<_> = m.polygons.iter().map(|p| p.id).collect();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
    assert_eq!(m.polygons[7].label(), "rand_001");
}

/// Lower-right half of a 100 m square.
fn triangle() -> Region {
    Region::from_polygon(Polygon::new(
        vec![(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 0.0)].into(),
        vec![],
    ))
}

#[test]
fn triangle_samples_stay_inside() {
    let region = triangle();
    let provider = PlanarProvider::for_extent(region.bounds().unwrap());
    let cfg = SamplerConfig { target_count: 50, seed: Some(77), ..Default::default() };
    let m = sample(&provider, &region, &cfg).unwrap();

    assert!(m.accepted() > 0);
    assert!(m.rejections.outside_region > 0);
    let union = m
        .polygons
        .iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, p| acc.union(&p.geometry));
    let leaked = union.difference(region.geometry()).unsigned_area();
    assert!(leaked < 1e-6 * union.unsigned_area());
}

#[test]
fn triangle_rejects_about_half_of_random_draws() {
    let region = triangle();
    let provider = PlanarProvider::for_extent(region.bounds().unwrap());
    let cfg = SamplerConfig {
        target_count: 50,
        grid_fraction: 0.0,
        min_spacing_m: Some(0.0),
        seed: Some(5),
        ..Default::default()
    };
    let m = sample(&provider, &region, &cfg).unwrap();
    assert_eq!(m.accepted(), 50);
    let rate = m.rejections.outside_region as f64 / m.attempts as f64;
    assert!((0.3..0.65).contains(&rate), "outside rate {rate}");
}

#[test]
fn coverage_filter_keeps_five_of_ten() {
    // Ten 100 m cells in a row. The region covers the first five fully and
    // clips 10 m strips off cells six and seven.
    let e = Extent::new(0.0, 0.0, 1000.0, 100.0).unwrap();
    let cells = partition(&e, 1, 10).unwrap();
    let rect = |x0: f64, x1: f64| Extent::new(x0, 0.0, x1, 100.0).unwrap().to_polygon();
    let region = Region::dissolve([rect(0.0, 500.0), rect(500.0, 510.0), rect(600.0, 610.0)]);

    let outcome = filter(&cells, &region, MinCoverage::Ratio(0.5)).unwrap();
    assert_eq!(outcome.retained.len(), 5);
    assert_eq!(outcome.rejection_counts(), (3, 2));

    let reasons: Vec<_> = outcome.rejected.iter().map(|(c, r)| (c.col, r.as_str())).collect();
    assert_eq!(
        reasons,
        [(6, "below-threshold"), (7, "below-threshold"), (8, "outside"), (9, "outside"), (10, "outside")]
    );
    let (low, _) = &outcome.rejected[0];
    assert_relative_eq!(low.coverage_area, 1000.0, max_relative = 1e-9);
    assert!(outcome.rejected.iter().skip(2).all(|(c, r)| *r == RejectReason::Outside && c.coverage_area == 0.0));
}

#[test]
fn mask_to_report_pipeline() {
    // 40 × 20 pixel mask of 25 m pixels; the eastern quarter is no-data.
    let (w, h) = (40usize, 20usize);
    let extent = Extent::new(0.0, 0.0, 1000.0, 500.0).unwrap();
    let values: Vec<f64> = (0..w * h).map(|i| if i % w >= 30 { -9999.0 } else { 1.0 }).collect();
    let mask = RasterMask::from_values(extent, "EPSG:32633", w, h, &values, Some(-9999.0)).unwrap();
    let region = mask.raster_to_polygon();
    assert_relative_eq!(region.area(), 750.0 * 500.0, max_relative = 1e-9);

    let cells = partition(&extent, 1, 4).unwrap();
    let outcome = filter(&cells, &region, MinCoverage::Absolute(50_000.0)).unwrap();
    assert_eq!(outcome.retained.len(), 3);
    let secs = sections(&region, &outcome.retained);

    let cfg = SamplerConfig { target_count: 30, seed: Some(9), ..Default::default() };
    let manifests = sample_sections(&mask, &secs, &cfg);
    let reports: Vec<(String, Report)> = secs
        .iter()
        .zip(manifests)
        .map(|(s, m)| (s.cell.label(), emit(&m.unwrap())))
        .collect();
    for (_, r) in &reports {
        assert_eq!(r.accepted, 30);
        assert_relative_eq!(r.region_area_km2, 0.125, max_relative = 1e-9);
    }

    let summary = summarize(&reports);
    assert_eq!(summary.sections, 3);
    assert_eq!(summary.total_polygons, 90);
    assert_relative_eq!(summary.total_area_km2, 0.375, max_relative = 1e-9);
}
