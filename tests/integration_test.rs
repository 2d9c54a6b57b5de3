//! Integration tests for ekman
//!
//! These tests check the engine's end-to-end guarantees on synthetic fields
//! with analytic values.

mod common;

use common::assertions::{
    assert_approx_eq, assert_array_approx_eq, assert_grid_values, assert_in_range, assert_missing_at,
};
use common::test_data::{field_from, grid_from, hourly_series, hourly_times, lon_lat_domain, pressure_volume};
use clap::Parser;
use ndarray::Array2;
use pretty_assertions::assert_eq;
use std::sync::Arc;

use ekman::algebra::{add, average_over_time};
use ekman::derived::{
    absolute_vorticity, coriolis_grid, layer_difference, relative_vorticity, thickness, wind_speed,
    EarthModel,
};
use ekman::domain::vertical::{pressure_to_altitude, PressureLevels};
use ekman::config::Args;
use ekman::resample::{resample, slice_along_line, slice_at_level, subset, LatLonPoint};
use ekman::source::{load_field, GridSource, MemorySource, Selection, SourceGrid};
use ekman::{Axis, GridField, SamplingMode, Unit};

#[test]
fn test_noop_resample_returns_original_values() {
    let d = lon_lat_domain((0.0, 2.5, 12), (-30.0, 2.5, 9));
    let f = field_from(&d, "t", Unit::Kelvin, |s| 250.0 + s[0] * s[1].cos());
    let rebuilt = lon_lat_domain((0.0, 2.5, 12), (-30.0, 2.5, 9));
    for mode in [SamplingMode::NearestNeighbor, SamplingMode::WeightedAverage] {
        for target in [&d, &rebuilt] {
            let out = resample(&f, target, mode).unwrap();
            let (a, b) = (out.first_flat().unwrap(), f.first_flat().unwrap());
            assert_eq!(a.len(), b.len());
            assert_eq!(a.values(), b.values());
        }
    }
}

#[test]
fn test_equal_domains_bind_exactly() {
    let d = lon_lat_domain((0.0, 1.0, 10), (0.0, 1.0, 4));
    let square = |s: &[f64]| s[0] * s[0];
    let a = field_from(&d, "a", Unit::Dimensionless, square);
    let b = field_from(&d, "b", Unit::Dimensionless, square);
    let exact = add(&a, &b).unwrap();
    let exact = exact.first_flat().unwrap();
    assert_eq!(exact.len(), d.len());
    assert_grid_values(exact, |e| 2.0 * (d.sample(e)[0] * d.sample(e)[0]) as f32, 0.0);

    // same shape, shifted by half a cell: the second operand is interpolated
    let shifted = lon_lat_domain((0.5, 1.0, 10), (0.0, 1.0, 4));
    let c = field_from(&shifted, "c", Unit::Dimensionless, square);
    let blended = add(&a, &c).unwrap();
    let blended = blended.first_flat().unwrap();
    assert_eq!(blended.domain(), a.spatial_domain().unwrap());
    // interpolating x² overestimates it between nodes
    let e = d.flat_index(&[4, 1]);
    assert!(blended.values()[[0, e]] > exact.values()[[0, e]]);
    assert_approx_eq(blended.values()[[0, e]], 32.25, Some(1e-4));
    // x = 0 lies outside the shifted domain
    assert!(blended.values()[[0, d.flat_index(&[0, 1])]].is_nan());
}

#[test]
fn test_slice_at_native_level_round_trip() {
    let d = pressure_volume((0.0, 5.0, 8), (30.0, 5.0, 4), (1000.0, -100.0, 6));
    let f = field_from(&d, "p", Unit::Hectopascal, |s| s[2]);
    for level in [1000.0, 850.0, 725.0, 500.0] {
        let out = slice_at_level(&f, level, &Unit::Hectopascal, SamplingMode::WeightedAverage).unwrap();
        let g = out.first_flat().unwrap();
        assert_eq!(g.len(), 8 * 4);
        assert_grid_values(g, |_| level as f32, 1e-3);
    }
    // the same level asked in pascals
    let out = slice_at_level(&f, 82_000.0, &Unit::Pascal, SamplingMode::NearestNeighbor).unwrap();
    assert_grid_values(out.first_flat().unwrap(), |_| 800.0, 0.0);
}

#[test]
fn test_slice_at_reference_level_round_trip() {
    let levels = vec![1000.0, 900.0, 800.0, 700.0, 600.0, 500.0];
    let n = 3 * 3 * levels.len();
    let values: Vec<f32> = (0..n).map(|e| levels[e / 9] as f32).collect();
    let grid = SourceGrid::new(
        "p",
        Unit::Hectopascal,
        vec![Axis::longitude(), Axis::latitude(), Axis::pressure()],
        vec![vec![0.0, 1.0, 2.0], vec![40.0, 41.0, 42.0], levels],
    )
    .unwrap()
    .with_vertical_transform(Arc::new(PressureLevels {
        unit: Unit::Hectopascal,
    }))
    .with_values(values)
    .unwrap();
    let source = MemorySource::default();
    source.insert(grid);
    assert!(source.vertical_transform("p").is_some());

    let f = load_field(&source, "p", &Selection::all()).unwrap();
    let z = pressure_to_altitude(700.0);
    let out = slice_at_level(&f, z, &Unit::Meter, SamplingMode::WeightedAverage).unwrap();
    let g = out.first_flat().unwrap();
    assert_eq!(g.len(), 9);
    assert_grid_values(g, |_| 700.0, 1e-2);
}

#[test]
fn test_line_across_the_dateline_stays_inside_the_domain() {
    let d = lon_lat_domain((0.0, 10.0, 36), (-20.0, 10.0, 5));
    let f = field_from(&d, "lon", Unit::Degree, |s| s[0]);
    let out = slice_along_line(
        &f,
        LatLonPoint::new(0.0, 380.0),
        LatLonPoint::new(0.0, 460.0),
        SamplingMode::WeightedAverage,
    )
    .unwrap();
    let g = out.first_flat().unwrap();
    assert!(g.len() > 1);
    for e in 0..g.len() {
        let s = g.domain().sample(e);
        assert_in_range(s[0] as f32, 0.0, 350.0);
        assert_approx_eq(g.values()[[0, e]], s[0] as f32, Some(1e-3));
    }
}

#[test]
fn test_average_over_time_skips_gaps() {
    let d = lon_lat_domain((0.0, 1.0, 2), (0.0, 1.0, 2));
    let step = |values: [f32; 4]| {
        grid_from(&d, "t", Unit::Kelvin, |_| 0.0)
            .with_values(Array2::from_shape_vec((1, 4), values.to_vec()).unwrap())
            .unwrap()
    };
    let series = hourly_series(vec![
        step([1.0, 10.0, 5.0, f32::NAN]),
        step([3.0, f32::NAN, 5.0, f32::NAN]),
        step([5.0, 20.0, 5.0, f32::NAN]),
    ]);
    let avg = average_over_time(&series, false).unwrap();
    let g = avg.first_flat().unwrap();
    let row = g.values().row(0).to_vec();
    assert_array_approx_eq(&row[..3], &[3.0, 15.0, 5.0], None);
    assert_missing_at(g, &[3]);
}

#[test]
fn test_rigid_rotation_on_a_lat_lon_grid() {
    const OMEGA: f64 = 2.0e-5;
    let earth = EarthModel::default();
    let m = earth.metres_per_degree();
    let d = lon_lat_domain((0.0, 1.0, 11), (30.0, 1.0, 11));
    // x measured along parallels, y along meridians
    let u = field_from(&d, "u", Unit::MeterPerSecond, |s| -OMEGA * s[1] * m);
    let v = field_from(&d, "v", Unit::MeterPerSecond, |s| {
        OMEGA * s[0] * m * earth.cos_latitude(s[1])
    });

    let rel = relative_vorticity(&u, &v, &earth).unwrap();
    let rel = rel.first_flat().unwrap();
    assert_grid_values(rel, |_| (2.0 * OMEGA) as f32, 1e-7);

    let abs = absolute_vorticity(&u, &v, &earth).unwrap();
    let coriolis = coriolis_grid(&u).unwrap();
    let (abs, f) = (abs.first_flat().unwrap(), coriolis.first_flat().unwrap());
    assert_eq!(abs.param().name, "absvorticity");
    assert_grid_values(abs, |e| rel.values()[[0, e]] + f.values()[[0, e]], 1e-8);
    // Coriolis grows toward the pole
    assert!(f.values()[[0, d.flat_index(&[0, 10])]] > f.values()[[0, 0]]);
}

#[test]
fn test_layer_difference_is_antisymmetric() {
    let d = pressure_volume((0.0, 2.0, 5), (40.0, 2.0, 3), (1000.0, -50.0, 11));
    let z = field_from(&d, "z", Unit::GeopotentialMeter, |s| {
        pressure_to_altitude(s[2]) + 3.0 * s[0] - s[1]
    });
    let up = layer_difference(&z, 850.0, 600.0, &Unit::Hectopascal).unwrap();
    let down = layer_difference(&z, 600.0, 850.0, &Unit::Hectopascal).unwrap();
    let (up, down) = (up.first_flat().unwrap(), down.first_flat().unwrap());
    assert_grid_values(up, |e| -down.values()[[0, e]], 0.0);

    let thick = thickness(&z).unwrap();
    let g = thick.first_flat().unwrap();
    let expected = (pressure_to_altitude(500.0) - pressure_to_altitude(1000.0)) as f32;
    assert_grid_values(g, |_| expected, 0.05);
}

#[test]
fn test_loaded_time_sequence_feeds_derived_quantities() {
    let lon = vec![0.0, 1.0, 2.0];
    let lat = vec![10.0, 11.0];
    let mut u = SourceGrid::new(
        "u",
        Unit::MeterPerSecond,
        vec![Axis::longitude(), Axis::latitude()],
        vec![lon.clone(), lat.clone()],
    )
    .unwrap();
    let mut v = SourceGrid::new(
        "v",
        Unit::Knot,
        vec![Axis::longitude(), Axis::latitude()],
        vec![lon, lat],
    )
    .unwrap();
    for (k, time) in hourly_times(3).into_iter().enumerate() {
        let missing = k == 1;
        u = u
            .with_step(time, (!missing).then(|| vec![0.0; 6]))
            .unwrap();
        v = v.with_step(time, Some(vec![3.0 + k as f32; 6])).unwrap();
    }
    let source = MemorySource::default();
    source.insert(u);
    source.insert(v);
    assert_eq!(source.parameters(), vec!["u".to_string(), "v".to_string()]);

    let u = load_field(&source, "u", &Selection::all()).unwrap();
    let v = load_field(&source, "v", &Selection::all()).unwrap();
    let speed = wind_speed(&u, &v).unwrap();
    assert_eq!(speed.step_count(), 3);
    let flats = speed.flats();
    assert_eq!(flats.len(), 2);
    assert_eq!(flats[0].param().name, "WindSpeed");
    assert_eq!(flats[0].param().unit, Unit::MeterPerSecond);
    // 5 knots
    assert_grid_values(flats[1], |_| 2.572_222, 1e-5);
    assert_eq!(source.cache().stats().entries, 2);
}

#[test]
fn test_grid_document_survives_json() {
    let d = pressure_volume((0.0, 1.0, 2), (0.0, 1.0, 2), (1000.0, -500.0, 2));
    let f = hourly_series(vec![
        grid_from(&d, "t", Unit::Kelvin, |s| s[2] / 4.0),
        grid_from(&d, "t", Unit::Kelvin, |s| s[2] / 5.0),
    ]);
    let json = serde_json::to_string(&f).unwrap();
    let back: GridField = serde_json::from_str(&json).unwrap();
    back.validate().unwrap();
    assert_eq!(back, f);
}

#[test]
fn test_cli_subset_strides_on_2d_and_3d_grids() {
    let args = Args::parse_from(["ekman", "grid.json", "--operation", "subset", "--stride", "2"]);

    let flat = lon_lat_domain((0.0, 1.0, 6), (0.0, 1.0, 4));
    let f = field_from(&flat, "t", Unit::Kelvin, |s| s[0] + 10.0 * s[1]);
    let (sx, sy, sz) = args.subset_strides(flat.manifold_dimension());
    let out = subset(&f, sx, sy, sz).unwrap();
    let g = out.first_flat().unwrap();
    assert_eq!(g.domain().lengths(), &[3, 2]);
    assert_grid_values(g, |e| (2.0 * (e % 3) as f64 + 20.0 * (e / 3) as f64) as f32, 0.0);

    let volume = pressure_volume((0.0, 1.0, 4), (0.0, 1.0, 4), (1000.0, -100.0, 5));
    let f = field_from(&volume, "p", Unit::Hectopascal, |s| s[2]);
    let (sx, sy, sz) = args.subset_strides(volume.manifold_dimension());
    let out = subset(&f, sx, sy, sz).unwrap();
    assert_eq!(out.first_flat().unwrap().domain().lengths(), &[2, 2, 3]);
}
