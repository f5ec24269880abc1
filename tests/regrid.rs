use approx::assert_relative_eq;
use ndarray::{Array, ArrayD, IxDyn};

use emisgrid::field::Coordinate;
use emisgrid::grid::{FvGrid, SeMesh};
use emisgrid::regrid::output::{MemoryStore, OutputStore};
use emisgrid::time::{TimeValue, REFERENCE_UNITS};
use emisgrid::{
    Error, FieldSet, GridDescription, GridTopology, RawField, RegridConfig, RegridDriver, RegridMethod,
};

fn fv(dlon: f64, dlat: f64, name: &str) -> GridDescription {
    GridDescription::new(GridTopology::Fv(FvGrid::global(dlon, dlat).unwrap()), name)
}

fn monthly_flux(name: &str, grid: &FvGrid, value: f64) -> RawField {
    let values = Array::from_elem(IxDyn(&[2, grid.nlat(), grid.nlon()]), value);
    let times = vec![
        TimeValue::Iso("2000-01-15".to_string()),
        TimeValue::Iso("2000-02-15".to_string()),
    ];
    RawField::new(name, values, &["time", "lat", "lon"])
        .unwrap()
        .with_coordinate("time", Coordinate::times(times))
        .unwrap()
        .with_attribute("units", "kg/m2/s")
}

#[test]
fn conservative_regrid_keeps_the_global_total() {
    let source = fv(1.0, 1.0, "1x1");
    let destination = fv(2.0, 2.0, "2x2");
    let GridTopology::Fv(grid) = &source.topology else {
        unreachable!()
    };
    let fields = FieldSet::new(vec![monthly_flux("flux", grid, 1e-9)]);
    let config = RegridConfig {
        check_conservation: true,
        ..Default::default()
    };

    let mut store = MemoryStore::new();
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    let outcome = driver.run(&fields, Some(&mut store)).unwrap();

    assert_eq!(outcome.reports.len(), 2);
    for report in &outcome.reports {
        assert!(report.relative_difference() < 0.01, "{report:?}");
    }

    let flux = store.variable("flux").unwrap();
    assert_eq!(flux.dims, vec!["time", "lat", "lon"]);
    assert_eq!(flux.values.len(), 2 * 90 * 180);
    for value in &flux.values {
        assert_relative_eq!(*value, 1e-9, max_relative = 1e-5);
    }

    let time = store.variable("time").unwrap();
    assert_eq!(time.values[1] - time.values[0], 31.0);
    assert_eq!(
        time.attributes.get("units").and_then(|v| v.as_text()),
        Some(REFERENCE_UNITS)
    );
    assert_eq!(store.dimension_len("time"), Some(2));
    assert!(store.attributes.get("regridded_by").is_some());
    assert_eq!(
        store.attributes.get("source_grid").and_then(|v| v.as_text()),
        Some("1x1")
    );
}

#[test]
fn too_many_leading_dimensions_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("weights.nc");
    let source = fv(10.0, 10.0, "src");
    let destination = fv(20.0, 20.0, "dst");
    let field = RawField::new(
        "x",
        ArrayD::zeros(IxDyn(&[1, 1, 1, 18, 36])),
        &["a", "b", "c", "lat", "lon"],
    )
    .unwrap();
    let config = RegridConfig {
        fields: vec!["x".to_string()],
        save_weights: Some(weights.clone()),
        date_stamp: false,
        ..Default::default()
    };

    let mut store = MemoryStore::new();
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    let result = driver.run(&FieldSet::new(vec![field]), Some(&mut store));

    assert!(matches!(result, Err(Error::TooManyLeadingDimensions(_))));
    assert!(store.variables.is_empty());
    assert!(store.dimensions.is_empty());
    assert!(!weights.exists());
    assert!(driver.context().is_none());
}

#[test]
fn failed_validation_leaves_no_output_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("x_regridded.nc");
    let field = RawField::new(
        "x",
        ArrayD::zeros(IxDyn(&[1, 1, 1, 18, 36])),
        &["a", "b", "c", "lat", "lon"],
    )
    .unwrap();
    let config = RegridConfig {
        fields: vec!["x".to_string()],
        ..Default::default()
    };

    let mut driver = RegridDriver::with_sparse_weights(fv(10.0, 10.0, "src"), fv(20.0, 20.0, "dst"), config);
    let result = driver.run_to_file(&FieldSet::new(vec![field]), &out);
    assert!(matches!(result, Err(Error::TooManyLeadingDimensions(_))));
    assert!(!out.exists());
}

#[test]
fn a_run_that_fails_while_writing_removes_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("flux_regridded.nc");
    let source = fv(30.0, 30.0, "src");
    let GridTopology::Fv(grid) = &source.topology else {
        unreachable!()
    };
    let fields = FieldSet::new(vec![monthly_flux("flux", grid, 1.0)]);
    let config = RegridConfig {
        pass_through: vec!["absent".to_string()],
        ..Default::default()
    };

    let mut driver = RegridDriver::with_sparse_weights(source, fv(60.0, 60.0, "dst"), config);
    assert!(driver.run_to_file(&fields, &out).is_err());
    assert!(!out.exists());
}

fn fv_to_mesh() -> (GridDescription, GridDescription, FieldSet) {
    let source = fv(90.0, 90.0, "4x2");
    // mesh points on four of the eight source centres
    let mesh = SeMesh::new(vec![-135.0, 45.0, 135.0, -45.0], vec![-45.0, -45.0, 45.0, 45.0])
        .unwrap()
        .with_area(vec![1.0; 4])
        .unwrap();
    let destination = GridDescription::new(GridTopology::Se(mesh), "mesh");

    // storage (lat, lon) with lon centres -135, -45, 45, 135
    let a = Array::from_shape_vec(IxDyn(&[2, 4]), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]).unwrap();
    let fields = FieldSet::new(vec![
        RawField::new("a", a.clone(), &["lat", "lon"]).unwrap(),
        RawField::new("b", a.mapv(|v| v * 10.0), &["lat", "lon"]).unwrap(),
    ]);
    (source, destination, fields)
}

#[test]
fn streaming_writes_each_field_to_the_mesh() {
    let (source, destination, fields) = fv_to_mesh();
    let config = RegridConfig {
        method: RegridMethod::NearestSourceToDest,
        streaming: true,
        output_type: emisgrid::OutputType::F8,
        ..Default::default()
    };

    let mut store = MemoryStore::new();
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    let outcome = driver.run(&fields, Some(&mut store)).unwrap();

    assert!(outcome.fields.is_empty());
    assert_eq!(store.variable("a").unwrap().values, vec![1.0, 3.0, 8.0, 6.0]);
    assert_eq!(store.variable("b").unwrap().values, vec![10.0, 30.0, 80.0, 60.0]);
    assert_eq!(store.variable("ncol").unwrap().values, vec![0.0, 1.0, 2.0, 3.0]);
    assert_eq!(
        store.variable("area").unwrap().attributes.get("units").and_then(|v| v.as_text()),
        Some("radians^2")
    );
}

#[test]
fn streaming_without_a_store_keeps_results_in_memory() {
    let (source, destination, fields) = fv_to_mesh();
    let config = RegridConfig {
        method: RegridMethod::NearestSourceToDest,
        streaming: true,
        ..Default::default()
    };
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    let outcome = driver.run(&fields, None).unwrap();
    assert_eq!(outcome.fields.len(), 2);
    assert_eq!(
        outcome.fields[0].clone().into_values().into_raw_vec(),
        vec![1.0, 3.0, 8.0, 6.0]
    );
}

#[test]
fn saved_weights_can_be_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map_fv_to_mesh.nc");
    let (source, destination, fields) = fv_to_mesh();

    let config = RegridConfig {
        method: RegridMethod::NearestSourceToDest,
        save_weights: Some(path.clone()),
        weights_only: true,
        date_stamp: false,
        ..Default::default()
    };
    let mut store = MemoryStore::new();
    let mut driver = RegridDriver::with_sparse_weights(source.clone(), destination.clone(), config);
    let outcome = driver.run(&fields, Some(&mut store)).unwrap();
    assert_eq!(outcome.saved_weights.as_deref(), Some(path.as_path()));
    assert!(outcome.fields.is_empty());
    assert!(store.variables.is_empty());

    let config = RegridConfig {
        weights: Some(path.clone()),
        fields: vec!["b".to_string()],
        ..Default::default()
    };
    let mut driver = RegridDriver::with_sparse_weights(source.clone(), destination, config);
    let outcome = driver.run(&fields, None).unwrap();
    assert_eq!(
        outcome.fields[0].clone().into_values().into_raw_vec(),
        vec![10.0, 30.0, 80.0, 60.0]
    );

    // same weights, wrong destination
    let config = RegridConfig {
        weights: Some(path),
        ..Default::default()
    };
    let mut driver = RegridDriver::with_sparse_weights(source, fv(45.0, 45.0, "other"), config);
    assert!(matches!(
        driver.run(&fields, None),
        Err(Error::InputShapeMismatch(_))
    ));
}

#[test]
fn regional_source_regrids_after_ignoring_unmapped_cells() {
    let source = GridDescription::new(
        GridTopology::Fv(FvGrid::regular(0.5, 1.0, 10, 0.5, 1.0, 10).unwrap()),
        "regional",
    );
    let destination = fv(10.0, 10.0, "global");
    let field = RawField::new("x", Array::from_elem(IxDyn(&[10, 10]), 2.0), &["lat", "lon"]).unwrap();
    let config = RegridConfig {
        method: RegridMethod::Bilinear,
        ..Default::default()
    };
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    let outcome = driver.run(&FieldSet::new(vec![field]), None).unwrap();

    let values = outcome.fields[0].clone().into_values();
    // destination centre (5E, 5N)
    assert_relative_eq!(values[[9, 18]], 2.0, epsilon = 1e-12);
    assert_eq!(values[[0, 0]], 0.0);
}

#[test]
fn conservative_weights_on_a_mesh_are_not_generated() {
    let (source, destination, fields) = fv_to_mesh();
    let mut driver = RegridDriver::with_sparse_weights(source, destination, RegridConfig::default());
    assert!(matches!(
        driver.run(&fields, None),
        Err(Error::RegridGenerationFailed { .. })
    ));
}

#[test]
fn pass_through_fields_are_copied_unchanged() {
    let source = fv(30.0, 30.0, "src");
    let destination = fv(60.0, 60.0, "dst");
    let GridTopology::Fv(grid) = &source.topology else {
        unreachable!()
    };
    let flux = monthly_flux("flux", grid, 1.0);
    let times = vec![
        TimeValue::Iso("2000-01-15".to_string()),
        TimeValue::Iso("2000-02-15".to_string()),
    ];
    let date = RawField::new("date", Array::from_vec(vec![20000115.0, 20000215.0]).into_dyn(), &["time"])
        .unwrap()
        .with_coordinate("time", Coordinate::times(times))
        .unwrap();
    let config = RegridConfig {
        fields: vec!["flux".to_string()],
        pass_through: vec!["date".to_string()],
        scale_factor: 2.0,
        ..Default::default()
    };

    let mut store = MemoryStore::new();
    let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
    driver.run(&FieldSet::new(vec![flux, date]), Some(&mut store)).unwrap();

    assert_eq!(store.variable("date").unwrap().values, vec![20000115.0, 20000215.0]);
    for value in &store.variable("flux").unwrap().values {
        assert_relative_eq!(*value, 2.0, max_relative = 1e-6);
    }
}
