use std::path::Path;

use approx::assert_relative_eq;

use emisgrid::emission::EmissionTotal;
use emisgrid::grid::area::earth_surface_area;
use emisgrid::grid::bounds::write_bounds_file;
use emisgrid::grid::region::RegionBounds;
use emisgrid::regrid::output::NetcdfStore;
use emisgrid::time::SECONDS_PER_DAY;
use emisgrid::{
    AggregationConfig, Dataset, EmissionAggregator, FieldCollection, FieldSource, GridDescription,
    GridTopology, OutputType, RegridConfig, RegridDriver,
};

const NLAT: usize = 18;
const NLON: usize = 36;

fn put(file: &mut netcdf::MutableFile, name: &str, dims: &[&str], values: &[f64], attrs: &[(&str, &str)]) {
    let mut var = file.add_variable::<f64>(name, dims).unwrap();
    let count: Vec<usize> = match dims.len() {
        1 => vec![values.len()],
        _ => {
            let spatial = NLAT * NLON;
            let mut count = vec![values.len() / spatial];
            count.extend([NLAT, NLON]);
            count
        }
    };
    let start = vec![0; count.len()];
    var.put_values(values, Some(&start), Some(&count)).unwrap();
    for (key, value) in attrs {
        var.add_attribute(key, *value).unwrap();
    }
}

fn coordinates(file: &mut netcdf::MutableFile) {
    file.add_dimension("lat", NLAT).unwrap();
    file.add_dimension("lon", NLON).unwrap();
    let lat: Vec<f64> = (0..NLAT).map(|j| -85.0 + 10.0 * j as f64).collect();
    let lon: Vec<f64> = (0..NLON).map(|i| -175.0 + 10.0 * i as f64).collect();
    put(file, "lat", &["lat"], &lat, &[("units", "degrees_north")]);
    put(file, "lon", &["lon"], &lon, &[("units", "degrees_east")]);
}

/// Two monthly samples of a constant 1 kg/m2/s flux on a 10 degree grid.
fn monthly_file(path: &Path) {
    let mut file = netcdf::create(path).unwrap();
    coordinates(&mut file);
    file.add_unlimited_dimension("time").unwrap();
    put(
        &mut file,
        "time",
        &["time"],
        &[15.0, 46.0],
        &[("units", "days since 2000-01-01 00:00:00"), ("calendar", "noleap")],
    );
    put(
        &mut file,
        "flux",
        &["time", "lat", "lon"],
        &vec![1.0; 2 * NLAT * NLON],
        &[("units", "kg/m2/s")],
    );
    file.add_attribute("title", "monthly test fluxes").unwrap();
}

#[test]
fn monthly_series_from_a_netcdf_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flux.nc");
    monthly_file(&path);

    let dataset = Dataset::open(&path).unwrap();
    let field = dataset.field("flux").unwrap();
    let grid = GridDescription::open(&path).unwrap();
    assert!(matches!(grid.topology, GridTopology::Fv(_)));

    let aggregator = EmissionAggregator::new(&grid.topology, AggregationConfig::default());
    let EmissionTotal::Series(steps) = aggregator.aggregate_field(&field, None, None, None).unwrap() else {
        panic!("expected a series");
    };
    assert_eq!(steps.len(), 2);
    assert_eq!((steps[1].date.year, steps[1].date.month), (2000, 2));
    let area = earth_surface_area();
    assert_relative_eq!(steps[0].kg, area * 31.0 * SECONDS_PER_DAY, max_relative = 1e-9);
    // noleap February
    assert_relative_eq!(steps[1].kg, area * 28.0 * SECONDS_PER_DAY, max_relative = 1e-9);
}

#[test]
fn regional_total_reduces_the_series() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flux.nc");
    monthly_file(&path);

    let dataset = Dataset::open(&path).unwrap();
    let field = dataset.field("flux").unwrap();
    let grid = GridDescription::open(&path).unwrap();
    let config = AggregationConfig {
        region: RegionBounds::new(Some([0.0, 180.0]), Some([0.0, 90.0])),
        reduce_time: true,
        ..Default::default()
    };
    let total = EmissionAggregator::new(&grid.topology, config)
        .aggregate_field(&field, None, None, None)
        .unwrap();
    assert!(matches!(total, EmissionTotal::Scalar { .. }));
    assert_relative_eq!(
        total.kg(),
        earth_surface_area() / 4.0 * 59.0 * SECONDS_PER_DAY,
        max_relative = 1e-9
    );
}

#[test]
fn altitude_levels_use_interface_thickness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aircraft.nc");
    {
        let mut file = netcdf::create(&path).unwrap();
        coordinates(&mut file);
        file.add_dimension("altitude", 3).unwrap();
        file.add_dimension("altitude_int", 4).unwrap();
        put(&mut file, "altitude", &["altitude"], &[0.5, 1.5, 2.5], &[("units", "km")]);
        put(&mut file, "altitude_int", &["altitude_int"], &[0.0, 1.0, 2.0, 3.0], &[("units", "km")]);
        put(
            &mut file,
            "flux",
            &["altitude", "lat", "lon"],
            &vec![1.0; 3 * NLAT * NLON],
            &[("units", "kg/m2/s")],
        );
    }

    let dataset = Dataset::open(&path).unwrap();
    let field = dataset.field("flux").unwrap();
    let vertical = dataset.vertical_axis(&field, true).unwrap().unwrap();
    assert_eq!(vertical.thickness(), vec![1000.0, 1000.0, 1000.0]);

    let grid = GridDescription::open(&path).unwrap();
    let total = EmissionAggregator::new(&grid.topology, AggregationConfig::default())
        .aggregate_field(&field, None, None, Some(&vertical))
        .unwrap();
    let EmissionTotal::Scalar { kg, per_level } = total else {
        panic!("expected a scalar");
    };
    assert_eq!(per_level.len(), 3);
    assert_relative_eq!(
        kg,
        earth_surface_area() * 3000.0 * 31.0 * SECONDS_PER_DAY,
        max_relative = 1e-9
    );
}

#[test]
fn packed_and_filled_values_are_decoded_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("packed.nc");
    let spatial = NLAT * NLON;
    {
        let mut file = netcdf::create(&path).unwrap();
        coordinates(&mut file);

        // southern half missing, northern half 4 * 0.5 - 1.0 = 1.0
        let raw: Vec<i16> = (0..spatial).map(|k| if k < spatial / 2 { -32767 } else { 4 }).collect();
        let mut var = file.add_variable::<i16>("packed", &["lat", "lon"]).unwrap();
        var.add_attribute("units", "kg/m2/s").unwrap();
        var.add_attribute("scale_factor", 0.5f64).unwrap();
        var.add_attribute("add_offset", -1.0f64).unwrap();
        var.add_attribute("missing_value", -32767i16).unwrap();
        var.put_values(&raw, Some(&[0, 0]), Some(&[NLAT, NLON])).unwrap();

        let filled: Vec<f64> = (0..spatial).map(|k| if k < spatial / 2 { 1e20 } else { 1.0 }).collect();
        let mut var = file.add_variable::<f64>("filled", &["lat", "lon"]).unwrap();
        var.add_attribute("_FillValue", 1e20f64).unwrap();
        var.add_attribute("units", "kg/m2/s").unwrap();
        var.put_values(&filled, Some(&[0, 0]), Some(&[NLAT, NLON])).unwrap();
    }

    let dataset = Dataset::open(&path).unwrap();
    let grid = GridDescription::open(&path).unwrap();
    let aggregator = EmissionAggregator::new(&grid.topology, AggregationConfig::default());
    for name in ["packed", "filled"] {
        let field = dataset.field(name).unwrap();
        let values = field.values();
        assert!(values[[0, 0]].is_nan(), "{name}");
        assert_eq!(values[[NLAT - 1, NLON - 1]], 1.0, "{name}");
        let total = aggregator.aggregate_field(&field, None, None, None).unwrap();
        assert_relative_eq!(
            total.kg(),
            earth_surface_area() / 2.0 * 31.0 * SECONDS_PER_DAY,
            max_relative = 1e-9
        );
    }
}

#[test]
fn bounds_file_describes_the_same_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flux.nc");
    let out = dir.path().join("grid.nc");
    monthly_file(&path);

    write_bounds_file(&path, &out).unwrap();
    let grid = GridDescription::open(&out).unwrap();
    let GridTopology::Fv(grid) = grid.topology else {
        panic!("expected an FV grid");
    };
    assert_eq!(grid.nlat(), NLAT);
    let lat_bounds = grid.lat_bounds.unwrap();
    assert_eq!(lat_bounds[[0, 0]], -90.0);
    assert_eq!(lat_bounds[[NLAT - 1, 1]], 90.0);
    let lon_bounds = grid.lon_bounds.unwrap();
    assert_eq!((lon_bounds[[0, 0]], lon_bounds[[0, 1]]), (-180.0, -170.0));
}

#[test]
fn regridded_file_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flux.nc");
    let out = dir.path().join("flux_20x20.nc");
    monthly_file(&path);

    let dataset = Dataset::open(&path).unwrap();
    let source = GridDescription::open(&path).unwrap();
    let destination = GridDescription::new(
        GridTopology::Fv(emisgrid::grid::FvGrid::global(20.0, 20.0).unwrap()),
        "20x20",
    );
    let config = RegridConfig {
        output_type: OutputType::F8,
        ..Default::default()
    };
    {
        let mut store = NetcdfStore::create(&out).unwrap();
        let mut driver = RegridDriver::with_sparse_weights(source, destination, config);
        driver.run(&dataset, Some(&mut store)).unwrap();
    }

    let regridded = Dataset::open(&out).unwrap();
    let field = regridded.field("flux").unwrap();
    assert_eq!(field.values().shape(), &[2, 9, 18]);
    for value in field.values().iter() {
        assert_relative_eq!(*value, 1.0, max_relative = 1e-9);
    }
    let time = emisgrid::field::time_axis(&field).unwrap().unwrap();
    assert_eq!((time.dates[0].month, time.dates[1].month), (1, 2));
    assert_eq!(time.calendar().to_string(), "noleap");

    let globals = regridded.global_attributes();
    assert_eq!(globals.get("title").and_then(|v| v.as_text()), Some("monthly test fluxes"));
    assert!(globals.get("regridded_by").is_some());
}
