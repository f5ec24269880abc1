//! Grid topologies and grid-description files.
//!
//! Two topologies are supported: a regular latitude-longitude grid (FV) and
//! an unstructured, possibly regionally refined mesh (SE). Both can be read
//! from netCDF grid-description files; SE meshes use the SCRIP layout.

pub mod area;
pub mod bounds;
pub mod region;

use std::fmt;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use tracing::debug;

use crate::error::{Error, Result};
use crate::field::Attributes;
use crate::nc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridType {
    Fv,
    Se,
}

impl fmt::Display for GridType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridType::Fv => f.write_str("FV"),
            GridType::Se => f.write_str("SE"),
        }
    }
}

/// Decide the grid type from a dimension signature.
///
/// `{lat, lon}` is FV and `{ncol}` is SE; both signatures at once, neither,
/// or only half of the FV pair is an error.
pub fn detect_grid_type<S: AsRef<str>>(owner: &str, dims: &[S]) -> Result<GridType> {
    let has = |name: &str| dims.iter().any(|d| d.as_ref() == name);
    let (has_lat, has_lon, has_ncol) = (has("lat"), has("lon"), has("ncol"));
    match (has_lat || has_lon, has_ncol) {
        (true, true) => Err(Error::AmbiguousGridType(owner.to_string())),
        (false, true) => Ok(GridType::Se),
        (true, false) if has_lat && has_lon => Ok(GridType::Fv),
        _ => Err(Error::UnsupportedGridType(owner.to_string())),
    }
}

/// Regular latitude-longitude grid; coordinates in degrees.
#[derive(Debug, Clone, PartialEq)]
pub struct FvGrid {
    pub lon: Array1<f64>,
    pub lat: Array1<f64>,
    /// Cell edges, one `[west, east]` row per longitude
    pub lon_bounds: Option<Array2<f64>>,
    /// Cell edges, one `[south, north]` row per latitude
    pub lat_bounds: Option<Array2<f64>>,
    pub lon_attributes: Attributes,
    pub lat_attributes: Attributes,
}

impl FvGrid {
    pub fn new(lon: Vec<f64>, lat: Vec<f64>) -> Result<Self> {
        for (name, values) in [("lon", &lon), ("lat", &lat)] {
            if values.len() < 2 {
                return Err(Error::shape(format!("FV '{name}' needs at least two values")));
            }
            if values.windows(2).any(|w| w[1] <= w[0]) {
                return Err(Error::shape(format!("FV '{name}' must be strictly increasing")));
            }
        }
        let mut lon_attributes = Attributes::default();
        lon_attributes.set("long_name", "longitude");
        lon_attributes.set("units", "degrees_east");
        let mut lat_attributes = Attributes::default();
        lat_attributes.set("long_name", "latitude");
        lat_attributes.set("units", "degrees_north");
        Ok(Self {
            lon: Array1::from_vec(lon),
            lat: Array1::from_vec(lat),
            lon_bounds: None,
            lat_bounds: None,
            lon_attributes,
            lat_attributes,
        })
    }

    /// Evenly spaced grid starting at the given cell centres.
    pub fn regular(lon0: f64, dlon: f64, nlon: usize, lat0: f64, dlat: f64, nlat: usize) -> Result<Self> {
        let lon = (0..nlon).map(|i| lon0 + i as f64 * dlon).collect();
        let lat = (0..nlat).map(|j| lat0 + j as f64 * dlat).collect();
        Self::new(lon, lat)
    }

    /// Global grid with cell centres offset by half a cell from the edges.
    pub fn global(dlon: f64, dlat: f64) -> Result<Self> {
        let nlon = (360.0 / dlon).round() as usize;
        let nlat = (180.0 / dlat).round() as usize;
        Self::regular(-180.0 + dlon / 2.0, dlon, nlon, -90.0 + dlat / 2.0, dlat, nlat)
    }

    pub fn with_bounds(mut self, lon_bounds: Array2<f64>, lat_bounds: Array2<f64>) -> Result<Self> {
        if lon_bounds.dim() != (self.lon.len(), 2) || lat_bounds.dim() != (self.lat.len(), 2) {
            return Err(Error::shape("FV bounds must be (n, 2) per coordinate"));
        }
        self.lon_bounds = Some(lon_bounds);
        self.lat_bounds = Some(lat_bounds);
        Ok(self)
    }

    pub fn nlon(&self) -> usize {
        self.lon.len()
    }

    pub fn nlat(&self) -> usize {
        self.lat.len()
    }
}

/// Unstructured mesh; one value per node (`ncol`).
#[derive(Debug, Clone, PartialEq)]
pub struct SeMesh {
    pub center_lon: Array1<f64>,
    pub center_lat: Array1<f64>,
    /// `(ncol, corners)`
    pub corner_lon: Option<Array2<f64>>,
    pub corner_lat: Option<Array2<f64>>,
    /// Raw node areas in steradians
    pub area: Option<Array1<f64>>,
    /// Regional refinement factor
    pub rrfac: Option<Array1<f64>>,
}

impl SeMesh {
    pub fn new(center_lon: Vec<f64>, center_lat: Vec<f64>) -> Result<Self> {
        if center_lon.len() != center_lat.len() || center_lon.is_empty() {
            return Err(Error::shape(format!(
                "SE mesh centre arrays differ in length ({} lon, {} lat)",
                center_lon.len(),
                center_lat.len()
            )));
        }
        Ok(Self {
            center_lon: Array1::from_vec(center_lon),
            center_lat: Array1::from_vec(center_lat),
            corner_lon: None,
            corner_lat: None,
            area: None,
            rrfac: None,
        })
    }

    pub fn with_corners(mut self, corner_lon: Array2<f64>, corner_lat: Array2<f64>) -> Result<Self> {
        if corner_lon.dim() != corner_lat.dim() || corner_lon.nrows() != self.len() {
            return Err(Error::shape("SE corner arrays must be (ncol, corners)"));
        }
        self.corner_lon = Some(corner_lon);
        self.corner_lat = Some(corner_lat);
        Ok(self)
    }

    pub fn with_area(mut self, area: Vec<f64>) -> Result<Self> {
        if area.len() != self.len() {
            return Err(Error::shape(format!(
                "SE area has {} values for {} nodes",
                area.len(),
                self.len()
            )));
        }
        self.area = Some(Array1::from_vec(area));
        Ok(self)
    }

    pub fn with_rrfac(mut self, rrfac: Vec<f64>) -> Result<Self> {
        if rrfac.len() != self.len() {
            return Err(Error::shape("SE refinement factor must have one value per node"));
        }
        self.rrfac = Some(Array1::from_vec(rrfac));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.center_lon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.center_lon.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GridTopology {
    Fv(FvGrid),
    Se(SeMesh),
}

impl GridTopology {
    pub fn grid_type(&self) -> GridType {
        match self {
            GridTopology::Fv(_) => GridType::Fv,
            GridTopology::Se(_) => GridType::Se,
        }
    }

    /// Spatial dimension names in storage order.
    pub fn spatial_dims(&self) -> &'static [&'static str] {
        match self {
            GridTopology::Fv(_) => &["lat", "lon"],
            GridTopology::Se(_) => &["ncol"],
        }
    }

    /// Spatial shape in storage order, `(lat, lon)` or `(ncol)`.
    pub fn spatial_shape(&self) -> Vec<usize> {
        match self {
            GridTopology::Fv(g) => vec![g.nlat(), g.nlon()],
            GridTopology::Se(m) => vec![m.len()],
        }
    }

    /// Number of cells.
    pub fn size(&self) -> usize {
        self.spatial_shape().iter().product()
    }

    /// Cell centres `(lon, lat)` in operator order.
    ///
    /// The interpolation operator indexes FV cells longitude-major, i.e. the
    /// transpose of the `(lat, lon)` storage order.
    pub fn operator_points(&self) -> Vec<(f64, f64)> {
        match self {
            GridTopology::Fv(g) => g
                .lon
                .iter()
                .flat_map(|&lon| g.lat.iter().map(move |&lat| (lon, lat)))
                .collect(),
            GridTopology::Se(m) => m
                .center_lon
                .iter()
                .zip(m.center_lat.iter())
                .map(|(&lon, &lat)| (lon, lat))
                .collect(),
        }
    }
}

/// A grid topology together with the file it came from.
#[derive(Debug, Clone)]
pub struct GridDescription {
    pub topology: GridTopology,
    /// Used for provenance attributes and weight keys
    pub identifier: String,
}

impl GridDescription {
    pub fn new(topology: GridTopology, identifier: impl Into<String>) -> Self {
        Self {
            topology,
            identifier: identifier.into(),
        }
    }

    /// Read an FV (plain `lat`/`lon` or SCRIP rank 2) or SE (SCRIP rank 1,
    /// or `ncol` with `lat`/`lon` variables) grid description.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let missing = || Error::MissingGridFile(PathBuf::from(path));
        if !path.exists() {
            return Err(missing());
        }
        let file = netcdf::open(path).map_err(|_| missing())?;
        let dims: Vec<String> = file.dimensions().map(|d| d.name()).collect();
        let identifier = path.display().to_string();

        let topology = if dims.iter().any(|d| d == "grid_size") {
            read_scrip(&file, &identifier)?
        } else {
            match detect_grid_type(&identifier, dims.as_slice())? {
                GridType::Fv => GridTopology::Fv(read_fv(&file)?),
                GridType::Se => GridTopology::Se(read_ncol_mesh(&file)?),
            }
        };
        debug!(grid = %identifier, kind = %topology.grid_type(), cells = topology.size(), "read grid description");
        Ok(Self {
            topology,
            identifier,
        })
    }
}

fn read_fv(file: &netcdf::File) -> Result<FvGrid> {
    let mut grid = FvGrid::new(nc::read_f64(file, "lon")?, nc::read_f64(file, "lat")?)?;
    if let Some(var) = file.variable("lon") {
        grid.lon_attributes = nc::variable_attributes(&var);
    }
    if let Some(var) = file.variable("lat") {
        grid.lat_attributes = nc::variable_attributes(&var);
    }
    let lon_bnds = nc::read_optional_f64(file, "lon_bnds")?;
    let lat_bnds = nc::read_optional_f64(file, "lat_bnds")?;
    if let (Some(lon_bnds), Some(lat_bnds)) = (lon_bnds, lat_bnds) {
        let lon_bnds = Array2::from_shape_vec((grid.nlon(), 2), lon_bnds)
            .map_err(|e| Error::shape(format!("lon_bnds: {e}")))?;
        let lat_bnds = Array2::from_shape_vec((grid.nlat(), 2), lat_bnds)
            .map_err(|e| Error::shape(format!("lat_bnds: {e}")))?;
        grid = grid.with_bounds(lon_bnds, lat_bnds)?;
    }
    Ok(grid)
}

fn read_ncol_mesh(file: &netcdf::File) -> Result<SeMesh> {
    let mut mesh = SeMesh::new(nc::read_f64(file, "lon")?, nc::read_f64(file, "lat")?)?;
    if let Some(area) = nc::read_optional_f64(file, "area")? {
        mesh = mesh.with_area(area)?;
    }
    if let Some(rrfac) = nc::read_optional_f64(file, "rrfac")? {
        mesh = mesh.with_rrfac(rrfac)?;
    }
    Ok(mesh)
}

fn read_scrip(file: &netcdf::File, identifier: &str) -> Result<GridTopology> {
    let grid_dims = nc::read_f64(file, "grid_dims")?;
    let center_lon = nc::read_f64(file, "grid_center_lon")?;
    let center_lat = nc::read_f64(file, "grid_center_lat")?;

    match grid_dims.len() {
        1 => {
            let n = center_lon.len();
            let mut mesh = SeMesh::new(center_lon, center_lat)?;
            let corner_lon = nc::read_optional_f64(file, "grid_corner_lon")?;
            let corner_lat = nc::read_optional_f64(file, "grid_corner_lat")?;
            if let (Some(corner_lon), Some(corner_lat)) = (corner_lon, corner_lat) {
                let corners = corner_lon.len() / n;
                let corner_lon = Array2::from_shape_vec((n, corners), corner_lon)
                    .map_err(|e| Error::shape(format!("grid_corner_lon: {e}")))?;
                let corner_lat = Array2::from_shape_vec((n, corners), corner_lat)
                    .map_err(|e| Error::shape(format!("grid_corner_lat: {e}")))?;
                mesh = mesh.with_corners(corner_lon, corner_lat)?;
            }
            if let Some(area) = nc::read_optional_f64(file, "grid_area")? {
                mesh = mesh.with_area(area)?;
            }
            if let Some(rrfac) = nc::read_optional_f64(file, "rrfac")? {
                mesh = mesh.with_rrfac(rrfac)?;
            }
            Ok(GridTopology::Se(mesh))
        }
        2 => {
            // SCRIP stores logically rectangular grids with longitude fastest
            let nlon = grid_dims[0] as usize;
            let nlat = grid_dims[1] as usize;
            if nlon * nlat != center_lon.len() {
                return Err(Error::shape(format!(
                    "{identifier}: grid_dims {nlon}x{nlat} disagree with {} centres",
                    center_lon.len()
                )));
            }
            let lon = center_lon[..nlon].to_vec();
            let lat = (0..nlat).map(|j| center_lat[j * nlon]).collect();
            Ok(GridTopology::Fv(FvGrid::new(lon, lat)?))
        }
        rank => Err(Error::UnsupportedGridType(format!(
            "{identifier} (grid_dims has rank {rank}; expected 1 for SE or 2 for FV)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_grid_signatures() {
        assert_eq!(detect_grid_type("f", &["time", "lat", "lon"]).unwrap(), GridType::Fv);
        assert_eq!(detect_grid_type("f", &["time", "ncol"]).unwrap(), GridType::Se);
        assert!(matches!(
            detect_grid_type("f", &["lat", "lon", "ncol"]),
            Err(Error::AmbiguousGridType(_))
        ));
        assert!(matches!(
            detect_grid_type("f", &["time", "x"]),
            Err(Error::UnsupportedGridType(_))
        ));
        assert!(matches!(
            detect_grid_type("f", &["lat"]),
            Err(Error::UnsupportedGridType(_))
        ));
    }

    #[test]
    fn fv_grid_requires_increasing_coordinates() {
        assert!(FvGrid::new(vec![0.0, 1.0], vec![1.0, 0.0]).is_err());
        assert!(FvGrid::new(vec![0.0], vec![0.0, 1.0]).is_err());
    }

    #[test]
    fn operator_points_are_longitude_major() {
        let grid = FvGrid::new(vec![0.0, 10.0, 20.0], vec![-5.0, 5.0]).unwrap();
        let points = GridTopology::Fv(grid).operator_points();
        assert_eq!(points[0], (0.0, -5.0));
        assert_eq!(points[1], (0.0, 5.0));
        assert_eq!(points[2], (10.0, -5.0));
    }

    #[test]
    fn global_grid_shape() {
        let grid = FvGrid::global(2.0, 2.0).unwrap();
        assert_eq!(grid.nlon(), 180);
        assert_eq!(grid.nlat(), 90);
        assert_eq!(grid.lat[0], -89.0);
    }

    #[test]
    fn missing_grid_file_names_the_path() {
        let err = GridDescription::open("/nonexistent/grid.nc").unwrap_err();
        assert!(matches!(err, Error::MissingGridFile(_)));
        assert!(err.to_string().contains("/nonexistent/grid.nc"));
    }
}
