//! Longitude/latitude boxes and the cell indices inside them.

use serde::Deserialize;

use super::{FvGrid, SeMesh};

/// Inclusive longitude/latitude box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RegionBounds {
    #[serde(default = "full_lon")]
    pub lon_range: [f64; 2],
    #[serde(default = "full_lat")]
    pub lat_range: [f64; 2],
    /// Set only for the default box; no subsetting is applied then.
    #[serde(skip)]
    global: bool,
}

fn full_lon() -> [f64; 2] {
    [-180.0, 180.0]
}

fn full_lat() -> [f64; 2] {
    [-90.0, 90.0]
}

impl Default for RegionBounds {
    fn default() -> Self {
        Self {
            lon_range: full_lon(),
            lat_range: full_lat(),
            global: true,
        }
    }
}

impl RegionBounds {
    /// A box from optional ranges; a missing range spans the full extent and
    /// with neither range given the region is global.
    pub fn new(lon_range: Option<[f64; 2]>, lat_range: Option<[f64; 2]>) -> Self {
        if lon_range.is_none() && lat_range.is_none() {
            return Self::default();
        }
        Self {
            lon_range: lon_range.unwrap_or_else(full_lon),
            lat_range: lat_range.unwrap_or_else(full_lat),
            global: false,
        }
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    fn contains_lon(&self, lon: f64) -> bool {
        self.lon_range[0] <= lon && lon <= self.lon_range[1]
    }

    fn contains_lat(&self, lat: f64) -> bool {
        self.lat_range[0] <= lat && lat <= self.lat_range[1]
    }

    /// Native longitudes in `[0, 360)` must be shifted before a box with a
    /// negative western edge can be matched against them.
    pub fn needs_wrap(&self, longitudes: &[f64]) -> bool {
        let max = longitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        self.lon_range[0] < 0.0 && max > 180.0
    }
}

/// Shift every longitude at or east of 180 by -360 degrees.
pub fn wrap_longitudes(longitudes: &mut [f64]) {
    for lon in longitudes.iter_mut().filter(|lon| **lon >= 180.0) {
        *lon -= 360.0;
    }
}

/// Indices selected along one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSelection {
    /// Every index; no subsetting
    All,
    /// Contiguous inclusive range `[lo, hi]`
    Range { lo: usize, hi: usize },
    /// Sorted explicit indices, possibly empty
    Indices(Vec<usize>),
}

impl IndexSelection {
    fn from_indices(indices: Vec<usize>) -> Self {
        let contiguous = indices.windows(2).all(|w| w[1] == w[0] + 1);
        match (indices.first(), indices.last()) {
            (Some(&lo), Some(&hi)) if contiguous => IndexSelection::Range { lo, hi },
            _ => IndexSelection::Indices(indices),
        }
    }

    /// Selected indices out of an axis of length `n`.
    pub fn indices(&self, n: usize) -> Vec<usize> {
        match self {
            IndexSelection::All => (0..n).collect(),
            IndexSelection::Range { lo, hi } => (*lo..=*hi).collect(),
            IndexSelection::Indices(indices) => indices.clone(),
        }
    }

    pub fn count(&self, n: usize) -> usize {
        match self {
            IndexSelection::All => n,
            IndexSelection::Range { lo, hi } => hi - lo + 1,
            IndexSelection::Indices(indices) => indices.len(),
        }
    }
}

/// Longitude and latitude selections of an FV grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FvSelection {
    pub lon: IndexSelection,
    pub lat: IndexSelection,
}

impl FvSelection {
    /// Row-major `(lat, lon)` mask of selected cells.
    pub fn mask(&self, nlat: usize, nlon: usize) -> Vec<bool> {
        let mut lat_in = vec![false; nlat];
        let mut lon_in = vec![false; nlon];
        self.lat.indices(nlat).into_iter().for_each(|j| lat_in[j] = true);
        self.lon.indices(nlon).into_iter().for_each(|i| lon_in[i] = true);
        (0..nlat)
            .flat_map(|j| (0..nlon).map(move |i| (j, i)))
            .map(|(j, i)| lat_in[j] && lon_in[i])
            .collect()
    }
}

pub fn select_fv(grid: &FvGrid, region: &RegionBounds) -> FvSelection {
    if region.is_global() {
        return FvSelection {
            lon: IndexSelection::All,
            lat: IndexSelection::All,
        };
    }
    let mut lon = grid.lon.to_vec();
    if region.needs_wrap(&lon) {
        wrap_longitudes(&mut lon);
    }
    let lat = grid.lat.to_vec();
    let select = |values: &[f64], inside: &dyn Fn(f64) -> bool| {
        IndexSelection::from_indices(
            values
                .iter()
                .enumerate()
                .filter(|(_, v)| inside(**v))
                .map(|(i, _)| i)
                .collect(),
        )
    };
    FvSelection {
        lon: select(&lon, &|v| region.contains_lon(v)),
        lat: select(&lat, &|v| region.contains_lat(v)),
    }
}

/// Copy of the mesh with centres and corners wrapped to `[-180, 180)`.
pub fn wrapped_mesh(mesh: &SeMesh) -> SeMesh {
    let mut wrapped = mesh.clone();
    for lon in wrapped.center_lon.iter_mut().filter(|lon| **lon >= 180.0) {
        *lon -= 360.0;
    }
    if let Some(corners) = wrapped.corner_lon.as_mut() {
        for lon in corners.iter_mut().filter(|lon| **lon >= 180.0) {
            *lon -= 360.0;
        }
    }
    wrapped
}

pub fn select_se(mesh: &SeMesh, region: &RegionBounds) -> IndexSelection {
    if region.is_global() {
        return IndexSelection::All;
    }
    let wrapped;
    let mesh = match mesh.center_lon.as_slice() {
        Some(lon) if region.needs_wrap(lon) => {
            wrapped = wrapped_mesh(mesh);
            &wrapped
        }
        _ => mesh,
    };
    IndexSelection::Indices(
        mesh.center_lon
            .iter()
            .zip(mesh.center_lat.iter())
            .enumerate()
            .filter(|(_, (lon, lat))| region.contains_lon(**lon) && region.contains_lat(**lat))
            .map(|(i, _)| i)
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_degree() -> FvGrid {
        FvGrid::regular(-180.0, 1.0, 360, -90.0, 1.0, 181).unwrap()
    }

    #[test]
    fn box_selects_inclusive_ranges() {
        let region = RegionBounds::new(Some([-10.0, 10.0]), Some([-5.0, 5.0]));
        let selection = select_fv(&one_degree(), &region);
        assert_eq!(selection.lon.count(360), 21);
        assert_eq!(selection.lat.count(181), 11);
        assert_eq!(selection.lon, IndexSelection::Range { lo: 170, hi: 190 });
    }

    #[test]
    fn default_region_skips_subsetting() {
        let selection = select_fv(&one_degree(), &RegionBounds::default());
        assert_eq!(selection.lon, IndexSelection::All);
        assert!(RegionBounds::new(None, None).is_global());
        assert!(!RegionBounds::new(None, Some([0.0, 10.0])).is_global());
    }

    #[test]
    fn native_0_360_longitudes_wrap() {
        let native = FvGrid::regular(0.0, 1.0, 360, -90.0, 1.0, 181).unwrap();
        let shifted = one_degree();

        let full = RegionBounds::new(Some([-180.0, 180.0]), Some([-90.0, 90.0]));
        assert_eq!(select_fv(&native, &full), select_fv(&shifted, &full));

        let region = RegionBounds::new(Some([-10.0, 10.0]), Some([-5.0, 5.0]));
        let a = select_fv(&native, &region);
        let b = select_fv(&shifted, &region);
        assert_eq!(a.lon.count(360), b.lon.count(360));
        assert_eq!(a.lat, b.lat);

        let mut native_lons: Vec<f64> = a.lon.indices(360).iter().map(|&i| native.lon[i]).collect();
        wrap_longitudes(&mut native_lons);
        native_lons.sort_by(|x, y| x.total_cmp(y));
        let shifted_lons: Vec<f64> = b.lon.indices(360).iter().map(|&i| shifted.lon[i]).collect();
        assert_eq!(native_lons, shifted_lons);
        // 0..=10 and 350..=359 are not adjacent in native order
        assert!(matches!(a.lon, IndexSelection::Indices(_)));
    }

    #[test]
    fn se_selection_is_an_index_set() {
        let mesh = SeMesh::new(vec![0.0, 90.0, 355.0, 5.0], vec![0.0, 0.0, 1.0, 60.0]).unwrap();
        let region = RegionBounds::new(Some([-10.0, 10.0]), Some([-5.0, 5.0]));
        assert_eq!(select_se(&mesh, &region), IndexSelection::Indices(vec![0, 2]));
    }

    #[test]
    fn mask_marks_the_box() {
        let selection = FvSelection {
            lon: IndexSelection::Range { lo: 1, hi: 1 },
            lat: IndexSelection::Indices(vec![0]),
        };
        assert_eq!(selection.mask(2, 3), vec![false, true, false, false, false, false]);
    }
}
