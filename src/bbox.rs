use crate::coord::{to_high_prec, Coord, MAX_MAP_UNITS};
use geo::{LineString, Polygon};

/// A checked bounding box, stored in high precision units.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BBox {
    min_lat: i32,
    min_lon: i32,
    max_lat: i32,
    max_lon: i32,
}

impl BBox {
    /// Builds a tile box from 24 bit map units.
    pub fn new(min_lat: i32, min_lon: i32, max_lat: i32, max_lon: i32) -> Result<Self, String> {
        let vals_in_order = min_lat < max_lat && min_lon < max_lon;
        if !vals_in_order {
            return Err(format!(
                "Invalid BBox: ({min_lat}, {min_lon}) is not below-left of ({max_lat}, {max_lon})"
            ));
        }

        let in_range = |v: i32| (-MAX_MAP_UNITS..=MAX_MAP_UNITS).contains(&v);
        if ![min_lat, min_lon, max_lat, max_lon].into_iter().all(in_range) {
            return Err(format!(
                "Invalid BBox: values must lie within +-{MAX_MAP_UNITS} map units"
            ));
        }

        Ok(Self {
            min_lat: to_high_prec(min_lat),
            min_lon: to_high_prec(min_lon),
            max_lat: to_high_prec(max_lat),
            max_lon: to_high_prec(max_lon),
        })
    }

    /// Bounds of a point list. Returns `None` for an empty list.
    pub fn of_points(points: &[Coord]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self {
            min_lat: first.lat_hp(),
            min_lon: first.lon_hp(),
            max_lat: first.lat_hp(),
            max_lon: first.lon_hp(),
        };
        for p in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(p.lat_hp());
            bbox.min_lon = bbox.min_lon.min(p.lon_hp());
            bbox.max_lat = bbox.max_lat.max(p.lat_hp());
            bbox.max_lon = bbox.max_lon.max(p.lon_hp());
        }
        Some(bbox)
    }

    pub fn min_lat(&self) -> i32 {
        self.min_lat
    }

    pub fn min_lon(&self) -> i32 {
        self.min_lon
    }

    pub fn max_lat(&self) -> i32 {
        self.max_lat
    }

    pub fn max_lon(&self) -> i32 {
        self.max_lon
    }

    #[inline]
    pub fn contains(&self, coord: &Coord) -> bool {
        coord.lat_hp() >= self.min_lat
            && coord.lat_hp() <= self.max_lat
            && coord.lon_hp() >= self.min_lon
            && coord.lon_hp() <= self.max_lon
    }

    /// True when the boxes share at least one point (touching edges count).
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
            && self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
    }

    /// The box as a `geo` polygon with x = longitude and y = latitude.
    pub fn to_geo_polygon(&self) -> Polygon<f64> {
        let (x0, y0) = (f64::from(self.min_lon), f64::from(self.min_lat));
        let (x1, y1) = (f64::from(self.max_lon), f64::from(self.max_lat));
        Polygon::new(
            LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]),
            vec![],
        )
    }
}
