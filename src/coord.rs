//! Per-tile coordinate table.
//!
//! Every position used by a tile is interned once into a [`CoordPool`]. The
//! pool hands out [`Coord`] values carrying a [`CoordId`] handle, and all
//! topology decisions ("is this the same point?") compare handles, never
//! positions. Two ways passing through the same node therefore share the
//! same handle, which is what the shape merger and the overlap remover rely on.

use fnv::FnvHashMap;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Number of extra bits a high precision coordinate carries compared to a map unit.
pub const HIGH_PREC_SHIFT: u32 = 6;

/// Largest absolute latitude/longitude in 24 bit map units.
pub const MAX_MAP_UNITS: i32 = 1 << 23;

/// Handle of a point in its tile's [`CoordPool`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CoordId(u32);

impl CoordId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An interned point. Latitude and longitude are stored in high precision
/// units (map units shifted left by [`HIGH_PREC_SHIFT`]).
#[derive(Copy, Clone, Debug)]
pub struct Coord {
    id: CoordId,
    lat_hp: i32,
    lon_hp: i32,
}

impl Coord {
    pub fn id(&self) -> CoordId {
        self.id
    }

    pub fn lat_hp(&self) -> i32 {
        self.lat_hp
    }

    pub fn lon_hp(&self) -> i32 {
        self.lon_hp
    }

    /// Latitude rounded to 24 bit map units.
    pub fn lat(&self) -> i32 {
        to_map_units(self.lat_hp)
    }

    /// Longitude rounded to 24 bit map units.
    pub fn lon(&self) -> i32 {
        to_map_units(self.lon_hp)
    }
}

impl PartialEq for Coord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Coord {}

impl Hash for Coord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coord#{}({}, {})", self.id.0, self.lat(), self.lon())
    }
}

pub fn to_high_prec(map_units: i32) -> i32 {
    map_units << HIGH_PREC_SHIFT
}

pub fn to_map_units(high_prec: i32) -> i32 {
    (high_prec + (1 << (HIGH_PREC_SHIFT - 1))) >> HIGH_PREC_SHIFT
}

/// Canonical point table for one tile.
///
/// Not shared between tiles: each tile processing run owns its pool.
#[derive(Debug, Default)]
pub struct CoordPool {
    ids: FnvHashMap<(i32, i32), CoordId>,
    coords: Vec<Coord>,
}

impl CoordPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical coord for a high precision position, creating it on first use.
    pub fn intern(&mut self, lat_hp: i32, lon_hp: i32) -> Coord {
        if let Some(id) = self.ids.get(&(lat_hp, lon_hp)) {
            return self.coords[id.index()];
        }
        let coord = Coord {
            id: CoordId(self.coords.len() as u32),
            lat_hp,
            lon_hp,
        };
        self.ids.insert((lat_hp, lon_hp), coord.id);
        self.coords.push(coord);
        coord
    }

    pub fn intern_map_units(&mut self, lat: i32, lon: i32) -> Coord {
        self.intern(to_high_prec(lat), to_high_prec(lon))
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }
}

/// Caller-owned scratch counter of how many ways/shapes touch a coord.
///
/// Built fresh for each engine invocation so no count leaks between calls.
#[derive(Debug, Default)]
pub struct CoordUsage {
    counts: FnvHashMap<CoordId, u32>,
}

impl CoordUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, coord: &Coord) {
        *self.counts.entry(coord.id).or_insert(0) += 1;
    }

    pub fn count(&self, coord: &Coord) -> u32 {
        self.counts.get(&coord.id).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
