//! Exact ring arithmetic on interned coords and the conversions to and from `geo`.

use crate::coord::{Coord, CoordPool};
use geo::{Coord as GeoCoord, LineString, Polygon};

/// Twice the enclosed area of a closed ring in high precision units.
///
/// Positive for clockwise rings (latitude pointing north), negative for
/// counter-clockwise ones. Accumulated in `i128` so no ring can overflow.
pub fn signed_area_x2(points: &[Coord]) -> i128 {
    points
        .windows(2)
        .map(|pair| {
            let (c1, c2) = (pair[0], pair[1]);
            i128::from(i64::from(c1.lon_hp()) + i64::from(c2.lon_hp()))
                * i128::from(i64::from(c1.lat_hp()) - i64::from(c2.lat_hp()))
        })
        .sum()
}

/// A ring is closed when its first and last entries are the same coord.
pub fn is_closed(points: &[Coord]) -> bool {
    points.len() >= 2 && points.first() == points.last()
}

/// True for a closed ring with at least 3 distinct points and a non-zero area.
pub fn is_valid_ring(points: &[Coord]) -> bool {
    points.len() >= 4 && is_closed(points) && signed_area_x2(points) != 0
}

pub fn remove_consecutive_duplicates(points: &mut Vec<Coord>) {
    points.dedup();
}

/// Default angle cleanup for a closed ring.
///
/// Drops repeated points, zero width spikes (`a, b, a`) and exactly collinear
/// points lying between their neighbours. The ring stays closed. Returns an
/// empty list if nothing valid is left.
pub fn fix_wrong_angles(points: &[Coord]) -> Vec<Coord> {
    let mut ring: Vec<Coord> = points.to_vec();
    remove_consecutive_duplicates(&mut ring);
    if is_closed(&ring) {
        ring.pop();
    }

    let mut changed = true;
    while changed && ring.len() >= 3 {
        changed = false;
        let mut i = 0;
        while i < ring.len() && ring.len() >= 3 {
            let n = ring.len();
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            if prev == next || prev == cur || is_straight(prev, cur, next) {
                ring.remove(i);
                if prev == next && ring.len() >= 2 {
                    // the spike tip is gone, its base is now doubled
                    let idx = if i == 0 { ring.len() - 1 } else { i - 1 };
                    ring.remove(idx);
                }
                changed = true;
            } else {
                i += 1;
            }
        }
    }

    if ring.len() < 3 {
        return Vec::new();
    }
    ring.push(ring[0]);
    ring
}

/// `cur` lies exactly on the segment `prev -> next`.
fn is_straight(prev: Coord, cur: Coord, next: Coord) -> bool {
    let (ax, ay) = (i64::from(prev.lon_hp()), i64::from(prev.lat_hp()));
    let (bx, by) = (i64::from(cur.lon_hp()), i64::from(cur.lat_hp()));
    let (cx, cy) = (i64::from(next.lon_hp()), i64::from(next.lat_hp()));
    let cross = (bx - ax) * (cy - ay) - (by - ay) * (cx - ax);
    if cross != 0 {
        return false;
    }
    let dot = (bx - ax) * (cx - bx) + (by - ay) * (cy - by);
    dot > 0
}

/// Exact even-odd point-in-ring test. Points on the boundary count as outside.
pub fn ring_contains_point(ring: &[Coord], point: &Coord) -> bool {
    let px = i128::from(point.lon_hp());
    let py = i128::from(point.lat_hp());
    let mut inside = false;
    for pair in ring.windows(2) {
        let (ax, ay) = (i128::from(pair[0].lon_hp()), i128::from(pair[0].lat_hp()));
        let (bx, by) = (i128::from(pair[1].lon_hp()), i128::from(pair[1].lat_hp()));
        if (ay > py) != (by > py) {
            // x of the crossing compared against px without dividing
            let lhs = (px - ax) * (by - ay);
            let rhs = (bx - ax) * (py - ay);
            let crosses = if by > ay { lhs < rhs } else { lhs > rhs };
            if crosses {
                inside = !inside;
            }
        }
    }
    inside
}

pub fn to_geo_line_string(points: &[Coord]) -> LineString<f64> {
    points
        .iter()
        .map(|p| GeoCoord {
            x: f64::from(p.lon_hp()),
            y: f64::from(p.lat_hp()),
        })
        .collect()
}

pub fn to_geo_polygon(ring: &[Coord]) -> Polygon<f64> {
    Polygon::new(to_geo_line_string(ring), vec![])
}

/// Rounds a `geo` ring back onto the high precision grid and interns it.
///
/// Returns `None` when fewer than 3 distinct points survive the rounding.
pub fn from_geo_ring(line: &LineString<f64>, pool: &mut CoordPool) -> Option<Vec<Coord>> {
    let mut points: Vec<Coord> = line
        .coords()
        .map(|c| pool.intern(c.y.round() as i32, c.x.round() as i32))
        .collect();
    remove_consecutive_duplicates(&mut points);
    if !is_closed(&points) {
        let first = *points.first()?;
        points.push(first);
    }
    if points.len() < 4 || signed_area_x2(&points) == 0 {
        return None;
    }
    Some(points)
}
