// Tile bounding box clipping for rings and open roads.
//
// Rings are clipped through `geo` boolean intersection so a concave outer
// that leaves and re-enters the tile yields several disjoint pieces. Roads
// use Liang-Barsky segment clipping and keep the identity of every point
// that was already inside the tile.

use crate::bbox::BBox;
use crate::coord::{Coord, CoordPool};
use crate::geometry::{from_geo_ring, to_geo_polygon};
use geo::{BooleanOps, Polygon};

/// Outcome of clipping a closed ring against a tile box.
#[derive(Debug)]
pub enum RingClip {
    /// Every point lies inside the box, the ring is usable unchanged.
    Inside,
    /// The ring cannot overlap the box.
    Outside,
    /// The overlapping parts, in high precision `geo` space.
    Pieces(Vec<Polygon<f64>>),
}

/// Clips a closed ring to the bbox.
pub fn clip_ring(ring: &[Coord], bbox: &BBox) -> RingClip {
    if ring.is_empty() {
        return RingClip::Outside;
    }

    // If all nodes are inside the bbox, return unchanged
    if ring.iter().all(|c| bbox.contains(c)) {
        return RingClip::Inside;
    }

    if is_ring_outside_bbox(ring, bbox) {
        return RingClip::Outside;
    }

    let pieces = bbox.to_geo_polygon().intersection(&to_geo_polygon(ring));
    if pieces.0.is_empty() {
        return RingClip::Outside;
    }
    RingClip::Pieces(pieces.0)
}

/// Clips a closed ring to the bbox and returns the pieces as interned rings.
///
/// A ring fully inside comes back unchanged, one fully outside yields nothing.
pub fn clip_ring_to_bbox(ring: &[Coord], bbox: &BBox, pool: &mut CoordPool) -> Vec<Vec<Coord>> {
    match clip_ring(ring, bbox) {
        RingClip::Inside => vec![ring.to_vec()],
        RingClip::Outside => Vec::new(),
        RingClip::Pieces(pieces) => pieces
            .iter()
            .filter_map(|p| from_geo_ring(p.exterior(), pool))
            .collect(),
    }
}

/// Clips an open polyline to the bbox, one polyline per contiguous inside run.
pub fn clip_line_to_bbox(points: &[Coord], bbox: &BBox, pool: &mut CoordPool) -> Vec<Vec<Coord>> {
    if points.len() < 2 {
        return Vec::new();
    }

    if points.iter().all(|c| bbox.contains(c)) {
        return vec![points.to_vec()];
    }

    let mut lines: Vec<Vec<Coord>> = Vec::new();
    let mut current: Vec<Coord> = Vec::new();

    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let Some((t0, t1)) = liang_barsky(a, b, bbox) else {
            flush_line(&mut current, &mut lines);
            continue;
        };

        let start = if t0 <= 0.0 {
            a
        } else {
            interpolate(a, b, t0, pool)
        };
        let end = if t1 >= 1.0 {
            b
        } else {
            interpolate(a, b, t1, pool)
        };

        if current.last() != Some(&start) {
            flush_line(&mut current, &mut lines);
            current.push(start);
        }
        if end != start {
            current.push(end);
        }

        // Leaving the box ends this run
        if t1 < 1.0 {
            flush_line(&mut current, &mut lines);
        }
    }
    flush_line(&mut current, &mut lines);

    lines
}

// ============================================================================
// Internal helpers
// ============================================================================

/// Checks if an entire ring is outside the bbox.
fn is_ring_outside_bbox(ring: &[Coord], bbox: &BBox) -> bool {
    let all_south = ring.iter().all(|c| c.lat_hp() < bbox.min_lat());
    let all_north = ring.iter().all(|c| c.lat_hp() > bbox.max_lat());
    let all_west = ring.iter().all(|c| c.lon_hp() < bbox.min_lon());
    let all_east = ring.iter().all(|c| c.lon_hp() > bbox.max_lon());
    all_south || all_north || all_west || all_east
}

/// Parametric range `[t0, t1]` of segment `a -> b` inside the bbox.
fn liang_barsky(a: Coord, b: Coord, bbox: &BBox) -> Option<(f64, f64)> {
    let (x0, y0) = (f64::from(a.lon_hp()), f64::from(a.lat_hp()));
    let dx = f64::from(b.lon_hp()) - x0;
    let dy = f64::from(b.lat_hp()) - y0;

    let checks = [
        (-dx, x0 - f64::from(bbox.min_lon())),
        (dx, f64::from(bbox.max_lon()) - x0),
        (-dy, y0 - f64::from(bbox.min_lat())),
        (dy, f64::from(bbox.max_lat()) - y0),
    ];

    let mut t0: f64 = 0.0;
    let mut t1: f64 = 1.0;
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}

fn interpolate(a: Coord, b: Coord, t: f64, pool: &mut CoordPool) -> Coord {
    let lat = f64::from(a.lat_hp()) + t * (f64::from(b.lat_hp()) - f64::from(a.lat_hp()));
    let lon = f64::from(a.lon_hp()) + t * (f64::from(b.lon_hp()) - f64::from(a.lon_hp()));
    pool.intern(lat.round() as i32, lon.round() as i32)
}

fn flush_line(current: &mut Vec<Coord>, lines: &mut Vec<Vec<Coord>>) {
    if current.len() >= 2 {
        lines.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::signed_area_x2;

    #[test]
    fn test_ring_inside_and_outside() {
        let mut pool = CoordPool::new();
        let bbox = BBox::new(0, 0, 100, 100).unwrap();
        let inside: Vec<Coord> = [(10, 10), (20, 10), (20, 20), (10, 10)]
            .iter()
            .map(|&(a, b)| pool.intern_map_units(a, b))
            .collect();
        let outside: Vec<Coord> = [(200, 10), (220, 10), (220, 20), (200, 10)]
            .iter()
            .map(|&(a, b)| pool.intern_map_units(a, b))
            .collect();

        assert!(matches!(clip_ring(&inside, &bbox), RingClip::Inside));
        assert!(matches!(clip_ring(&outside, &bbox), RingClip::Outside));
    }

    #[test]
    fn test_concave_ring_clips_into_two_pieces() {
        let mut pool = CoordPool::new();
        let bbox = BBox::new(0, 0, 100, 100).unwrap();
        // A U opening to the north whose arms poke out of the tile, its base
        // outside the tile to the north as well
        let u: Vec<Coord> = [
            (50, 10),
            (150, 10),
            (150, 90),
            (50, 90),
            (50, 70),
            (120, 70),
            (120, 30),
            (50, 30),
            (50, 10),
        ]
        .iter()
        .map(|&(a, b)| pool.intern_map_units(a, b))
        .collect();

        let RingClip::Pieces(pieces) = clip_ring(&u, &bbox) else {
            panic!("expected pieces");
        };
        assert_eq!(pieces.len(), 2);

        let total: i128 = pieces
            .iter()
            .map(|p| signed_area_x2(&from_geo_ring(p.exterior(), &mut pool).unwrap()).abs())
            .sum();
        // two 50x20 arms inside the tile
        assert_eq!(total, 2 * 2 * 50 * 20 * 64 * 64);
    }

    #[test]
    fn test_clip_ring_to_bbox_returns_interned_rings() {
        let mut pool = CoordPool::new();
        let bbox = BBox::new(0, 0, 100, 100).unwrap();
        let square: Vec<Coord> = [(50, 50), (150, 50), (150, 80), (50, 80), (50, 50)]
            .iter()
            .map(|&(a, b)| pool.intern_map_units(a, b))
            .collect();

        let rings = clip_ring_to_bbox(&square, &bbox, &mut pool);
        assert_eq!(rings.len(), 1);
        assert_eq!(signed_area_x2(&rings[0]).abs(), 2 * 50 * 30 * 64 * 64);
        // the corners inside the tile keep their handles
        assert!(rings[0].contains(&square[0]));
        assert!(rings[0].contains(&square[3]));
    }

    #[test]
    fn test_line_clipping_keeps_inner_identity() {
        let mut pool = CoordPool::new();
        let bbox = BBox::new(0, 0, 100, 100).unwrap();
        let a = pool.intern_map_units(50, -50);
        let b = pool.intern_map_units(50, 50);
        let c = pool.intern_map_units(50, 150);

        let lines = clip_line_to_bbox(&[a, b, c], &bbox, &mut pool);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 3);
        assert_eq!(lines[0][1], b);
        assert_eq!(lines[0][0].lon(), 0);
        assert_eq!(lines[0][2].lon(), 100);
    }

    #[test]
    fn test_line_leaving_and_reentering() {
        let mut pool = CoordPool::new();
        let bbox = BBox::new(0, 0, 100, 100).unwrap();
        let pts: Vec<Coord> = [(50, 10), (150, 10), (150, 90), (50, 90)]
            .iter()
            .map(|&(a, b)| pool.intern_map_units(a, b))
            .collect();

        let lines = clip_line_to_bbox(&pts, &bbox, &mut pool);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0][0], pts[0]);
        assert_eq!(lines[0][1].lat(), 100);
        assert_eq!(lines[1][1], pts[3]);
    }
}
