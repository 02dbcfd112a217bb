//! Turns an outer ring with holes into hole-free polygons.
//!
//! The outer is clipped to the tile box, then each piece is processed from a
//! work queue: the holes lying across one chosen cut line are subtracted, and
//! if the remainder still has holes or fell apart, it is split in two along
//! that line and the halves are queued again with the holes they overlap.
//! Every step consumes at least one hole, so the queue drains after at most
//! a number of splits proportional to the number of holes.

use crate::bbox::BBox;
use crate::clipping::{clip_ring, RingClip};
use crate::config::CutConfig;
use crate::coord::{to_high_prec, Coord, CoordPool};
use crate::geometry::{from_geo_ring, is_closed, to_geo_polygon};
use geo::{BooleanOps, LineString, MultiPolygon, Polygon, Rect};
use log::{debug, warn};
use std::collections::VecDeque;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Axis {
    /// Cut along a line of constant longitude.
    Lon,
    /// Cut along a line of constant latitude.
    Lat,
}

/// Bounds of a `geo` polygon, x = longitude, y = latitude.
#[derive(Copy, Clone, Debug)]
struct Extent {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Extent {
    fn of_ring(ring: &LineString<f64>) -> Option<Self> {
        let mut coords = ring.coords();
        let first = coords.next()?;
        let mut extent = Extent {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for c in coords {
            extent.min_x = extent.min_x.min(c.x);
            extent.min_y = extent.min_y.min(c.y);
            extent.max_x = extent.max_x.max(c.x);
            extent.max_y = extent.max_y.max(c.y);
        }
        Some(extent)
    }

    fn of_multi(polygons: &[Polygon<f64>]) -> Option<Self> {
        polygons
            .iter()
            .filter_map(|p| Extent::of_ring(p.exterior()))
            .reduce(|a, b| Extent {
                min_x: a.min_x.min(b.min_x),
                min_y: a.min_y.min(b.min_y),
                max_x: a.max_x.max(b.max_x),
                max_y: a.max_y.max(b.max_y),
            })
    }

    fn intersects(&self, other: &Extent) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    fn start(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Lon => self.min_x,
            Axis::Lat => self.min_y,
        }
    }

    fn stop(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Lon => self.max_x,
            Axis::Lat => self.max_y,
        }
    }

    fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

struct Hole {
    polygon: Polygon<f64>,
    extent: Extent,
}

struct WorkItem {
    piece: Polygon<f64>,
    /// Indexes into the hole arena.
    holes: Vec<usize>,
}

#[derive(Debug, PartialEq)]
struct CutLine {
    axis: Axis,
    value: f64,
    /// Open interval the value may move in and still cross every hole of the window.
    span: (f64, f64),
    window: Vec<usize>,
}

/// How far, in high precision units, a cut may move to land on an exact crossing.
const EXACT_CUT_SEARCH: i64 = 64;

/// Ranking of a candidate cut window. More holes first, then a cut on the
/// grid, then a wider overlap span.
#[derive(Copy, Clone, Debug)]
struct CutScore {
    holes: usize,
    on_grid: bool,
    span: f64,
}

impl CutScore {
    fn beats(&self, other: &CutScore) -> bool {
        if self.holes != other.holes {
            return self.holes > other.holes;
        }
        if self.on_grid != other.on_grid {
            return self.on_grid;
        }
        self.span > other.span
    }
}

/// Cuts `outer` minus `holes` into simple polygons clipped to `bbox`.
///
/// Malformed pieces are dropped with a log line. The only error is the
/// iteration cap, which indicates input the caller should skip.
pub fn cut(
    outer: &[Coord],
    holes: &[Vec<Coord>],
    bbox: &BBox,
    config: &CutConfig,
    pool: &mut CoordPool,
) -> Result<Vec<Vec<Coord>>, String> {
    if outer.len() < 4 || !is_closed(outer) {
        warn!("Outer ring with {} points is not closed, skipped", outer.len());
        return Ok(Vec::new());
    }

    let pieces: Vec<Polygon<f64>> = match clip_ring(outer, bbox) {
        RingClip::Outside => return Ok(Vec::new()),
        RingClip::Inside if holes.is_empty() => return Ok(vec![outer.to_vec()]),
        RingClip::Inside => vec![to_geo_polygon(outer)],
        RingClip::Pieces(pieces) => pieces,
    };

    let mut cutter = Cutter {
        arena: Vec::new(),
        queue: VecDeque::new(),
        output: Vec::new(),
        grid: f64::from(to_high_prec(config.grid)),
        pool,
    };

    for hole in holes {
        if hole.len() < 4 || !is_closed(hole) {
            debug!("Dropping unclosed hole with {} points", hole.len());
            continue;
        }
        cutter.add_hole(to_geo_polygon(hole));
    }
    let given_holes = cutter.arena.len();

    let mut used = vec![false; given_holes];
    for piece in pieces {
        let extent = Extent::of_ring(piece.exterior());
        let overlapping: Vec<usize> = (0..given_holes)
            .filter(|&h| {
                extent.is_some_and(|e| e.intersects(&cutter.arena[h].extent))
            })
            .collect();
        for &h in &overlapping {
            used[h] = true;
        }
        cutter.enqueue(piece, overlapping);
    }

    let dropped = used.iter().filter(|u| !**u).count();
    if dropped > 0 {
        debug!("{dropped} hole(s) do not overlap the outer ring and were dropped");
    }

    let mut iterations = 0;
    while let Some(item) = cutter.queue.pop_front() {
        iterations += 1;
        if iterations > config.max_iterations {
            return Err(format!(
                "Area cutting gave up after {} iterations ({} holes)",
                config.max_iterations,
                holes.len()
            ));
        }
        cutter.process(item);
    }

    Ok(cutter.output)
}

struct Cutter<'a> {
    arena: Vec<Hole>,
    queue: VecDeque<WorkItem>,
    output: Vec<Vec<Coord>>,
    /// Grid in high precision units.
    grid: f64,
    pool: &'a mut CoordPool,
}

impl Cutter<'_> {
    fn add_hole(&mut self, polygon: Polygon<f64>) -> Option<usize> {
        let extent = Extent::of_ring(polygon.exterior())?;
        self.arena.push(Hole { polygon, extent });
        Some(self.arena.len() - 1)
    }

    /// Queues a piece, turning its own interior rings into holes first.
    fn enqueue(&mut self, piece: Polygon<f64>, mut holes: Vec<usize>) {
        let (exterior, interiors) = piece.into_inner();
        for interior in interiors {
            if let Some(h) = self.add_hole(Polygon::new(interior, vec![])) {
                holes.push(h);
            }
        }
        let piece = Polygon::new(exterior, vec![]);
        if holes.is_empty() {
            self.emit(&piece);
        } else {
            self.queue.push_back(WorkItem { piece, holes });
        }
    }

    fn emit(&mut self, piece: &Polygon<f64>) {
        match from_geo_ring(piece.exterior(), self.pool) {
            Some(ring) => self.output.push(ring),
            None => debug!("Discarding degenerate piece"),
        }
    }

    fn process(&mut self, item: WorkItem) {
        let cut_line = choose_cut(&item.holes, &self.arena, self.grid);
        let remaining: Vec<usize> = item
            .holes
            .iter()
            .copied()
            .filter(|h| !cut_line.window.contains(h))
            .collect();

        let mut rings = vec![item.piece.exterior()];
        rings.extend(cut_line.window.iter().map(|&h| self.arena[h].polygon.exterior()));
        let value = exact_cut_value(cut_line.value, cut_line.span, cut_line.axis, &rings);

        let cutters = MultiPolygon::new(
            cut_line
                .window
                .iter()
                .map(|&h| self.arena[h].polygon.clone())
                .collect(),
        );
        let rest = MultiPolygon::new(vec![item.piece]).difference(&cutters);
        if rest.0.is_empty() {
            debug!("Piece vanished after subtracting {} hole(s)", cut_line.window.len());
            return;
        }

        if rest.0.len() == 1 && rest.0[0].interiors().is_empty() {
            let part = rest.0.into_iter().next().map(|p| self.holes_for(p, &remaining));
            if let Some((part, holes)) = part {
                self.enqueue(part, holes);
            }
            return;
        }

        let Some(extent) = Extent::of_multi(&rest.0) else {
            return;
        };
        for half in split_extent(&extent, cut_line.axis, value) {
            let parts = half.to_polygon().intersection(&rest);
            for part in parts.0 {
                let (part, holes) = self.holes_for(part, &remaining);
                self.enqueue(part, holes);
            }
        }
    }

    /// Pairs a part with the not yet consumed holes overlapping it.
    fn holes_for(&self, part: Polygon<f64>, remaining: &[usize]) -> (Polygon<f64>, Vec<usize>) {
        let holes = match Extent::of_ring(part.exterior()) {
            Some(extent) => remaining
                .iter()
                .copied()
                .filter(|&h| extent.intersects(&self.arena[h].extent))
                .collect(),
            None => Vec::new(),
        };
        (part, holes)
    }
}

/// Picks the cut axis, coordinate and the holes it goes through.
fn choose_cut(holes: &[usize], arena: &[Hole], grid: f64) -> CutLine {
    if let [single] = holes {
        let extent = arena[*single].extent;
        // Cut across the narrow side of the hole
        let axis = if extent.width() <= extent.height() {
            Axis::Lon
        } else {
            Axis::Lat
        };
        let span = (extent.start(axis), extent.stop(axis));
        return CutLine {
            axis,
            value: cut_value(span.0, span.1, grid),
            span,
            window: vec![*single],
        };
    }

    let mut best: Option<(CutScore, CutLine)> = None;
    for axis in [Axis::Lon, Axis::Lat] {
        let mut sorted = holes.to_vec();
        sorted.sort_by(|a, b| {
            arena[*a]
                .extent
                .start(axis)
                .total_cmp(&arena[*b].extent.start(axis))
        });

        let mut window: Vec<usize> = Vec::new();
        for h in sorted {
            let start = arena[h].extent.start(axis);
            window.retain(|w| arena[*w].extent.stop(axis) > start);
            window.push(h);

            let stop = window
                .iter()
                .map(|w| arena[*w].extent.stop(axis))
                .fold(f64::INFINITY, f64::min);
            let value = cut_value(start, stop, grid);
            let score = CutScore {
                holes: window.len(),
                on_grid: is_on_grid(value, grid),
                span: stop - start,
            };
            if best.as_ref().is_none_or(|(b, _)| score.beats(b)) {
                best = Some((
                    score,
                    CutLine {
                        axis,
                        value,
                        span: (start, stop),
                        window: window.clone(),
                    },
                ));
            }
        }
    }

    match best {
        Some((_, cut_line)) => cut_line,
        // unreachable with a non-empty hole list, fall back to the first hole alone
        None => choose_cut(&holes[..1], arena, grid),
    }
}

/// Midpoint of `[lo, hi]`, kept on whole units and moved onto the grid when
/// the grid point still lies strictly inside the span.
fn cut_value(lo: f64, hi: f64, grid: f64) -> f64 {
    let mut value = ((lo + hi) / 2.0).round();
    if !(lo < value && value < hi) {
        value = (lo + hi) / 2.0;
    }
    if grid > 0.0 {
        let snapped = (value / grid).round() * grid;
        if lo < snapped && snapped < hi {
            value = snapped;
        }
    }
    value
}

/// Moves `value` to the nearest whole coordinate inside `span` where every
/// edge of `rings` crosses the cut line on whole units, so splitting there
/// adds no rounded points. Keeps `value` when none is within reach.
fn exact_cut_value(value: f64, span: (f64, f64), axis: Axis, rings: &[&LineString<f64>]) -> f64 {
    let edges: Vec<((i64, i64), (i64, i64))> = rings
        .iter()
        .flat_map(|r| r.lines())
        .map(|l| (along_across(l.start, axis), along_across(l.end, axis)))
        .filter(|(a, b)| a.0 != b.0)
        .collect();
    let is_exact = |v: i64| {
        edges.iter().all(|&((a0, a1), (b0, b1))| {
            v <= a0.min(b0) || v >= a0.max(b0) || ((v - a0) * (b1 - a1)) % (b0 - a0) == 0
        })
    };

    let start = value.round() as i64;
    for step in 0..=EXACT_CUT_SEARCH {
        for v in [start - step, start + step] {
            let inside = span.0 < v as f64 && (v as f64) < span.1;
            if inside && is_exact(v) {
                return v as f64;
            }
        }
    }
    value
}

/// Rounded position as (coordinate fixed by the cut, the other one).
fn along_across(c: geo::Coord<f64>, axis: Axis) -> (i64, i64) {
    let (x, y) = (c.x.round() as i64, c.y.round() as i64);
    match axis {
        Axis::Lon => (x, y),
        Axis::Lat => (y, x),
    }
}

fn is_on_grid(value: f64, grid: f64) -> bool {
    grid > 0.0 && value % grid == 0.0
}

/// The two halves of `extent` on either side of the cut line. A half with no
/// width is left out.
fn split_extent(extent: &Extent, axis: Axis, value: f64) -> Vec<Rect<f64>> {
    let (lo, hi) = (extent.start(axis), extent.stop(axis));
    let value = value.clamp(lo, hi);
    let mut halves = Vec::with_capacity(2);
    match axis {
        Axis::Lon => {
            if value > lo {
                halves.push(Rect::new(
                    (extent.min_x, extent.min_y),
                    (value, extent.max_y),
                ));
            }
            if value < hi {
                halves.push(Rect::new(
                    (value, extent.min_y),
                    (extent.max_x, extent.max_y),
                ));
            }
        }
        Axis::Lat => {
            if value > lo {
                halves.push(Rect::new(
                    (extent.min_x, extent.min_y),
                    (extent.max_x, value),
                ));
            }
            if value < hi {
                halves.push(Rect::new(
                    (extent.min_x, value),
                    (extent.max_x, extent.max_y),
                ));
            }
        }
    }
    halves
}
