//! Fuses polygons of the same kind that share a boundary chain.
//!
//! Shapes are grouped by Garmin type and by a [`ShapePolicy::similar`]
//! predicate. Inside a group every new shape is tried against the shapes
//! accepted so far; a successful merge replaces the accepted shape and the
//! result is tried again against the rest, so a chain of touching polygons
//! collapses in a single call.

use crate::coord::{Coord, CoordId, CoordUsage};
use crate::geometry::{fix_wrong_angles, is_closed, signed_area_x2};
use crate::map_element::{is_label_tag, tags_equal_ignoring_labels, MapShape};
use fnv::FnvHashMap;
use itertools::Itertools;
use log::{debug, info};
use serde::Serialize;

/// Decides which shapes may be merged and how large a merged shape may grow.
pub trait ShapePolicy {
    fn similar(&self, a: &MapShape, b: &MapShape) -> bool;

    /// Largest ring (closing point included) written for this type.
    fn max_points(&self, garmin_type: u32) -> usize;

    /// Cleans up the ring of a shape that was not merged. An empty result drops the shape.
    fn fix_angles(&self, points: &[Coord]) -> Vec<Coord>;
}

pub struct DefaultShapePolicy {
    max_points: usize,
}

impl DefaultShapePolicy {
    pub fn new(max_points: usize) -> Self {
        Self { max_points }
    }
}

impl ShapePolicy for DefaultShapePolicy {
    fn similar(&self, a: &MapShape, b: &MapShape) -> bool {
        if a.garmin_type != b.garmin_type
            || a.min_resolution != b.min_resolution
            || a.max_resolution != b.max_resolution
            || !tags_equal_ignoring_labels(&a.tags, &b.tags)
        {
            return false;
        }
        // a shape without a label yet may join any labelled one
        match (a.label(), b.label()) {
            (Some(la), Some(lb)) => la == lb,
            _ => true,
        }
    }

    fn max_points(&self, _garmin_type: u32) -> usize {
        self.max_points
    }

    fn fix_angles(&self, points: &[Coord]) -> Vec<Coord> {
        fix_wrong_angles(points)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub merged: usize,
    pub duplicates: usize,
    pub rejected_area: usize,
}

impl MergeStats {
    pub fn add(&mut self, other: &MergeStats) {
        self.merged += other.merged;
        self.duplicates += other.duplicates;
        self.rejected_area += other.rejected_area;
    }
}

#[derive(Debug, PartialEq)]
enum MergeOutcome {
    Merged(Vec<Coord>),
    /// Same ring as the accepted shape, the new one is dropped.
    Duplicate,
    NoSharedEdge,
    TooManyPoints,
    AreaMismatch,
    NotClosed,
}

/// A shape plus its position in the input, used to keep the output order stable.
struct Indexed {
    index: usize,
    merged: bool,
    shape: MapShape,
}

/// Merges the shapes visible at `resolution`. Shapes outside that range and
/// shapes already above the point limit are passed through untouched.
pub fn merge(
    shapes: Vec<MapShape>,
    resolution: u8,
    policy: &impl ShapePolicy,
) -> (Vec<MapShape>, MergeStats) {
    let mut stats = MergeStats::default();
    let input_points: usize = shapes.iter().map(|s| s.points.len()).sum();

    let mut output: Vec<Indexed> = Vec::with_capacity(shapes.len());
    let mut groups: Vec<Vec<Indexed>> = Vec::new();
    let mut groups_by_type: FnvHashMap<u32, Vec<usize>> = FnvHashMap::default();

    for (index, shape) in shapes.into_iter().enumerate() {
        let item = Indexed {
            index,
            merged: false,
            shape,
        };
        if !item.shape.visible_at(resolution)
            || item.shape.points.len() > policy.max_points(item.shape.garmin_type)
        {
            output.push(item);
            continue;
        }

        let candidates = groups_by_type.entry(item.shape.garmin_type).or_default();
        let group = candidates
            .iter()
            .copied()
            .find(|&g| policy.similar(&groups[g][0].shape, &item.shape));
        match group {
            Some(g) => groups[g].push(item),
            None => {
                candidates.push(groups.len());
                groups.push(vec![item]);
            }
        }
    }

    for group in groups {
        output.extend(merge_group(group, policy, &mut stats));
    }
    output.sort_by_key(|item| item.index);

    let mut result = Vec::with_capacity(output.len());
    for mut item in output {
        if !item.merged && item.shape.id == 0 && item.shape.visible_at(resolution) {
            let fixed = policy.fix_angles(&item.shape.points);
            if fixed.is_empty() {
                debug!(
                    "Dropping shape of type 0x{:x} left empty by angle cleanup",
                    item.shape.garmin_type
                );
                continue;
            }
            item.shape.points = fixed;
        }
        result.push(item.shape);
    }

    let output_points: usize = result.iter().map(|s| s.points.len()).sum();
    if stats.merged > 0 {
        info!(
            "Merged {} shapes at resolution {resolution}, {} points saved",
            stats.merged,
            input_points.saturating_sub(output_points)
        );
    }
    (result, stats)
}

fn merge_group(
    group: Vec<Indexed>,
    policy: &impl ShapePolicy,
    stats: &mut MergeStats,
) -> Vec<Indexed> {
    let mut usage = CoordUsage::new();
    for item in &group {
        for coord in item.shape.points.iter().unique() {
            usage.increment(coord);
        }
    }

    let mut accepted: Vec<Indexed> = Vec::with_capacity(group.len());
    for item in group {
        // nothing of this shape is touched by another one
        if item.shape.points.iter().all(|c| usage.count(c) < 2) {
            accepted.push(item);
            continue;
        }

        let max_points = policy.max_points(item.shape.garmin_type);
        let mut current = Some(item);
        let mut j = 0;
        while let Some(cur) = current.as_ref() {
            if j >= accepted.len() {
                break;
            }
            let bboxes_touch = match (accepted[j].shape.bbox(), cur.shape.bbox()) {
                (Some(a), Some(b)) => a.intersects(&b),
                _ => false,
            };
            // grouping only compared against the first member, and labels
            // copied by earlier merges may have changed since
            if !bboxes_touch || !policy.similar(&accepted[j].shape, &cur.shape) {
                j += 1;
                continue;
            }

            match merge_rings(&accepted[j].shape.points, &cur.shape.points, max_points) {
                MergeOutcome::Merged(points) => {
                    let other = accepted.remove(j);
                    current = current.map(|cur| combine(other, cur, points));
                    stats.merged += 1;
                    j = 0;
                }
                MergeOutcome::Duplicate => {
                    debug!(
                        "Shape of type 0x{:x} duplicates shape {}, dropped",
                        cur.shape.garmin_type, accepted[j].shape.id
                    );
                    stats.duplicates += 1;
                    current = None;
                }
                MergeOutcome::AreaMismatch => {
                    debug!(
                        "Merge of shapes {} and {} would change the area",
                        accepted[j].shape.id, cur.shape.id
                    );
                    stats.rejected_area += 1;
                    j += 1;
                }
                MergeOutcome::NotClosed => {
                    debug!(
                        "Merge of shapes {} and {} produced an open ring",
                        accepted[j].shape.id, cur.shape.id
                    );
                    j += 1;
                }
                MergeOutcome::NoSharedEdge | MergeOutcome::TooManyPoints => j += 1,
            }
        }
        if let Some(cur) = current {
            accepted.push(cur);
        }
    }
    accepted
}

/// Builds the merged shape. Metadata comes from the earlier of the two shapes,
/// labels missing there are taken from the other one.
fn combine(a: Indexed, b: Indexed, points: Vec<Coord>) -> Indexed {
    let (first, second) = if a.index <= b.index { (a, b) } else { (b, a) };
    let mut shape = first.shape.with_points(points);
    for (key, value) in &second.shape.tags {
        if is_label_tag(key) && !shape.tags.contains_key(key) {
            shape.tags.insert(key.clone(), value.clone());
        }
    }
    Indexed {
        index: first.index,
        merged: true,
        shape,
    }
}

/// A chain of points shared by both rings, consecutive in both.
#[derive(Debug, Clone, Copy)]
struct SharedRun {
    s1_start: usize,
    s2_start: usize,
    s2_last: usize,
    len: usize,
    /// Step through the shorter ring that follows the run, 0 while undecided.
    dir: isize,
}

impl SharedRun {
    fn start(s1_start: usize, j: usize) -> Self {
        Self {
            s1_start,
            s2_start: j,
            s2_last: j,
            len: 1,
            dir: 0,
        }
    }

    fn try_extend(&mut self, j: usize, n2: usize) -> bool {
        if self.len >= n2 {
            return false;
        }
        let forward = (self.s2_last + 1) % n2;
        let backward = (self.s2_last + n2 - 1) % n2;
        let dir = match self.dir {
            0 if j == forward => 1,
            0 if j == backward => -1,
            1 if j == forward => 1,
            -1 if j == backward => -1,
            _ => return false,
        };
        self.dir = dir;
        self.s2_last = j;
        self.len += 1;
        true
    }
}

/// Merges two closed rings along their longest shared chain.
fn merge_rings(a: &[Coord], b: &[Coord], max_points: usize) -> MergeOutcome {
    if a.len() < 4 || b.len() < 4 || !is_closed(a) || !is_closed(b) {
        return MergeOutcome::NoSharedEdge;
    }
    let (s1, s2) = if b.len() > a.len() { (b, a) } else { (a, b) };
    let n1 = s1.len() - 1;
    let n2 = s2.len() - 1;
    let area1 = signed_area_x2(s1).abs();
    let area2 = signed_area_x2(s2).abs();

    let pos2: FnvHashMap<CoordId, usize> = s2[..n2]
        .iter()
        .enumerate()
        .map(|(j, c)| (c.id(), j))
        .collect();

    // Walk from a point the shorter ring does not use, so no run is split
    // by the start of the walk
    let Some(start) = (0..n1).find(|&i| !pos2.contains_key(&s1[i].id())) else {
        if n1 == n2 && area1 == area2 {
            return MergeOutcome::Duplicate;
        }
        return MergeOutcome::NoSharedEdge;
    };

    let mut longest: Option<SharedRun> = None;
    let mut current: Option<SharedRun> = None;
    for k in 0..n1 {
        let i = (start + k) % n1;
        let Some(&j) = pos2.get(&s1[i].id()) else {
            current = None;
            continue;
        };
        let run = match current {
            Some(mut run) => {
                if run.try_extend(j, n2) {
                    run
                } else {
                    SharedRun::start(i, j)
                }
            }
            None => SharedRun::start(i, j),
        };
        if longest.is_none_or(|l| run.len > l.len) {
            longest = Some(run);
        }
        current = Some(run);
    }

    let Some(run) = longest.filter(|r| r.len >= 2) else {
        return MergeOutcome::NoSharedEdge;
    };
    // the smaller ring lies on the larger one's boundary and covers the same area
    if run.len == n2 && area1 == area2 {
        return MergeOutcome::Duplicate;
    }
    let merged_len = n1 + n2 + 3 - 2 * run.len;
    if merged_len > max_points {
        return MergeOutcome::TooManyPoints;
    }

    let mut merged = Vec::with_capacity(merged_len);
    // s1 from the end of the run around to its start
    let run_end = (run.s1_start + run.len - 1) % n1;
    for k in 0..(n1 - run.len + 2) {
        merged.push(s1[(run_end + k) % n1]);
    }
    // s2 from the start of the run away from it, back to the run's end
    let n2i = n2 as isize;
    for k in 1..=(n2 - run.len + 1) {
        let j = (run.s2_start as isize - run.dir * k as isize).rem_euclid(n2i);
        merged.push(s2[j as usize]);
    }

    if signed_area_x2(&merged).abs() != area1 + area2 {
        return MergeOutcome::AreaMismatch;
    }
    if !is_closed(&merged) {
        return MergeOutcome::NotClosed;
    }
    MergeOutcome::Merged(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CoordPool;
    use crate::map_element::Tags;

    const MAX: usize = 250;

    fn ring(pool: &mut CoordPool, pts: &[(i32, i32)]) -> Vec<Coord> {
        let mut ring: Vec<Coord> = pts
            .iter()
            .map(|&(lat, lon)| pool.intern_map_units(lat, lon))
            .collect();
        ring.push(ring[0]);
        ring
    }

    fn shape(id: u64, points: Vec<Coord>) -> MapShape {
        MapShape {
            id,
            garmin_type: 0x3c,
            min_resolution: 20,
            max_resolution: 24,
            tags: Tags::from([("natural".to_string(), "water".to_string())]),
            points,
        }
    }

    fn rotate(points: &[Coord], by: usize) -> Vec<Coord> {
        let n = points.len() - 1;
        let mut r: Vec<Coord> = (0..n).map(|i| points[(i + by) % n]).collect();
        r.push(r[0]);
        r
    }

    fn reversed(points: &[Coord]) -> Vec<Coord> {
        points.iter().rev().copied().collect()
    }

    fn run_merge(shapes: Vec<MapShape>) -> Vec<MapShape> {
        merge(shapes, 24, &DefaultShapePolicy::new(MAX)).0
    }

    fn area(points: &[Coord]) -> i128 {
        signed_area_x2(points).abs()
    }

    /// Every rotation and direction of both rings in both orders must end
    /// with the same number of shapes and points.
    fn assert_all_variants(a: &[Coord], b: &[Coord], shapes: usize, points: usize) {
        let n1 = a.len() - 1;
        let n2 = b.len() - 1;
        for ra in 0..n1 {
            for rb in 0..n2 {
                for (va, vb) in [
                    (rotate(a, ra), rotate(b, rb)),
                    (reversed(&rotate(a, ra)), rotate(b, rb)),
                    (rotate(a, ra), reversed(&rotate(b, rb))),
                ] {
                    for order in [
                        vec![shape(1, va.clone()), shape(2, vb.clone())],
                        vec![shape(2, vb.clone()), shape(1, va.clone())],
                    ] {
                        let result = run_merge(order);
                        assert_eq!(result.len(), shapes);
                        let total: usize = result.iter().map(|s| s.points.len()).sum();
                        assert_eq!(total, points);
                    }
                }
            }
        }
    }

    #[test]
    fn test_adjacent_rectangles_sharing_two_points() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 5), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);

        let result = run_merge(vec![shape(1, a.clone()), shape(2, b.clone())]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 8);
        assert_eq!(area(&result[0].points), area(&a) + area(&b));
        assert_all_variants(&a, &b, 1, 8);
    }

    #[test]
    fn test_rectangles_sharing_three_points() {
        let mut pool = CoordPool::new();
        let a = ring(
            &mut pool,
            &[(0, 0), (0, 5), (0, 10), (5, 10), (10, 10), (10, 0)],
        );
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10), (5, 10)]);

        let result = run_merge(vec![shape(1, a.clone()), shape(2, b.clone())]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 8);
        assert_all_variants(&a, &b, 1, 8);
    }

    #[test]
    fn test_u_shape_and_partial_closing_ring() {
        let mut pool = CoordPool::new();
        let u = ring(
            &mut pool,
            &[
                (0, 0),
                (0, 30),
                (30, 30),
                (30, 20),
                (10, 20),
                (10, 10),
                (30, 10),
                (30, 0),
            ],
        );
        // shares four points with the U, only three of them in a row
        let closing = ring(
            &mut pool,
            &[(30, 20), (10, 20), (10, 10), (15, 15), (25, 15), (30, 10)],
        );

        let result = run_merge(vec![shape(1, u.clone()), shape(2, closing.clone())]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 11);
        assert_eq!(area(&result[0].points), area(&u) + area(&closing));
        assert_all_variants(&u, &closing, 1, 11);
    }

    #[test]
    fn test_ring_filling_concavity() {
        let mut pool = CoordPool::new();
        let u = ring(
            &mut pool,
            &[(0, 0), (0, 30), (30, 30), (10, 20), (10, 10), (30, 0)],
        );
        let filler = ring(&mut pool, &[(30, 30), (10, 20), (10, 10), (30, 0)]);

        let result = run_merge(vec![shape(1, u.clone()), shape(2, filler.clone())]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 5);
        assert_eq!(area(&result[0].points), 2 * 30 * 30 * 64 * 64);
        assert_all_variants(&u, &filler, 1, 5);
    }

    #[test]
    fn test_identical_rings_are_duplicates() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let b = reversed(&rotate(&a, 2));

        let (result, stats) = merge(
            vec![shape(1, a.clone()), shape(2, b.clone())],
            24,
            &DefaultShapePolicy::new(MAX),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 5);
        assert_eq!(result[0].id, 1);
        assert_eq!(stats.duplicates, 1);
        assert_all_variants(&a, &a, 1, 5);
    }

    #[test]
    fn test_ring_with_extra_boundary_point_is_duplicate() {
        let mut pool = CoordPool::new();
        let detailed = ring(&mut pool, &[(0, 0), (0, 5), (0, 10), (10, 10), (10, 0)]);
        let plain = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);

        for order in [
            vec![shape(1, detailed.clone()), shape(2, plain.clone())],
            vec![shape(2, plain.clone()), shape(1, detailed.clone())],
            vec![shape(1, detailed.clone()), shape(2, reversed(&rotate(&plain, 1)))],
        ] {
            let (result, stats) = merge(order, 24, &DefaultShapePolicy::new(MAX));
            assert_eq!(result.len(), 1);
            assert_eq!(stats.duplicates, 1);
            assert_eq!(stats.rejected_area, 0);
            assert_eq!(area(&result[0].points), area(&plain));
        }
    }

    #[test]
    fn test_contained_ring_sharing_an_edge_is_kept() {
        let mut pool = CoordPool::new();
        let outer = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let inner = ring(&mut pool, &[(0, 0), (0, 10), (5, 10), (5, 0)]);

        let (result, stats) = merge(
            vec![shape(1, outer.clone()), shape(2, inner.clone())],
            24,
            &DefaultShapePolicy::new(MAX),
        );
        assert_eq!(result.len(), 2);
        assert!(stats.rejected_area > 0);
        assert_all_variants(&outer, &inner, 2, 10);
    }

    #[test]
    fn test_chain_collapses_in_one_call() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let c = ring(&mut pool, &[(0, 20), (0, 30), (10, 30), (10, 20)]);
        // b touches both, a and c do not touch each other
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);

        let (result, stats) = merge(
            vec![shape(1, a.clone()), shape(2, c.clone()), shape(3, b.clone())],
            24,
            &DefaultShapePolicy::new(MAX),
        );
        assert_eq!(result.len(), 1);
        assert_eq!(stats.merged, 2);
        assert_eq!(area(&result[0].points), area(&a) + area(&b) + area(&c));
    }

    #[test]
    fn test_unmergeable_list_is_unchanged() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(50, 50), (50, 60), (60, 60), (60, 50)]);
        let input = vec![shape(1, a), shape(2, b)];

        let result = run_merge(input.clone());
        assert_eq!(result, input);
        assert_eq!(run_merge(result.clone()), result);
    }

    #[test]
    fn test_different_types_and_invisible_shapes_pass_through() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);

        let mut other_type = shape(2, b.clone());
        other_type.garmin_type = 0x4e;
        assert_eq!(run_merge(vec![shape(1, a.clone()), other_type]).len(), 2);

        let mut hidden = shape(2, b);
        hidden.min_resolution = 10;
        hidden.max_resolution = 16;
        let result = run_merge(vec![shape(1, a), hidden.clone()]);
        assert_eq!(result.len(), 2);
        assert_eq!(result[1], hidden);
    }

    #[test]
    fn test_point_limit_blocks_merge() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 5), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);

        let result = merge(
            vec![shape(1, a), shape(2, b)],
            24,
            &DefaultShapePolicy::new(7),
        )
        .0;
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_labels() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);
        let policy = DefaultShapePolicy::new(MAX);

        let mut named = shape(2, b.clone());
        named.tags.insert("name".to_string(), "Lake".to_string());
        let result = run_merge(vec![shape(1, a.clone()), named.clone()]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].label(), Some("Lake"));

        let mut other_name = shape(1, a);
        other_name.tags.insert("name".to_string(), "Pond".to_string());
        assert!(!policy.similar(&other_name, &named));
        assert_eq!(run_merge(vec![other_name, named]).len(), 2);
    }

    #[test]
    fn test_unlabelled_group_leader_does_not_join_different_labels() {
        let mut pool = CoordPool::new();
        let far = ring(&mut pool, &[(50, 50), (50, 60), (60, 60), (60, 50)]);
        let a = ring(&mut pool, &[(0, 0), (0, 10), (10, 10), (10, 0)]);
        let b = ring(&mut pool, &[(0, 10), (0, 20), (10, 20), (10, 10)]);

        let mut lake = shape(2, a);
        lake.tags.insert("name".to_string(), "Lake".to_string());
        let mut pond = shape(3, b);
        pond.tags.insert("name".to_string(), "Pond".to_string());

        let (result, stats) = merge(
            vec![shape(1, far), lake, pond],
            24,
            &DefaultShapePolicy::new(MAX),
        );
        assert_eq!(result.len(), 3);
        assert_eq!(stats.merged, 0);
        assert_eq!(result[1].label(), Some("Lake"));
        assert_eq!(result[2].label(), Some("Pond"));
    }

    #[test]
    fn test_new_shapes_get_angle_cleanup() {
        let mut pool = CoordPool::new();
        let a = ring(&mut pool, &[(0, 0), (0, 5), (0, 10), (10, 10), (10, 0)]);
        let result = run_merge(vec![shape(0, a.clone()), shape(7, a.clone())]);
        // the second one is a duplicate of the first
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].points.len(), 5);
        assert_eq!(area(&result[0].points), area(&a));
    }
}
