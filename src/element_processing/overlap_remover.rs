//! Removes road segments that are present in more than one routable way.
//!
//! Ways sharing a segment are cut into their topological edges at every
//! junction, one copy of each doubled edge is dropped and the survivors of
//! each way are joined again. Only ways that actually changed are replaced,
//! and turn restrictions pointing at a replaced way are redirected to the
//! fragment that still carries the restriction's via point.

use crate::coord::{Coord, CoordId, CoordUsage};
use crate::debug_logging;
use crate::map_element::{is_label_tag, ConvertedWay, FakeIdGenerator, Restriction, Tags};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OverlapStats {
    pub duplicates_found: usize,
    pub removed: usize,
    pub ways_replaced: usize,
    pub via_ways_skipped: usize,
}

impl OverlapStats {
    pub fn add(&mut self, other: &OverlapStats) {
        self.duplicates_found += other.duplicates_found;
        self.removed += other.removed;
        self.ways_replaced += other.ways_replaced;
        self.via_ways_skipped += other.via_ways_skipped;
    }
}

/// A pair of consecutive junction points and the ways running along it.
struct Segment {
    p1: Coord,
    p2: Coord,
    ways: Vec<usize>,
}

impl Segment {
    fn joins(&self, a: Coord, b: Coord) -> bool {
        (self.p1 == a && self.p2 == b) || (self.p1 == b && self.p2 == a)
    }
}

struct Fragment {
    /// Index of the source way in the road list.
    way: usize,
    points: Vec<Coord>,
    tags: Tags,
    /// Carries a via point of a restriction on its way, never dropped.
    protected: bool,
    dropped: bool,
    labels_added: bool,
}

impl Fragment {
    fn is_segment(&self, a: Coord, b: Coord) -> bool {
        self.points.len() == 2
            && ((self.points[0] == a && self.points[1] == b)
                || (self.points[0] == b && self.points[1] == a))
    }
}

fn takes_part(road: &ConvertedWay) -> bool {
    road.is_valid() && !road.overlay
}

/// Roads that may replace each other: same classification and the same tags,
/// not counting labels and the flags the drop decision looks at.
fn same_kind(a: &ConvertedWay, fa: &Fragment, b: &ConvertedWay, fb: &Fragment) -> bool {
    let relevant = |key: &str| !is_label_tag(key) && key != "area" && key != "oneway";
    a.garmin_type == b.garmin_type
        && a.road_class == b.road_class
        && a.road_speed == b.road_speed
        && fa.tags.iter().filter(|(k, _)| relevant(k)).count()
            == fb.tags.iter().filter(|(k, _)| relevant(k)).count()
        && fa
            .tags
            .iter()
            .filter(|(k, _)| relevant(k))
            .all(|(k, v)| fb.tags.get(k) == Some(v))
}

/// Removes doubled road segments in place.
///
/// Replacement ways get ids from `ids`. Restrictions referring to a replaced
/// way are rewritten to the replacement that carries their via point.
pub fn remove_overlaps(
    roads: &mut Vec<ConvertedWay>,
    restrictions: &mut [Restriction],
    ids: &mut FakeIdGenerator,
) -> OverlapStats {
    let mut stats = OverlapStats::default();

    // Junction degree: number of ways touching a point
    let mut degree = CoordUsage::new();
    for road in roads.iter().filter(|r| takes_part(r)) {
        for coord in road.points.iter().unique() {
            degree.increment(coord);
        }
    }

    let segments = find_segments(roads, &degree);
    let duplicates: Vec<&Segment> = segments.iter().filter(|s| s.ways.len() > 1).collect();
    stats.duplicates_found = duplicates.len();
    if duplicates.is_empty() {
        return stats;
    }

    let index_by_id: FnvHashMap<u64, usize> =
        roads.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
    let via_points: Vec<Vec<Coord>> = restrictions
        .iter()
        .map(|r| restriction_via_points(r, roads.as_slice(), &index_by_id))
        .collect();

    let mut protected_points: FnvHashMap<u64, FnvHashSet<CoordId>> = FnvHashMap::default();
    for (restriction, points) in restrictions.iter().zip(&via_points) {
        for way_id in [restriction.from_way, restriction.to_way] {
            protected_points
                .entry(way_id)
                .or_default()
                .extend(points.iter().map(Coord::id));
        }
    }

    // Split every way involved in a duplicate at its junctions
    let implicated: BTreeSet<usize> = duplicates
        .iter()
        .flat_map(|s| s.ways.iter().copied())
        .collect();
    let mut fragments: Vec<Fragment> = Vec::new();
    let mut by_way: FnvHashMap<usize, Vec<usize>> = FnvHashMap::default();
    let mut unsplit: FnvHashSet<usize> = FnvHashSet::default();

    for &w in &implicated {
        let road = &roads[w];
        let pieces = if restrictions.iter().any(|r| r.is_via_way(road.id)) {
            warn!("Way {} is a via way of a turn restriction, not splitting it", road.id);
            stats.via_ways_skipped += 1;
            unsplit.insert(w);
            vec![road.points.clone()]
        } else {
            split_at_junctions(&road.points, &degree)
        };

        let guarded = protected_points.get(&road.id);
        for points in pieces {
            let protected = unsplit.contains(&w)
                || guarded.is_some_and(|g| points.iter().any(|p| g.contains(&p.id())));
            by_way.entry(w).or_default().push(fragments.len());
            fragments.push(Fragment {
                way: w,
                points,
                tags: road.tags.clone(),
                protected,
                dropped: false,
                labels_added: false,
            });
        }
    }

    // Drop one copy of every doubled edge
    for segment in &duplicates {
        let candidates: Vec<usize> = segment
            .ways
            .iter()
            .filter_map(|w| by_way.get(w))
            .flat_map(|frags| frags.iter().copied())
            .filter(|&f| fragments[f].is_segment(segment.p1, segment.p2))
            .collect();

        for (i, &a) in candidates.iter().enumerate() {
            for &b in &candidates[i + 1..] {
                let (fa, fb) = (&fragments[a], &fragments[b]);
                if fa.dropped || fb.dropped || fa.way == fb.way {
                    continue;
                }
                if !same_kind(&roads[fa.way], fa, &roads[fb.way], fb) {
                    continue;
                }
                let Some((keep, drop)) = choose_drop(a, b, &fragments, roads) else {
                    debug!(
                        "Keeping both copies of segment {} - {} on ways {} and {}",
                        segment.p1, segment.p2, roads[fa.way].id, roads[fb.way].id
                    );
                    continue;
                };
                copy_missing_labels(&mut fragments, keep, drop);
                fragments[drop].dropped = true;
                stats.removed += 1;
            }
        }
    }

    // Rebuild the ways that lost a fragment or received labels
    let mut replacements: FnvHashMap<usize, Vec<ConvertedWay>> = FnvHashMap::default();
    for (&w, frags) in by_way.iter().sorted_by_key(|(w, _)| **w) {
        let changed = frags
            .iter()
            .any(|&f| fragments[f].dropped || fragments[f].labels_added);
        if !changed {
            continue;
        }
        if unsplit.contains(&w) {
            // via ways keep their id, only labels may have been added
            if let Some(&f) = frags.first() {
                roads[w].tags = fragments[f].tags.clone();
            }
            continue;
        }

        let original = &roads[w];
        let new_ways: Vec<ConvertedWay> = recombine(frags.iter().map(|&f| &fragments[f]))
            .into_iter()
            .map(|(points, tags)| original.derive(ids.next_id(), tags, points))
            .collect();
        debug!(
            "Way {} replaced by {} way(s)",
            original.id,
            new_ways.len()
        );
        for way in &new_ways {
            debug_logging::track_road(
                "overlap_removal",
                way,
                vec![format!("replaces way {}", original.id)],
            );
        }
        replacements.insert(w, new_ways);
    }
    stats.ways_replaced = replacements.len();

    rewrite_restrictions(restrictions, &via_points, roads, &replacements);

    let old_roads = std::mem::take(roads);
    for (w, road) in old_roads.into_iter().enumerate() {
        match replacements.remove(&w) {
            Some(new_ways) => roads.extend(new_ways),
            None => roads.push(road),
        }
    }

    if stats.removed > 0 {
        info!(
            "Removed {} overlapping road segments, {} ways replaced",
            stats.removed, stats.ways_replaced
        );
    }
    stats
}

fn find_segments(roads: &[ConvertedWay], degree: &CoordUsage) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut by_coord: FnvHashMap<CoordId, Vec<usize>> = FnvHashMap::default();

    for (w, road) in roads.iter().enumerate().filter(|(_, r)| takes_part(r)) {
        for pair in road.points.windows(2) {
            let (p1, p2) = (pair[0], pair[1]);
            if p1 == p2 || degree.count(&p1) < 2 || degree.count(&p2) < 2 {
                continue;
            }
            let existing = by_coord
                .get(&p1.id())
                .and_then(|list| list.iter().copied().find(|&s| segments[s].joins(p1, p2)));
            match existing {
                Some(s) => {
                    if !segments[s].ways.contains(&w) {
                        segments[s].ways.push(w);
                    }
                }
                None => {
                    by_coord.entry(p1.id()).or_default().push(segments.len());
                    by_coord.entry(p2.id()).or_default().push(segments.len());
                    segments.push(Segment {
                        p1,
                        p2,
                        ways: vec![w],
                    });
                }
            }
        }
    }
    segments
}

/// Cuts a way at every interior point touched by another way.
fn split_at_junctions(points: &[Coord], degree: &CoordUsage) -> Vec<Vec<Coord>> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for i in 1..points.len().saturating_sub(1) {
        if degree.count(&points[i]) > 1 {
            pieces.push(points[start..=i].to_vec());
            start = i;
        }
    }
    if points.len() - start >= 2 {
        pieces.push(points[start..].to_vec());
    }
    pieces
}

/// Picks `(keep, drop)` for two copies of the same edge, or `None` to keep both.
fn choose_drop(
    a: usize,
    b: usize,
    fragments: &[Fragment],
    roads: &[ConvertedWay],
) -> Option<(usize, usize)> {
    let (fa, fb) = (&fragments[a], &fragments[b]);
    let same_direction = fa.points[0] == fb.points[0];

    // interchangeable pairs may swap roles if the preferred victim is protected
    let (keep, drop, interchangeable) = match (roads[fa.way].oneway, roads[fb.way].oneway) {
        (true, false) if same_direction => (a, b, false),
        (false, true) if same_direction => (b, a, false),
        (true, true) if same_direction => (a, b, true),
        (true, _) | (_, true) => return None,
        (false, false) => {
            if roads[fa.way].is_area() && !roads[fb.way].is_area() {
                (b, a, true)
            } else {
                (a, b, true)
            }
        }
    };

    if !fragments[drop].protected {
        Some((keep, drop))
    } else if interchangeable && !fragments[keep].protected {
        Some((drop, keep))
    } else {
        None
    }
}

fn copy_missing_labels(fragments: &mut [Fragment], keep: usize, drop: usize) {
    let missing: Vec<(String, String)> = fragments[drop]
        .tags
        .iter()
        .filter(|(k, _)| is_label_tag(k) && !fragments[keep].tags.contains_key(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !missing.is_empty() {
        fragments[keep].tags.extend(missing);
        fragments[keep].labels_added = true;
    }
}

/// Joins the surviving fragments of one way where they still connect.
fn recombine<'a>(fragments: impl Iterator<Item = &'a Fragment>) -> Vec<(Vec<Coord>, Tags)> {
    let mut lines: Vec<(Vec<Coord>, Tags)> = Vec::new();
    for fragment in fragments.filter(|f| !f.dropped) {
        let joins = lines.last().is_some_and(|(points, tags)| {
            points.last() == fragment.points.first() && *tags == fragment.tags
        });
        match lines.last_mut() {
            Some((points, _)) if joins => points.extend(fragment.points.iter().skip(1)),
            _ => lines.push((fragment.points.clone(), fragment.tags.clone())),
        }
    }

    // A closed way may have been cut open at its start
    if lines.len() > 1 {
        let wraps = match (lines.first(), lines.last()) {
            (Some((first, first_tags)), Some((last, last_tags))) => {
                last.last() == first.first() && first_tags == last_tags
            }
            _ => false,
        };
        if wraps {
            let (first, _) = lines.remove(0);
            if let Some((last, _)) = lines.last_mut() {
                last.extend(first.into_iter().skip(1));
            }
        }
    }
    lines
}

/// Points a restriction is anchored at on its from and to ways.
fn restriction_via_points(
    restriction: &Restriction,
    roads: &[ConvertedWay],
    index_by_id: &FnvHashMap<u64, usize>,
) -> Vec<Coord> {
    let mut points: Vec<Coord> = restriction.via_node.into_iter().collect();
    for via in &restriction.via_ways {
        if let Some(road) = index_by_id.get(via).map(|&i| &roads[i]) {
            points.extend(road.points.first());
            points.extend(road.points.last());
        }
    }
    points
}

fn rewrite_restrictions(
    restrictions: &mut [Restriction],
    via_points: &[Vec<Coord>],
    roads: &[ConvertedWay],
    replacements: &FnvHashMap<usize, Vec<ConvertedWay>>,
) {
    let replaced_by_id: FnvHashMap<u64, &Vec<ConvertedWay>> = replacements
        .iter()
        .map(|(&w, new_ways)| (roads[w].id, new_ways))
        .collect();

    for (restriction, via) in restrictions.iter_mut().zip(via_points) {
        let restriction_id = restriction.id;
        for way_ref in [&mut restriction.from_way, &mut restriction.to_way] {
            let Some(new_ways) = replaced_by_id.get(way_ref) else {
                continue;
            };
            match new_ways
                .iter()
                .find(|nw| nw.points.iter().any(|p| via.contains(p)))
            {
                Some(new_way) => {
                    debug!(
                        "Restriction {restriction_id}: way {} is now {}",
                        way_ref, new_way.id
                    );
                    *way_ref = new_way.id;
                }
                None => warn!(
                    "Restriction {restriction_id}: no replacement of way {way_ref} reaches via"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::CoordPool;

    fn road(id: u64, points: Vec<Coord>) -> ConvertedWay {
        ConvertedWay {
            id,
            garmin_type: 0x06,
            road_class: 1,
            road_speed: 3,
            oneway: false,
            overlay: false,
            tags: Tags::from([("highway".to_string(), "residential".to_string())]),
            points,
        }
    }

    struct Net {
        a: Coord,
        b: Coord,
        c: Coord,
        d: Coord,
        x: Coord,
        y: Coord,
        z: Coord,
    }

    /// `a-b-c-d` and `x-b-c-y` share the edge `b-c`, `y-z` hangs off the second.
    fn net() -> Net {
        let mut pool = CoordPool::new();
        Net {
            a: pool.intern_map_units(0, 0),
            b: pool.intern_map_units(0, 10),
            c: pool.intern_map_units(0, 20),
            d: pool.intern_map_units(0, 30),
            x: pool.intern_map_units(10, 0),
            y: pool.intern_map_units(10, 30),
            z: pool.intern_map_units(20, 30),
        }
    }

    /// Number of 2-point edges present in more than one road.
    fn doubled_edges(roads: &[ConvertedWay]) -> usize {
        let mut seen: FnvHashMap<(CoordId, CoordId), usize> = FnvHashMap::default();
        for road in roads {
            for pair in road.points.windows(2) {
                let (p, q) = (pair[0].id(), pair[1].id());
                *seen.entry((p.min(q), p.max(q))).or_insert(0) += 1;
            }
        }
        seen.values().filter(|&&n| n > 1).count()
    }

    fn run(roads: &mut Vec<ConvertedWay>, restrictions: &mut [Restriction]) -> OverlapStats {
        remove_overlaps(roads, restrictions, &mut FakeIdGenerator::new())
    }

    #[test]
    fn test_shared_edge_removed_from_second_way() {
        let n = net();
        let mut roads = vec![
            road(1, vec![n.a, n.b, n.c, n.d]),
            road(2, vec![n.x, n.b, n.c, n.y]),
        ];

        let stats = run(&mut roads, &mut []);

        assert_eq!(stats.duplicates_found, 1);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.ways_replaced, 1);
        assert_eq!(doubled_edges(&roads), 0);
        assert_eq!(roads.len(), 3);
        assert_eq!(roads[0].id, 1);
        assert_eq!(roads[0].points, vec![n.a, n.b, n.c, n.d]);
        assert_eq!(roads[1].points, vec![n.x, n.b]);
        assert_eq!(roads[2].points, vec![n.c, n.y]);
        assert!(FakeIdGenerator::is_fake(roads[1].id));
        assert_ne!(roads[1].id, roads[2].id);
    }

    #[test]
    fn test_labels_move_to_kept_copy() {
        let n = net();
        let mut named = road(2, vec![n.x, n.b, n.c, n.y]);
        named
            .tags
            .insert("mkgmap:label:1".to_string(), "High Street".to_string());
        let mut roads = vec![road(1, vec![n.a, n.b, n.c, n.d]), named];

        let stats = run(&mut roads, &mut []);

        assert_eq!(stats.removed, 1);
        assert_eq!(doubled_edges(&roads), 0);
        let kept = roads
            .iter()
            .find(|r| r.points == vec![n.b, n.c])
            .unwrap();
        assert_eq!(
            kept.tags.get("mkgmap:label:1").map(String::as_str),
            Some("High Street")
        );
    }

    #[test]
    fn test_oneway_keeps_its_copy() {
        let n = net();
        let mut oneway = road(2, vec![n.x, n.b, n.c, n.y]);
        oneway.oneway = true;
        let mut roads = vec![road(1, vec![n.a, n.b, n.c, n.d]), oneway];

        let stats = run(&mut roads, &mut []);

        assert_eq!(stats.removed, 1);
        // the two-way road lost its middle
        assert!(roads.iter().all(|r| r.id != 1));
        assert!(roads.iter().any(|r| r.id == 2));
        assert_eq!(doubled_edges(&roads), 0);
    }

    #[test]
    fn test_oneway_against_two_way_in_other_direction_keeps_both() {
        let n = net();
        let mut oneway = road(1, vec![n.a, n.b, n.c, n.d]);
        oneway.oneway = true;
        let mut roads = vec![oneway, road(2, vec![n.y, n.c, n.b, n.x])];
        let before = roads.clone();

        let stats = run(&mut roads, &mut []);

        assert_eq!(stats.duplicates_found, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(roads, before);
    }

    #[test]
    fn test_opposite_oneways_keep_both() {
        let n = net();
        let mut first = road(1, vec![n.a, n.b, n.c, n.d]);
        first.oneway = true;
        let mut second = road(2, vec![n.y, n.c, n.b, n.x]);
        second.oneway = true;
        let mut roads = vec![first, second];
        let before = roads.clone();

        let stats = run(&mut roads, &mut []);
        assert_eq!(stats.removed, 0);
        assert_eq!(roads, before);
    }

    #[test]
    fn test_area_copy_is_dropped_first() {
        let n = net();
        let mut area = road(1, vec![n.a, n.b, n.c, n.d]);
        area.tags.insert("area".to_string(), "yes".to_string());
        let mut roads = vec![area, road(2, vec![n.x, n.b, n.c, n.y])];

        let stats = run(&mut roads, &mut []);

        assert_eq!(stats.removed, 1);
        assert_eq!(roads.len(), 3);
        assert_eq!(roads[2].id, 2);
        assert_eq!(roads[0].points, vec![n.a, n.b]);
        assert_eq!(roads[1].points, vec![n.c, n.d]);
    }

    #[test]
    fn test_overlay_and_different_roads_are_ignored() {
        let n = net();
        let mut overlay = road(2, vec![n.x, n.b, n.c, n.y]);
        overlay.overlay = true;
        let mut roads = vec![road(1, vec![n.a, n.b, n.c, n.d]), overlay];
        let stats = run(&mut roads, &mut []);
        assert_eq!(stats.duplicates_found, 0);

        let mut faster = road(2, vec![n.x, n.b, n.c, n.y]);
        faster.road_speed = 5;
        let mut roads = vec![road(1, vec![n.a, n.b, n.c, n.d]), faster];
        let before = roads.clone();
        let stats = run(&mut roads, &mut []);
        assert_eq!(stats.removed, 0);
        assert_eq!(roads, before);
    }

    #[test]
    fn test_via_way_is_not_split() {
        let n = net();
        let mut roads = vec![
            road(1, vec![n.a, n.b, n.c, n.d]),
            road(2, vec![n.x, n.b, n.c, n.y]),
            road(3, vec![n.y, n.z]),
        ];
        let before = roads.clone();
        let mut restrictions = vec![Restriction {
            id: 9,
            kind: "no_u_turn".to_string(),
            from_way: 1,
            to_way: 3,
            via_node: None,
            via_ways: vec![2],
        }];

        let stats = run(&mut roads, &mut restrictions);

        assert_eq!(stats.via_ways_skipped, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(roads, before);
    }

    #[test]
    fn test_restriction_follows_replacement() {
        let n = net();
        let mut roads = vec![
            road(1, vec![n.a, n.b, n.c, n.d]),
            road(2, vec![n.x, n.b, n.c, n.y]),
            road(3, vec![n.y, n.z]),
        ];
        let mut restrictions = vec![Restriction {
            id: 9,
            kind: "no_right_turn".to_string(),
            from_way: 2,
            to_way: 3,
            via_node: Some(n.y),
            via_ways: vec![],
        }];

        let stats = run(&mut roads, &mut restrictions);

        assert_eq!(stats.removed, 1);
        let tail = roads.iter().find(|r| r.points == vec![n.c, n.y]).unwrap();
        assert_eq!(restrictions[0].from_way, tail.id);
        assert_eq!(restrictions[0].to_way, 3);
        assert!(roads.iter().any(|r| r.id == restrictions[0].from_way));
    }

    #[test]
    fn test_protected_copy_swaps_roles() {
        let n = net();
        let mut roads = vec![
            road(1, vec![n.a, n.b, n.c, n.d]),
            road(2, vec![n.x, n.b, n.c, n.y]),
            road(4, vec![n.b, n.z]),
        ];
        // way 2 turns into way 4 at b, so its b-c copy must stay
        let mut restrictions = vec![Restriction {
            id: 9,
            kind: "no_left_turn".to_string(),
            from_way: 2,
            to_way: 4,
            via_node: Some(n.b),
            via_ways: vec![],
        }];

        let stats = run(&mut roads, &mut restrictions);

        assert_eq!(stats.removed, 1);
        assert!(roads.iter().any(|r| r.id == 2));
        assert!(roads.iter().all(|r| r.id != 1));
        assert_eq!(doubled_edges(&roads), 0);
        assert_eq!(restrictions[0].from_way, 2);
        assert_eq!(restrictions[0].to_way, 4);
    }

    #[test]
    fn test_recombine_wraps_closed_way() {
        let n = net();
        let frag = |points: Vec<Coord>| Fragment {
            way: 0,
            points,
            tags: Tags::new(),
            protected: false,
            dropped: false,
            labels_added: false,
        };
        let mut middle = frag(vec![n.b, n.c]);
        middle.dropped = true;
        let fragments = [
            frag(vec![n.a, n.b]),
            middle,
            frag(vec![n.c, n.d, n.a]),
        ];

        let lines = recombine(fragments.iter());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, vec![n.c, n.d, n.a, n.b]);
    }
}
