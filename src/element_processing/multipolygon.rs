use super::area_cutter;
use crate::bbox::BBox;
use crate::config::CutConfig;
use crate::coord::{Coord, CoordPool};
use crate::debug_logging;
use crate::geometry::{is_valid_ring, ring_contains_point};
use crate::map_element::{MapShape, MultipolygonRelation};
use log::{debug, warn};

/// Turns a multipolygon relation into hole-free shapes inside the tile box.
///
/// Member ways are joined into rings, every inner ring is assigned to the
/// outer ring containing it and each outer is cut around its holes. The
/// resulting shapes carry the relation's type and tags and have id 0, since
/// none of them corresponds to a single OSM element.
pub fn resolve_multipolygon(
    relation: &MultipolygonRelation,
    bbox: &BBox,
    config: &CutConfig,
    pool: &mut CoordPool,
) -> Result<Vec<MapShape>, String> {
    let mut outers = relation.outers.clone();
    let mut inners = relation.inners.clone();

    super::merge_way_segments(&mut outers);
    super::merge_way_segments(&mut inners);

    let outers = keep_closed_rings(relation.id, "outer", outers);
    let inners = keep_closed_rings(relation.id, "inner", inners);

    if outers.is_empty() {
        warn!("Skipping relation {} without a closed outer ring", relation.id);
        return Ok(Vec::new());
    }

    let holes_per_outer = assign_holes(relation.id, &outers, inners);

    let mut shapes = Vec::new();
    for (outer, holes) in outers.iter().zip(holes_per_outer) {
        let pieces = area_cutter::cut(outer, &holes, bbox, config, pool)
            .map_err(|e| format!("Failed to cut relation {}:\n{e}", relation.id))?;
        for points in pieces {
            shapes.push(MapShape {
                id: 0,
                garmin_type: relation.garmin_type,
                min_resolution: relation.min_resolution,
                max_resolution: relation.max_resolution,
                tags: relation.tags.clone(),
                points,
            });
        }
    }

    debug_logging::track_relation(relation.id, &shapes);
    Ok(shapes)
}

fn keep_closed_rings(relation_id: u64, role: &str, rings: Vec<Vec<Coord>>) -> Vec<Vec<Coord>> {
    rings
        .into_iter()
        .filter(|ring| {
            let valid = is_valid_ring(ring);
            if !valid {
                warn!(
                    "Relation {relation_id}: dropping unclosable {role} ring with {} points",
                    ring.len()
                );
            }
            valid
        })
        .collect()
}

/// Gives each inner ring to the first outer ring that contains it.
fn assign_holes(
    relation_id: u64,
    outers: &[Vec<Coord>],
    inners: Vec<Vec<Coord>>,
) -> Vec<Vec<Vec<Coord>>> {
    let outer_boxes: Vec<Option<BBox>> = outers.iter().map(|o| BBox::of_points(o)).collect();
    let mut holes: Vec<Vec<Vec<Coord>>> = vec![Vec::new(); outers.len()];

    for inner in inners {
        let inner_box = BBox::of_points(&inner);
        let owner = outers.iter().enumerate().position(|(i, outer)| {
            let boxes_overlap = match (&outer_boxes[i], &inner_box) {
                (Some(o), Some(h)) => o.intersects(h),
                _ => false,
            };
            boxes_overlap && contains_ring(outer, &inner)
        });

        match owner {
            Some(i) => holes[i].push(inner),
            None => debug!(
                "Relation {relation_id}: inner ring with {} points lies in no outer ring, dropped",
                inner.len()
            ),
        }
    }
    holes
}

/// Tests one point of `inner` that is not part of `outer`'s boundary.
fn contains_ring(outer: &[Coord], inner: &[Coord]) -> bool {
    inner
        .iter()
        .find(|p| !outer.contains(p))
        .is_some_and(|p| ring_contains_point(outer, p))
}
