use crate::bbox::BBox;
use crate::clipping::{clip_line_to_bbox, clip_ring_to_bbox};
use crate::config::ProcessingConfig;
use crate::coord::CoordPool;
use crate::debug_logging;
use crate::element_processing::multipolygon::resolve_multipolygon;
use crate::element_processing::overlap_remover::{remove_overlaps, OverlapStats};
use crate::element_processing::shape_merge::{self, DefaultShapePolicy, MergeStats};
use crate::map_element::{ConvertedWay, FakeIdGenerator, MapShape, Restriction};
use crate::tile_data::Tile;
use fnv::FnvHashSet;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info};
use rayon::prelude::*;
use serde::Serialize;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct TileStats {
    pub multipolygons: usize,
    pub multipolygons_failed: usize,
    pub cut_shapes: usize,
    pub shapes_outside: usize,
    pub roads_split: usize,
    pub restrictions_dropped: usize,
    pub merge: MergeStats,
    pub overlaps: OverlapStats,
}

/// Shapes written at one resolution.
#[derive(Debug, Clone)]
pub struct LevelResult {
    pub resolution: u8,
    pub shapes: Vec<MapShape>,
}

#[derive(Debug, Clone)]
pub struct TileResult {
    pub name: String,
    pub levels: Vec<LevelResult>,
    pub roads: Vec<ConvertedWay>,
    pub restrictions: Vec<Restriction>,
    pub stats: TileStats,
}

/// Runs one tile through cutting, clipping, overlap removal and merging.
pub fn process_tile(tile: Tile, config: &ProcessingConfig) -> TileResult {
    let Tile {
        name,
        bbox,
        mut pool,
        mut ids,
        shapes: input_shapes,
        multipolygons,
        roads: input_roads,
        mut restrictions,
    } = tile;
    let mut stats = TileStats::default();

    // Plain shapes, clipped to the tile
    let mut shapes: Vec<MapShape> = Vec::with_capacity(input_shapes.len());
    for shape in &input_shapes {
        let pieces = clip_ring_to_bbox(&shape.points, &bbox, &mut pool);
        if pieces.is_empty() {
            stats.shapes_outside += 1;
        }
        shapes.extend(pieces.into_iter().map(|p| shape.with_points(p)));
    }

    // Multipolygons become hole-free shapes
    for relation in &multipolygons {
        stats.multipolygons += 1;
        match resolve_multipolygon(relation, &bbox, &config.cut, &mut pool) {
            Ok(cut) => {
                stats.cut_shapes += cut.len();
                shapes.extend(cut);
            }
            Err(e) => {
                error!("Tile {name}: {e}");
                stats.multipolygons_failed += 1;
            }
        }
    }

    let mut roads = clip_roads(
        input_roads,
        &bbox,
        &mut pool,
        &mut ids,
        &mut restrictions,
        &mut stats,
    );

    if config.remove_overlaps {
        stats.overlaps = remove_overlaps(&mut roads, &mut restrictions, &mut ids);
        // replacements were tracked by the remover itself
        for road in roads_with_own_id(&roads) {
            debug_logging::track_road("overlap_removal", road, Vec::new());
        }
    }

    // Restrictions whose ways left the tile are unusable
    let road_ids: FnvHashSet<u64> = roads.iter().map(|r| r.id).collect();
    let before = restrictions.len();
    restrictions.retain(|r| {
        road_ids.contains(&r.from_way)
            && road_ids.contains(&r.to_way)
            && r.via_ways.iter().all(|w| road_ids.contains(w))
    });
    stats.restrictions_dropped = before - restrictions.len();

    let policy = DefaultShapePolicy::new(config.merge.max_points);
    let levels = config
        .resolutions
        .iter()
        .map(|&resolution| {
            let mut level_shapes = if config.merge.enabled {
                let (merged, merge_stats) =
                    shape_merge::merge(shapes.clone(), resolution, &policy);
                stats.merge.add(&merge_stats);
                merged
            } else {
                shapes.clone()
            };
            level_shapes.retain(|s| s.visible_at(resolution));
            for shape in &level_shapes {
                let notes = vec![format!("resolution {resolution}")];
                debug_logging::track_shape("merge", shape, notes);
            }
            LevelResult {
                resolution,
                shapes: level_shapes,
            }
        })
        .collect();

    debug!(
        "Tile {name}: {} shapes, {} roads, {} restrictions",
        shapes.len(),
        roads.len(),
        restrictions.len()
    );

    TileResult {
        name,
        levels,
        roads,
        restrictions,
        stats,
    }
}

/// Clips roads to the tile. The first inside piece keeps the way id, every
/// further piece gets a fake id and takes over the restrictions whose via
/// node it contains.
fn clip_roads(
    input: Vec<ConvertedWay>,
    bbox: &BBox,
    pool: &mut CoordPool,
    ids: &mut FakeIdGenerator,
    restrictions: &mut [Restriction],
    stats: &mut TileStats,
) -> Vec<ConvertedWay> {
    let mut roads = Vec::with_capacity(input.len());
    for road in input {
        let mut pieces = clip_line_to_bbox(&road.points, bbox, pool).into_iter();
        let Some(first) = pieces.next() else {
            debug!("Road {} lies outside the tile", road.id);
            continue;
        };
        roads.push(road.derive(road.id, road.tags.clone(), first));

        for (i, points) in pieces.enumerate() {
            if i == 0 {
                stats.roads_split += 1;
            }
            let id = ids.next_id();
            for restriction in restrictions.iter_mut() {
                if !restriction.via_node.is_some_and(|via| points.contains(&via)) {
                    continue;
                }
                if restriction.from_way == road.id {
                    restriction.from_way = id;
                }
                if restriction.to_way == road.id {
                    restriction.to_way = id;
                }
            }
            roads.push(road.derive(id, road.tags.clone(), points));
        }
    }
    roads
}

const PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:45.white/black}] {pos}/{len} tiles ({eta}) {msg}";

/// Roads that still carry an id from the input.
fn roads_with_own_id(roads: &[ConvertedWay]) -> impl Iterator<Item = &ConvertedWay> {
    roads.iter().filter(|r| !FakeIdGenerator::is_fake(r.id))
}

/// Processes all tiles in parallel. Results come back in input order.
pub fn process_tiles(tiles: Vec<Tile>, config: &ProcessingConfig) -> Vec<TileResult> {
    let pb = ProgressBar::new(tiles.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar().template(PROGRESS_TEMPLATE) {
        pb.set_style(style.progress_chars("█▓░"));
    }

    let results: Vec<TileResult> = tiles
        .into_par_iter()
        .map(|tile| {
            let result = process_tile(tile, config);
            pb.inc(1);
            result
        })
        .collect();

    pb.finish();
    info!("Processed {} tiles", results.len());
    results
}
