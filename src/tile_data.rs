use crate::bbox::BBox;
use crate::coord::{to_high_prec, Coord, CoordPool, HIGH_PREC_SHIFT, MAX_MAP_UNITS};
use crate::map_element::{
    ConvertedWay, FakeIdGenerator, MapShape, MultipolygonRelation, Restriction, Tags,
};
use crate::tile_processing::{TileResult, TileStats};
use colored::Colorize;
use fnv::FnvHashMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// Raw tile dump

#[derive(Debug, Deserialize)]
struct RawNode {
    id: u64,
    /// Map units.
    lat: i32,
    lon: i32,
    /// High precision position, preferred over `lat`/`lon` when present.
    lat_hp: Option<i32>,
    lon_hp: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawShape {
    #[serde(default)]
    id: u64,
    r#type: u32,
    min_resolution: u8,
    max_resolution: u8,
    #[serde(default)]
    tags: Tags,
    nodes: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RawMultipolygon {
    id: u64,
    r#type: u32,
    min_resolution: u8,
    max_resolution: u8,
    #[serde(default)]
    tags: Tags,
    outers: Vec<Vec<u64>>,
    #[serde(default)]
    inners: Vec<Vec<u64>>,
}

#[derive(Debug, Deserialize)]
struct RawRoad {
    id: u64,
    r#type: u32,
    #[serde(default)]
    road_class: u8,
    #[serde(default)]
    road_speed: u8,
    #[serde(default)]
    oneway: bool,
    #[serde(default)]
    overlay: bool,
    #[serde(default)]
    tags: Tags,
    nodes: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RawRestriction {
    id: u64,
    kind: String,
    from: u64,
    to: u64,
    via_node: Option<u64>,
    #[serde(default)]
    via_ways: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RawTile {
    name: String,
    /// `[min_lat, min_lon, max_lat, max_lon]` in map units.
    bbox: [i32; 4],
    nodes: Vec<RawNode>,
    #[serde(default)]
    shapes: Vec<RawShape>,
    #[serde(default)]
    multipolygons: Vec<RawMultipolygon>,
    #[serde(default)]
    roads: Vec<RawRoad>,
    #[serde(default)]
    restrictions: Vec<RawRestriction>,
}

#[derive(Debug, Deserialize)]
struct RawTileDump {
    tiles: Vec<RawTile>,
}

// End raw tile dump

/// Everything one tile is built from. Each tile owns its coordinate table.
#[derive(Debug)]
pub struct Tile {
    pub name: String,
    pub bbox: BBox,
    pub pool: CoordPool,
    pub ids: FakeIdGenerator,
    pub shapes: Vec<MapShape>,
    pub multipolygons: Vec<MultipolygonRelation>,
    pub roads: Vec<ConvertedWay>,
    pub restrictions: Vec<Restriction>,
}

impl Tile {
    pub fn new(name: &str, bbox: BBox) -> Self {
        Tile {
            name: name.to_string(),
            bbox,
            pool: CoordPool::new(),
            ids: FakeIdGenerator::new(),
            shapes: Vec::new(),
            multipolygons: Vec::new(),
            roads: Vec::new(),
            restrictions: Vec::new(),
        }
    }
}

pub fn read_tile_dump(path: &Path) -> Result<Vec<Tile>, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}:\n{e}", path.display()))?;
    parse_tile_dump(&json)
}

pub fn parse_tile_dump(json: &str) -> Result<Vec<Tile>, String> {
    let dump: RawTileDump =
        serde_json::from_str(json).map_err(|e| format!("Invalid tile dump:\n{e}"))?;
    dump.tiles.into_iter().map(process_raw_tile).collect()
}

fn process_raw_tile(raw: RawTile) -> Result<Tile, String> {
    let [min_lat, min_lon, max_lat, max_lon] = raw.bbox;
    let bbox = BBox::new(min_lat, min_lon, max_lat, max_lon)
        .map_err(|e| format!("Tile {}:\n{e}", raw.name))?;
    let mut tile = Tile::new(&raw.name, bbox);

    // Nodes first, every later element refers to them by id
    let mut nodes: FnvHashMap<u64, Coord> = FnvHashMap::default();
    for node in &raw.nodes {
        let (lat_hp, lon_hp) =
            node_position(node).map_err(|e| format!("Tile {}:\n{e}", raw.name))?;
        nodes.insert(node.id, tile.pool.intern(lat_hp, lon_hp));
    }

    let resolve = |refs: &[u64], what: &str, id: u64| -> Option<Vec<Coord>> {
        let points: Option<Vec<Coord>> = refs.iter().map(|r| nodes.get(r).copied()).collect();
        if points.is_none() {
            warn!("Tile {}: {what} {id} refers to an unknown node, skipped", raw.name);
        }
        points
    };

    for shape in &raw.shapes {
        if let Some(points) = resolve(&shape.nodes, "shape", shape.id) {
            tile.shapes.push(MapShape {
                id: shape.id,
                garmin_type: shape.r#type,
                min_resolution: shape.min_resolution,
                max_resolution: shape.max_resolution,
                tags: shape.tags.clone(),
                points,
            });
        }
    }

    for road in &raw.roads {
        if let Some(points) = resolve(&road.nodes, "road", road.id) {
            tile.roads.push(ConvertedWay {
                id: road.id,
                garmin_type: road.r#type,
                road_class: road.road_class,
                road_speed: road.road_speed,
                oneway: road.oneway,
                overlay: road.overlay,
                tags: road.tags.clone(),
                points,
            });
        }
    }

    for relation in &raw.multipolygons {
        let outers: Option<Vec<Vec<Coord>>> = relation
            .outers
            .iter()
            .map(|m| resolve(m, "relation", relation.id))
            .collect();
        let inners: Option<Vec<Vec<Coord>>> = relation
            .inners
            .iter()
            .map(|m| resolve(m, "relation", relation.id))
            .collect();
        if let (Some(outers), Some(inners)) = (outers, inners) {
            tile.multipolygons.push(MultipolygonRelation {
                id: relation.id,
                garmin_type: relation.r#type,
                min_resolution: relation.min_resolution,
                max_resolution: relation.max_resolution,
                tags: relation.tags.clone(),
                outers,
                inners,
            });
        }
    }

    for restriction in &raw.restrictions {
        let via_node = match restriction.via_node {
            Some(id) => match nodes.get(&id) {
                Some(coord) => Some(*coord),
                None => {
                    warn!(
                        "Tile {}: restriction {} has an unknown via node, skipped",
                        raw.name, restriction.id
                    );
                    continue;
                }
            },
            None => None,
        };
        tile.restrictions.push(Restriction {
            id: restriction.id,
            kind: restriction.kind.clone(),
            from_way: restriction.from,
            to_way: restriction.to,
            via_node,
            via_ways: restriction.via_ways.clone(),
        });
    }

    Ok(tile)
}

/// High precision position of a node, checked against the 24 bit map range.
fn node_position(node: &RawNode) -> Result<(i32, i32), String> {
    const MAX_HIGH_PREC: i32 = MAX_MAP_UNITS << HIGH_PREC_SHIFT;
    let in_range = |v: i32, limit: i32| (-limit..=limit).contains(&v);

    match (node.lat_hp, node.lon_hp) {
        (Some(lat_hp), Some(lon_hp)) => {
            if in_range(lat_hp, MAX_HIGH_PREC) && in_range(lon_hp, MAX_HIGH_PREC) {
                Ok((lat_hp, lon_hp))
            } else {
                Err(format!(
                    "Node {} high precision position ({lat_hp}, {lon_hp}) is out of range",
                    node.id
                ))
            }
        }
        _ => {
            if in_range(node.lat, MAX_MAP_UNITS) && in_range(node.lon, MAX_MAP_UNITS) {
                Ok((to_high_prec(node.lat), to_high_prec(node.lon)))
            } else {
                Err(format!(
                    "Node {} at ({}, {}) lies outside +-{MAX_MAP_UNITS} map units",
                    node.id, node.lat, node.lon
                ))
            }
        }
    }
}

// Output

#[derive(Debug, Serialize)]
pub struct ShapeOutput {
    pub id: u64,
    pub r#type: u32,
    pub min_resolution: u8,
    pub max_resolution: u8,
    pub tags: Tags,
    /// `[lat, lon]` in map units.
    pub points: Vec<[i32; 2]>,
}

impl From<&MapShape> for ShapeOutput {
    fn from(shape: &MapShape) -> Self {
        ShapeOutput {
            id: shape.id,
            r#type: shape.garmin_type,
            min_resolution: shape.min_resolution,
            max_resolution: shape.max_resolution,
            tags: shape.tags.clone(),
            points: map_unit_points(&shape.points),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RoadOutput {
    pub id: u64,
    pub r#type: u32,
    pub road_class: u8,
    pub road_speed: u8,
    pub oneway: bool,
    pub overlay: bool,
    pub tags: Tags,
    pub points: Vec<[i32; 2]>,
}

impl From<&ConvertedWay> for RoadOutput {
    fn from(road: &ConvertedWay) -> Self {
        RoadOutput {
            id: road.id,
            r#type: road.garmin_type,
            road_class: road.road_class,
            road_speed: road.road_speed,
            oneway: road.oneway,
            overlay: road.overlay,
            tags: road.tags.clone(),
            points: map_unit_points(&road.points),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RestrictionOutput {
    pub id: u64,
    pub kind: String,
    pub from: u64,
    pub to: u64,
    pub via_node: Option<[i32; 2]>,
    pub via_ways: Vec<u64>,
}

impl From<&Restriction> for RestrictionOutput {
    fn from(restriction: &Restriction) -> Self {
        RestrictionOutput {
            id: restriction.id,
            kind: restriction.kind.clone(),
            from: restriction.from_way,
            to: restriction.to_way,
            via_node: restriction.via_node.map(|c| [c.lat(), c.lon()]),
            via_ways: restriction.via_ways.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LevelOutput {
    pub resolution: u8,
    pub shapes: Vec<ShapeOutput>,
}

#[derive(Debug, Serialize)]
pub struct TileOutput<'a> {
    pub name: &'a str,
    pub levels: Vec<LevelOutput>,
    pub roads: Vec<RoadOutput>,
    pub restrictions: Vec<RestrictionOutput>,
    pub stats: &'a TileStats,
}

impl<'a> From<&'a TileResult> for TileOutput<'a> {
    fn from(result: &'a TileResult) -> Self {
        TileOutput {
            name: &result.name,
            levels: result
                .levels
                .iter()
                .map(|level| LevelOutput {
                    resolution: level.resolution,
                    shapes: level.shapes.iter().map(ShapeOutput::from).collect(),
                })
                .collect(),
            roads: result.roads.iter().map(RoadOutput::from).collect(),
            restrictions: result.restrictions.iter().map(RestrictionOutput::from).collect(),
            stats: &result.stats,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResultsOutput<'a> {
    tiles: Vec<TileOutput<'a>>,
}

fn map_unit_points(points: &[Coord]) -> Vec<[i32; 2]> {
    points.iter().map(|c| [c.lat(), c.lon()]).collect()
}

pub fn write_results(path: &Path, results: &[TileResult]) -> Result<(), String> {
    let output = ResultsOutput {
        tiles: results.iter().map(TileOutput::from).collect(),
    };
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| format!("Failed to serialize results:\n{e}"))?;
    fs::write(path, json).map_err(|e| format!("Failed to write {}:\n{e}", path.display()))?;
    println!(
        "{} {}",
        "Results written to".green(),
        path.display().to_string().bold()
    );
    Ok(())
}
