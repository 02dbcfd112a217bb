//! Styled map elements handed between the engines: polygons ([`MapShape`]),
//! multipolygon relations ([`MultipolygonRelation`]), routable roads
//! ([`ConvertedWay`]) and turn restrictions ([`Restriction`]).

use crate::bbox::BBox;
use crate::coord::Coord;
use std::collections::HashMap;

pub type Tags = HashMap<String, String>;

/// Prefix of the tags holding the labels a road or shape is addressed by.
pub const LABEL_TAG_PREFIX: &str = "mkgmap:label:";

pub fn is_label_tag(key: &str) -> bool {
    key.starts_with(LABEL_TAG_PREFIX) || key == "name"
}

/// Compares two tag sets while ignoring label tags.
pub fn tags_equal_ignoring_labels(a: &Tags, b: &Tags) -> bool {
    let relevant = |tags: &Tags| tags.iter().filter(|(k, _)| !is_label_tag(k)).count();
    relevant(a) == relevant(b)
        && a
            .iter()
            .filter(|(k, _)| !is_label_tag(k))
            .all(|(k, v)| b.get(k) == Some(v))
}

/// A polygon ready for serialization: one closed ring plus its Garmin metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct MapShape {
    /// OSM id of the source element, 0 for shapes that have no single origin.
    pub id: u64,
    pub garmin_type: u32,
    pub min_resolution: u8,
    pub max_resolution: u8,
    pub tags: Tags,
    /// Closed ring, first coord repeated at the end.
    pub points: Vec<Coord>,
}

impl MapShape {
    pub fn visible_at(&self, resolution: u8) -> bool {
        self.min_resolution <= resolution && resolution <= self.max_resolution
    }

    pub fn label(&self) -> Option<&str> {
        self.tags.get("name").map(String::as_str)
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::of_points(&self.points)
    }

    /// Same metadata, different ring.
    pub fn with_points(&self, points: Vec<Coord>) -> MapShape {
        MapShape {
            id: self.id,
            garmin_type: self.garmin_type,
            min_resolution: self.min_resolution,
            max_resolution: self.max_resolution,
            tags: self.tags.clone(),
            points,
        }
    }
}

/// A styled multipolygon relation with its member ways split by role.
///
/// Member ways are open or closed point lists; they are joined into rings
/// when the relation is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipolygonRelation {
    pub id: u64,
    pub garmin_type: u32,
    pub min_resolution: u8,
    pub max_resolution: u8,
    pub tags: Tags,
    pub outers: Vec<Vec<Coord>>,
    pub inners: Vec<Vec<Coord>>,
}

/// A routable way after styling.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedWay {
    pub id: u64,
    pub garmin_type: u32,
    /// Road class 0..=4, as written to NET.
    pub road_class: u8,
    pub road_speed: u8,
    pub oneway: bool,
    /// Secondary cartographic rendering of a road that is routed elsewhere.
    pub overlay: bool,
    pub tags: Tags,
    pub points: Vec<Coord>,
}

impl ConvertedWay {
    pub fn is_valid(&self) -> bool {
        self.points.len() >= 2
    }

    pub fn is_area(&self) -> bool {
        self.tags.get("area").is_some_and(|v| v == "yes")
    }

    /// Same classification, different geometry and id.
    pub fn derive(&self, id: u64, tags: Tags, points: Vec<Coord>) -> ConvertedWay {
        ConvertedWay {
            id,
            garmin_type: self.garmin_type,
            road_class: self.road_class,
            road_speed: self.road_speed,
            oneway: self.oneway,
            overlay: self.overlay,
            tags,
            points,
        }
    }
}

/// A turn restriction relation reduced to the way ids it refers to.
#[derive(Debug, Clone, PartialEq)]
pub struct Restriction {
    pub id: u64,
    pub kind: String,
    pub from_way: u64,
    pub to_way: u64,
    /// Via node, when the restriction uses one.
    pub via_node: Option<Coord>,
    /// Via ways, when the restriction uses them instead of a node.
    pub via_ways: Vec<u64>,
}

impl Restriction {
    pub fn is_via_way(&self, way_id: u64) -> bool {
        self.via_ways.contains(&way_id)
    }
}

/// Hands out ids for synthetic elements, far above any real OSM id.
#[derive(Debug)]
pub struct FakeIdGenerator {
    next: u64,
}

impl FakeIdGenerator {
    pub const START: u64 = 1 << 62;

    pub fn new() -> Self {
        Self { next: Self::START }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    pub fn is_fake(id: u64) -> bool {
        id >= Self::START
    }
}

impl Default for FakeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
