use crate::coord::Coord;
use crate::map_element::{ConvertedWay, MapShape, Tags};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::Instant;

static DEBUG_LOG: Lazy<Mutex<DebugLogger>> = Lazy::new(|| Mutex::new(DebugLogger::from_env()));
static START: Lazy<Instant> = Lazy::new(Instant::now);

pub const DEBUG_ELEMENTS_VAR: &str = "IMGTILE_DEBUG_ELEMENTS";
pub const DEBUG_LOG_FILE: &str = "imgtile_debug_elements.json";

#[derive(Debug, Clone, Serialize)]
pub struct ElementSnapshot {
    pub tags: Tags,
    pub point_count: usize,
    /// `[lat, lon]` in map units.
    pub points: Vec<[i32; 2]>,
}

impl ElementSnapshot {
    fn new(tags: &Tags, points: &[Coord]) -> Self {
        ElementSnapshot {
            tags: tags.clone(),
            point_count: points.len(),
            points: points.iter().map(|c| [c.lat(), c.lon()]).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformationStage {
    pub stage: String,
    pub elapsed_ms: u128,
    pub element_type: String,
    pub element_id: u64,
    pub snapshots: Vec<ElementSnapshot>,
    pub notes: Vec<String>,
}

pub struct DebugLogger {
    enabled_elements: Vec<u64>,
    stages: Vec<TransformationStage>,
}

impl DebugLogger {
    /// Reads element IDs from `IMGTILE_DEBUG_ELEMENTS`.
    /// Format: IMGTILE_DEBUG_ELEMENTS=6553308,1470430,18254505
    pub fn from_env() -> Self {
        let enabled_elements: Vec<u64> = std::env::var(DEBUG_ELEMENTS_VAR)
            .ok()
            .map(|s| parse_ids(&s))
            .unwrap_or_default();

        if !enabled_elements.is_empty() {
            log::info!("Element tracking enabled for IDs: {enabled_elements:?}");
        }
        Self::with_ids(enabled_elements)
    }

    pub fn with_ids(enabled_elements: Vec<u64>) -> Self {
        DebugLogger {
            enabled_elements,
            stages: Vec::new(),
        }
    }

    pub fn is_tracking(&self, element_id: u64) -> bool {
        !self.enabled_elements.is_empty() && self.enabled_elements.contains(&element_id)
    }

    pub fn log(
        &mut self,
        stage: &str,
        element_type: &str,
        element_id: u64,
        snapshots: Vec<ElementSnapshot>,
        notes: Vec<String>,
    ) {
        if !self.is_tracking(element_id) {
            return;
        }
        self.stages.push(TransformationStage {
            stage: stage.to_string(),
            elapsed_ms: START.elapsed().as_millis(),
            element_type: element_type.to_string(),
            element_id,
            snapshots,
            notes,
        });
    }

    pub fn stages(&self) -> &[TransformationStage] {
        &self.stages
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), String> {
        if self.stages.is_empty() {
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.stages)
            .map_err(|e| format!("Failed to serialize debug log:\n{e}"))?;
        let mut file = File::create(path)
            .map_err(|e| format!("Failed to create {}:\n{e}", path.display()))?;
        file.write_all(json.as_bytes())
            .map_err(|e| format!("Failed to write {}:\n{e}", path.display()))?;

        log::info!(
            "Wrote {} transformation stages to {}",
            self.stages.len(),
            path.display()
        );
        Ok(())
    }
}

fn parse_ids(s: &str) -> Vec<u64> {
    s.split(',')
        .filter_map(|id| id.trim().parse::<u64>().ok())
        .collect()
}

// Public API functions
pub fn track_relation(relation_id: u64, shapes: &[MapShape]) {
    if let Ok(mut logger) = DEBUG_LOG.lock() {
        if !logger.is_tracking(relation_id) {
            return;
        }
        let snapshots = shapes
            .iter()
            .map(|s| ElementSnapshot::new(&s.tags, &s.points))
            .collect();
        let notes = vec![format!("{} shapes after cutting", shapes.len())];
        logger.log("multipolygon", "relation", relation_id, snapshots, notes);
    }
}

pub fn track_shape(stage: &str, shape: &MapShape, notes: Vec<String>) {
    if let Ok(mut logger) = DEBUG_LOG.lock() {
        if logger.is_tracking(shape.id) {
            let snapshot = ElementSnapshot::new(&shape.tags, &shape.points);
            logger.log(stage, "shape", shape.id, vec![snapshot], notes);
        }
    }
}

pub fn track_road(stage: &str, road: &ConvertedWay, notes: Vec<String>) {
    if let Ok(mut logger) = DEBUG_LOG.lock() {
        if logger.is_tracking(road.id) {
            let snapshot = ElementSnapshot::new(&road.tags, &road.points);
            logger.log(stage, "road", road.id, vec![snapshot], notes);
        }
    }
}

pub fn write_debug_log() {
    if let Ok(logger) = DEBUG_LOG.lock() {
        if let Err(e) = logger.write_to_file(Path::new(DEBUG_LOG_FILE)) {
            log::error!("Failed to write debug log: {e}");
        }
    }
}
