//! Typed engine settings. The CLI fills these from [`crate::args::Args`],
//! library users build them directly.

/// Largest number of points a single polygon or line may have once written out.
pub const MAX_POINTS_IN_ELEMENT: usize = 250;

/// Preferred cut coordinates are multiples of this many map units.
pub const DEFAULT_CUT_GRID: i32 = 1 << 11;

/// Hard limit on work items per multipolygon in the area cutter.
pub const DEFAULT_MAX_CUT_ITERATIONS: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct CutConfig {
    /// Grid (map units) a cut line is snapped to when it stays inside its window.
    /// Cosmetic only, 0 disables snapping.
    pub grid: i32,
    pub max_iterations: usize,
}

impl Default for CutConfig {
    fn default() -> Self {
        Self {
            grid: DEFAULT_CUT_GRID,
            max_iterations: DEFAULT_MAX_CUT_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeConfig {
    pub enabled: bool,
    pub max_points: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_points: MAX_POINTS_IN_ELEMENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingConfig {
    /// Resolutions (bits per coordinate) a tile is written at, most detailed first.
    pub resolutions: Vec<u8>,
    pub cut: CutConfig,
    pub merge: MergeConfig,
    pub remove_overlaps: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            resolutions: vec![24],
            cut: CutConfig::default(),
            merge: MergeConfig::default(),
            remove_overlaps: true,
        }
    }
}
