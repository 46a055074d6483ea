use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Produces the colour of every cell of a matrix for a given step.
pub trait RgbAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    /// Number of distinct steps the pattern cycles through.
    fn step_count(&self, width: usize, height: usize) -> usize;

    /// Row-major colours for `step`; must contain `width * height` entries.
    fn map(&self, width: usize, height: usize, color: [u8; 3], step: usize) -> Vec<[u8; 3]>;
}

const OFF: [u8; 3] = [0, 0, 0];

/// Every cell lit with the matrix colour.
#[derive(Debug, Default)]
pub struct FullColor;

impl RgbAlgorithm for FullColor {
    fn name(&self) -> &str {
        "full"
    }

    fn step_count(&self, _width: usize, _height: usize) -> usize {
        1
    }

    fn map(&self, width: usize, height: usize, color: [u8; 3], _step: usize) -> Vec<[u8; 3]> {
        vec![color; width * height]
    }
}

/// A single lit column sweeping left to right.
#[derive(Debug, Default)]
pub struct Columns;

impl RgbAlgorithm for Columns {
    fn name(&self) -> &str {
        "columns"
    }

    fn step_count(&self, width: usize, _height: usize) -> usize {
        width.max(1)
    }

    fn map(&self, width: usize, height: usize, color: [u8; 3], step: usize) -> Vec<[u8; 3]> {
        (0..width * height)
            .map(|i| if i % width.max(1) == step { color } else { OFF })
            .collect()
    }
}

/// A single lit row sweeping top to bottom.
#[derive(Debug, Default)]
pub struct Rows;

impl RgbAlgorithm for Rows {
    fn name(&self) -> &str {
        "rows"
    }

    fn step_count(&self, _width: usize, height: usize) -> usize {
        height.max(1)
    }

    fn map(&self, width: usize, height: usize, color: [u8; 3], step: usize) -> Vec<[u8; 3]> {
        (0..width * height)
            .map(|i| if i / width.max(1) == step { color } else { OFF })
            .collect()
    }
}

/// Alternating checkerboard.
#[derive(Debug, Default)]
pub struct Checkers;

impl RgbAlgorithm for Checkers {
    fn name(&self) -> &str {
        "checkers"
    }

    fn step_count(&self, _width: usize, _height: usize) -> usize {
        2
    }

    fn map(&self, width: usize, height: usize, color: [u8; 3], step: usize) -> Vec<[u8; 3]> {
        let width = width.max(1);
        (0..width * height)
            .map(|i| {
                if (i % width + i / width + step) % 2 == 0 {
                    color
                } else {
                    OFF
                }
            })
            .collect()
    }
}

/// Named set of available algorithms.
#[derive(Clone, Default)]
pub struct RgbAlgorithmRegistry {
    algorithms: BTreeMap<String, Arc<dyn RgbAlgorithm>>,
}

impl RgbAlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FullColor));
        registry.register(Arc::new(Columns));
        registry.register(Arc::new(Rows));
        registry.register(Arc::new(Checkers));
        registry
    }

    pub fn register(&mut self, algorithm: Arc<dyn RgbAlgorithm>) {
        self.algorithms
            .insert(algorithm.name().to_string(), algorithm);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RgbAlgorithm>> {
        self.algorithms.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.algorithms.keys().map(String::as_str)
    }
}

impl fmt::Debug for RgbAlgorithmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.algorithms.keys()).finish()
    }
}

/// First of three consecutive red/green/blue channels of one matrix cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RgbCell {
    pub universe: usize,
    pub channel: usize,
}

/// Grid of RGB cells coloured by a named algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbMatrix {
    pub algorithm: String,
    pub color: [u8; 3],
    pub width: usize,
    pub height: usize,
    /// Row-major, `width * height` entries.
    pub cells: Vec<RgbCell>,
    /// Time each algorithm step is shown.
    pub step_ms: u32,
}

impl RgbMatrix {
    /// Algorithm step to show after `elapsed_ms` of playback.
    pub fn step_at(&self, elapsed_ms: u64, step_count: usize) -> usize {
        if self.step_ms == 0 || step_count == 0 {
            return 0;
        }
        ((elapsed_ms / u64::from(self.step_ms)) % step_count as u64) as usize
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .iter()
            .flat_map(|cell| (0..3).map(move |offset| (cell.universe, cell.channel + offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_by_name() {
        let registry = RgbAlgorithmRegistry::with_builtins();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, ["checkers", "columns", "full", "rows"]);
        assert!(registry.get("plasma").is_none());
    }

    #[test]
    fn columns_light_one_column_per_step() {
        let red = [255, 0, 0];
        let map = Columns.map(3, 2, red, 1);
        assert_eq!(map, vec![OFF, red, OFF, OFF, red, OFF]);
        assert_eq!(Columns.step_count(3, 2), 3);
    }

    #[test]
    fn checkers_alternate_between_steps() {
        let white = [255; 3];
        assert_eq!(Checkers.map(2, 2, white, 0), vec![white, OFF, OFF, white]);
        assert_eq!(Checkers.map(2, 2, white, 1), vec![OFF, white, white, OFF]);
    }

    #[test]
    fn step_advances_with_time_and_wraps() {
        let matrix = RgbMatrix {
            algorithm: "rows".into(),
            color: [0, 0, 255],
            width: 1,
            height: 3,
            cells: Vec::new(),
            step_ms: 100,
        };
        assert_eq!(matrix.step_at(0, 3), 0);
        assert_eq!(matrix.step_at(250, 3), 2);
        assert_eq!(matrix.step_at(300, 3), 0);
    }
}
