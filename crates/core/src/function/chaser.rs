use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::{FunctionId, Timing};

/// One entry of a chaser: the function to run and its step timing.
///
/// Two steps are equal when they reference the same function, whatever their
/// timing. Step lookups rely on this.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChaserStep {
    pub function: FunctionId,
    #[serde(default)]
    pub fade_in_ms: u32,
    #[serde(default)]
    pub fade_out_ms: u32,
    #[serde(default)]
    pub duration_ms: u32,
}

impl ChaserStep {
    pub fn new(
        function: impl Into<FunctionId>,
        fade_in_ms: u32,
        fade_out_ms: u32,
        duration_ms: u32,
    ) -> Self {
        Self {
            function: function.into(),
            fade_in_ms,
            fade_out_ms,
            duration_ms,
        }
    }

    pub fn timing(&self) -> Timing {
        Timing::new(self.fade_in_ms, self.fade_out_ms, self.duration_ms)
    }
}

impl PartialEq for ChaserStep {
    fn eq(&self, other: &Self) -> bool {
        self.function == other.function
    }
}

impl Eq for ChaserStep {}

impl Hash for ChaserStep {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.function.hash(state);
    }
}

/// Where a chaser takes its step timing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpeedMode {
    /// Every step uses its own fade and duration values.
    #[default]
    PerStep,
    /// Every step uses the chaser's own timing.
    Common,
}

/// Ordered sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chaser {
    #[serde(default)]
    steps: Vec<ChaserStep>,
    #[serde(default)]
    pub speed_mode: SpeedMode,
}

impl Chaser {
    pub fn new(steps: impl IntoIterator<Item = ChaserStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            speed_mode: SpeedMode::PerStep,
        }
    }

    /// Inserts a step at `index`, or appends when `index` is `None` or past
    /// the end. The same function may appear any number of times.
    pub fn add_step(&mut self, step: ChaserStep, index: Option<usize>) {
        match index {
            Some(index) if index < self.steps.len() => self.steps.insert(index, step),
            _ => self.steps.push(step),
        }
    }

    pub fn remove_step(&mut self, index: usize) -> Option<ChaserStep> {
        (index < self.steps.len()).then(|| self.steps.remove(index))
    }

    /// Drops every step that references `function`.
    pub fn remove_function(&mut self, function: FunctionId) {
        self.steps.retain(|step| step.function != function);
    }

    /// Index of the first step that references the same function as `step`.
    pub fn position(&self, step: &ChaserStep) -> Option<usize> {
        self.steps.iter().position(|s| s == step)
    }

    pub fn steps(&self) -> &[ChaserStep] {
        &self.steps
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}
