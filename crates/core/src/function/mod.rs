//! Authored lighting programs.
//!
//! A [`Function`] is an immutable definition; the engine shares it with
//! running instances through an `Arc`, so edits replace the definition
//! instead of mutating it in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::universe::UNIVERSE_SIZE;
use crate::{LightEngineError, Result};

pub mod chaser;
pub mod codec;
pub mod collection;
pub mod efx;
pub mod rgb;
pub mod scene;

pub use chaser::{Chaser, ChaserStep, SpeedMode};
pub use collection::Collection;
pub use efx::{Efx, EfxAlgorithm, EfxHead};
pub use rgb::{RgbAlgorithm, RgbAlgorithmRegistry, RgbCell, RgbMatrix};
pub use scene::{Scene, SceneValue};

/// Stable numeric identifier of a function.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FunctionId(pub u32);

impl FunctionId {
    pub const INVALID: Self = Self(u32::MAX);
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FunctionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// What happens when a sequence reaches its last step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunOrder {
    #[default]
    Loop,
    SingleShot,
    PingPong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }
}

/// Authored fade and hold times in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub fade_in_ms: u32,
    pub fade_out_ms: u32,
    /// Plateau length between the fades. [`Timing::INFINITE`] holds until stopped.
    pub duration_ms: u32,
}

impl Timing {
    pub const INFINITE: u32 = u32::MAX;

    pub fn new(fade_in_ms: u32, fade_out_ms: u32, duration_ms: u32) -> Self {
        Self {
            fade_in_ms,
            fade_out_ms,
            duration_ms,
        }
    }

    /// Holds forever with the given fades.
    pub fn held(fade_in_ms: u32, fade_out_ms: u32) -> Self {
        Self::new(fade_in_ms, fade_out_ms, Self::INFINITE)
    }

    pub fn with_override(self, overrides: &TimingOverride) -> Self {
        Self {
            fade_in_ms: overrides.fade_in_ms.unwrap_or(self.fade_in_ms),
            fade_out_ms: overrides.fade_out_ms.unwrap_or(self.fade_out_ms),
            duration_ms: overrides.duration_ms.unwrap_or(self.duration_ms),
        }
    }

    /// Converts authored milliseconds into playback durations, scaled by the
    /// global timing multiplier. Authored values are left untouched. A time
    /// that does not fit a [`Duration`] saturates: fades to `Duration::MAX`
    /// and the hold to infinite.
    pub fn resolve(&self, multiplier: f64) -> ResolvedTiming {
        let scaled = |ms: u32| {
            let nanos = (f64::from(ms) * 1e6 * multiplier.max(0.0)).round();
            (nanos < u64::MAX as f64).then(|| Duration::from_nanos(nanos as u64))
        };
        ResolvedTiming {
            fade_in: scaled(self.fade_in_ms).unwrap_or(Duration::MAX),
            hold: if self.duration_ms == Self::INFINITE {
                None
            } else {
                scaled(self.duration_ms)
            },
            fade_out: scaled(self.fade_out_ms).unwrap_or(Duration::MAX),
        }
    }
}

/// Playback-time values of a [`Timing`]. `hold == None` means infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTiming {
    pub fade_in: Duration,
    pub hold: Option<Duration>,
    pub fade_out: Duration,
}

/// Per-start replacement of authored timing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingOverride {
    pub fade_in_ms: Option<u32>,
    pub fade_out_ms: Option<u32>,
    pub duration_ms: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FunctionKind {
    Scene(Scene),
    Chaser(Chaser),
    Efx(Efx),
    RgbMatrix(RgbMatrix),
    Collection(Collection),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub run_order: RunOrder,
    #[serde(default)]
    pub direction: Direction,
    #[serde(flatten)]
    pub kind: FunctionKind,
}

impl Function {
    pub fn new(id: impl Into<FunctionId>, name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            timing: Timing::default(),
            run_order: RunOrder::default(),
            direction: Direction::default(),
            kind,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_run_order(mut self, run_order: RunOrder) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            FunctionKind::Scene(_) => "Scene",
            FunctionKind::Chaser(_) => "Chaser",
            FunctionKind::Efx(_) => "EFX",
            FunctionKind::RgbMatrix(_) => "RGBMatrix",
            FunctionKind::Collection(_) => "Collection",
        }
    }

    /// Checks every channel address against the engine's address space.
    pub fn validate(&self, universe_count: usize) -> Result<()> {
        if self.id == FunctionId::INVALID {
            return Err(LightEngineError::InvalidInput("function id is reserved"));
        }
        let addresses: Vec<(usize, usize)> = match &self.kind {
            FunctionKind::Scene(scene) => scene.addresses().collect(),
            FunctionKind::Chaser(_) => Vec::new(),
            FunctionKind::Collection(collection) => {
                if collection.contains(self.id) {
                    return Err(LightEngineError::InvalidInput(
                        "collection cannot contain itself",
                    ));
                }
                Vec::new()
            }
            FunctionKind::Efx(efx) => efx.addresses().collect(),
            FunctionKind::RgbMatrix(matrix) => {
                if matrix.cells.len() != matrix.width * matrix.height {
                    return Err(LightEngineError::InvalidInput(
                        "RGB matrix needs exactly width * height cells",
                    ));
                }
                matrix.addresses().collect()
            }
        };
        for (universe, channel) in addresses {
            if universe >= universe_count {
                return Err(LightEngineError::UniverseOutOfRange {
                    universe,
                    count: universe_count,
                });
            }
            if channel >= UNIVERSE_SIZE {
                return Err(LightEngineError::InvalidInput(
                    "channel address exceeds universe size",
                ));
            }
        }
        Ok(())
    }
}

/// Registry of all authored functions, keyed by id.
#[derive(Debug, Default, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<FunctionId, Arc<Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a function, returning the previous definition.
    pub fn insert(&mut self, function: Function) -> Option<Arc<Function>> {
        self.functions.insert(function.id, Arc::new(function))
    }

    pub fn remove(&mut self, id: FunctionId) -> Option<Arc<Function>> {
        self.functions.remove(&id)
    }

    pub fn get(&self, id: FunctionId) -> Option<Arc<Function>> {
        self.functions.get(&id).cloned()
    }

    pub fn contains(&self, id: FunctionId) -> bool {
        self.functions.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.functions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Lowest id not used by any function.
    pub fn next_free_id(&self) -> FunctionId {
        let mut candidate = 0;
        for id in self.functions.keys() {
            if id.0 != candidate {
                break;
            }
            candidate += 1;
        }
        FunctionId(candidate)
    }
}
