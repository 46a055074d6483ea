use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::fade::{scale, FadeChannel};
use crate::function::{
    Direction, Function, FunctionKind, ResolvedTiming, RgbAlgorithm, RgbAlgorithmRegistry,
};
use crate::universe::UniverseArray;

use super::{Phase, PhaseClock};

/// Why a function cannot produce channel values on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Unplayable {
    Chaser,
    Collection,
    UnknownAlgorithm(String),
}

impl Unplayable {
    pub(crate) fn reason(&self) -> &'static str {
        match self {
            Self::Chaser => "is a chaser",
            Self::Collection => "is a collection",
            Self::UnknownAlgorithm(_) => "uses an unknown RGB algorithm",
        }
    }
}

/// A channel value requested by content for the current moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Target {
    pub universe: usize,
    pub channel: usize,
    pub value: u8,
    /// Position-like channels jump straight to their value.
    pub fades: bool,
}

/// The value generator behind a layer.
#[derive(Clone)]
pub(crate) enum Content {
    Scene(Arc<Function>),
    Efx(Arc<Function>),
    Rgb {
        function: Arc<Function>,
        algorithm: Arc<dyn RgbAlgorithm>,
    },
}

impl Content {
    pub(crate) fn for_function(
        function: &Arc<Function>,
        algorithms: &RgbAlgorithmRegistry,
    ) -> Result<Self, Unplayable> {
        match &function.kind {
            FunctionKind::Scene(_) => Ok(Self::Scene(function.clone())),
            FunctionKind::Efx(_) => Ok(Self::Efx(function.clone())),
            FunctionKind::RgbMatrix(matrix) => match algorithms.get(&matrix.algorithm) {
                Some(algorithm) => Ok(Self::Rgb {
                    function: function.clone(),
                    algorithm,
                }),
                None => Err(Unplayable::UnknownAlgorithm(matrix.algorithm.clone())),
            },
            FunctionKind::Chaser(_) => Err(Unplayable::Chaser),
            FunctionKind::Collection(_) => Err(Unplayable::Collection),
        }
    }

    fn targets(&self, elapsed: Duration, out: &mut Vec<Target>) {
        match self {
            Self::Scene(function) => {
                let FunctionKind::Scene(scene) = &function.kind else {
                    return;
                };
                out.extend(scene.values().iter().map(|v| Target {
                    universe: v.universe,
                    channel: v.channel,
                    value: v.value,
                    fades: true,
                }));
            }
            Self::Efx(function) => {
                let FunctionKind::Efx(efx) = &function.kind else {
                    return;
                };
                for (index, head) in efx.heads.iter().enumerate() {
                    let (pan, tilt) = efx.point(efx.iterator(elapsed, index, function.direction));
                    out.push(Target {
                        universe: head.universe,
                        channel: head.pan,
                        value: pan,
                        fades: false,
                    });
                    out.push(Target {
                        universe: head.universe,
                        channel: head.tilt,
                        value: tilt,
                        fades: false,
                    });
                    if let Some(dimmer) = head.dimmer {
                        out.push(Target {
                            universe: head.universe,
                            channel: dimmer,
                            value: efx.dimmer_level,
                            fades: true,
                        });
                    }
                }
            }
            Self::Rgb {
                function,
                algorithm,
            } => {
                let FunctionKind::RgbMatrix(matrix) = &function.kind else {
                    return;
                };
                let count = algorithm.step_count(matrix.width, matrix.height);
                let mut step = matrix.step_at(elapsed.as_millis() as u64, count);
                if function.direction == Direction::Backward {
                    step = count.saturating_sub(1 + step);
                }
                let colors = algorithm.map(matrix.width, matrix.height, matrix.color, step);
                for (cell, color) in matrix.cells.iter().zip(colors) {
                    out.extend(color.iter().enumerate().map(|(offset, value)| Target {
                        universe: cell.universe,
                        channel: cell.channel + offset,
                        value: *value,
                        fades: true,
                    }));
                }
            }
        }
    }
}

/// Channel fade state carried from one layer into the next.
pub(crate) type Handover = BTreeMap<(usize, usize), FadeChannel>;

/// Content played through one fade-in / hold / fade-out envelope.
pub(crate) struct Layer {
    content: Content,
    clock: PhaseClock,
    channels: Handover,
    released: bool,
    /// Set when a stop cut the envelope short.
    interrupted: bool,
    scratch: Vec<Target>,
}

impl Layer {
    /// Channels handed over from a previous layer fade from their current
    /// value to zero unless this layer's content targets them.
    pub(crate) fn new(content: Content, timing: ResolvedTiming, handover: Handover) -> Self {
        let channels = handover
            .into_iter()
            .map(|(address, mut fc)| {
                fc.retarget(0);
                (address, fc)
            })
            .collect();
        Self {
            content,
            clock: PhaseClock::new(timing),
            channels,
            released: false,
            interrupted: false,
            scratch: Vec::new(),
        }
    }

    pub(crate) fn clock(&self) -> &PhaseClock {
        &self.clock
    }

    pub(crate) fn phase(&self) -> Phase {
        self.clock.phase()
    }

    pub(crate) fn advance(&mut self, delta: Duration) -> Duration {
        self.clock.advance(delta)
    }

    pub(crate) fn release(&mut self) -> bool {
        let released = self.clock.release();
        self.interrupted |= released;
        released
    }

    /// Fade state to seed the following layer with. A layer that ran to
    /// completion has faded every channel out.
    pub(crate) fn into_handover(self) -> Handover {
        let finished = self.clock.phase() == Phase::Stopped;
        self.channels
            .into_iter()
            .map(|(address, mut fc)| {
                if finished {
                    fc.current = 0;
                }
                (address, fc)
            })
            .collect()
    }

    /// Computes this tick's values. Fading channels start from whatever the
    /// universe currently holds.
    pub(crate) fn render(
        &mut self,
        universes: &UniverseArray,
        intensity: f64,
        mut emit: impl FnMut(usize, usize, u8),
    ) {
        let phase = self.clock.phase();
        if phase == Phase::Starting {
            return;
        }
        if matches!(phase, Phase::FadingOut | Phase::Stopped) && !self.released {
            if !self.interrupted {
                self.settle_at_peak(universes, intensity);
            }
            for fc in self.channels.values_mut() {
                fc.retarget(0);
            }
            self.released = true;
        }

        self.scratch.clear();
        if phase != Phase::Stopped {
            self.content.targets(self.clock.elapsed(), &mut self.scratch);
        }

        let mut live = BTreeSet::new();
        for target in &self.scratch {
            if !target.fades {
                emit(target.universe, target.channel, target.value);
                continue;
            }
            if self.released {
                continue;
            }
            let address = (target.universe, target.channel);
            let level = scale(target.value, intensity);
            self.channels
                .entry(address)
                .or_insert_with(|| {
                    let start = universes.value(address.0, address.1).unwrap_or(0);
                    FadeChannel::new(address.0, address.1, start, level)
                })
                .target = level;
            live.insert(address);
        }

        let ratio = self.clock.ratio();
        for fc in self.channels.values_mut() {
            let value = match phase {
                Phase::Holding => {
                    fc.start = fc.target;
                    fc.current = fc.target;
                    fc.current
                }
                _ => fc.calculate(ratio),
            };
            emit(fc.universe, fc.channel, value);
        }

        // Handed-over channels that reached zero are no longer ours.
        if phase == Phase::Holding {
            self.channels.retain(|address, _| live.contains(address));
        }
    }

    /// Puts every fading channel on its full level. The envelope ran to its
    /// end, so the fade-out starts from the target no matter how far the
    /// last tick got into the fade-in.
    fn settle_at_peak(&mut self, universes: &UniverseArray, intensity: f64) {
        self.scratch.clear();
        self.content.targets(self.clock.elapsed(), &mut self.scratch);
        for target in self.scratch.iter().filter(|t| t.fades) {
            let address = (target.universe, target.channel);
            let level = scale(target.value, intensity);
            self.channels
                .entry(address)
                .or_insert_with(|| {
                    let start = universes.value(address.0, address.1).unwrap_or(0);
                    FadeChannel::new(address.0, address.1, start, level)
                })
                .target = level;
        }
        for fc in self.channels.values_mut() {
            fc.start = fc.target;
            fc.current = fc.target;
        }
    }
}
