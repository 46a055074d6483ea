//! Running instances of functions.
//!
//! Every started function becomes an [`Instance`] that walks a phase
//! machine (`Starting -> FadingIn -> Holding -> FadingOut -> Stopped`) on
//! each tick and renders channel contributions for the resolver.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::fade::fade_ratio;
use crate::function::{
    Function, FunctionId, FunctionKind, FunctionRegistry, ResolvedTiming, RgbAlgorithmRegistry,
    TimingOverride,
};
use crate::resolver::Contribution;
use crate::universe::UniverseArray;

mod chaser;
mod layer;

pub use chaser::StepSkip;

use chaser::ChaserRunner;
use layer::{Content, Layer, Unplayable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Starting,
    FadingIn,
    Holding,
    FadingOut,
    Stopped,
}

/// Tracks progress through one fade-in / hold / fade-out envelope.
#[derive(Debug, Clone)]
pub struct PhaseClock {
    timing: ResolvedTiming,
    phase: Phase,
    in_phase: Duration,
    elapsed: Duration,
    release_level: f64,
}

impl PhaseClock {
    pub fn new(timing: ResolvedTiming) -> Self {
        Self {
            timing,
            phase: Phase::Starting,
            in_phase: Duration::ZERO,
            elapsed: Duration::ZERO,
            release_level: 1.0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn timing(&self) -> &ResolvedTiming {
        &self.timing
    }

    /// Time spent outside `Starting` and `Stopped`.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Moves forward by `delta`, crossing as many phase boundaries as it
    /// covers. A boundary reached exactly counts as crossed. Returns the
    /// part of `delta` left over after reaching `Stopped`.
    pub fn advance(&mut self, mut delta: Duration) -> Duration {
        loop {
            let window = match self.phase {
                Phase::Starting => {
                    self.enter(Phase::FadingIn);
                    continue;
                }
                Phase::FadingIn => Some(self.timing.fade_in),
                Phase::Holding => self.timing.hold,
                Phase::FadingOut => Some(self.timing.fade_out),
                Phase::Stopped => return delta,
            };
            let Some(window) = window else {
                self.in_phase += delta;
                self.elapsed += delta;
                return Duration::ZERO;
            };
            let remaining = window.saturating_sub(self.in_phase);
            if delta < remaining {
                self.in_phase += delta;
                self.elapsed += delta;
                return Duration::ZERO;
            }
            delta -= remaining;
            self.elapsed += remaining;
            let next = match self.phase {
                Phase::FadingIn => Phase::Holding,
                Phase::Holding => Phase::FadingOut,
                _ => Phase::Stopped,
            };
            self.enter(next);
        }
    }

    /// Jumps to `FadingOut`. Returns false when already releasing.
    pub fn release(&mut self) -> bool {
        match self.phase {
            Phase::FadingOut | Phase::Stopped => false,
            _ => {
                self.release_level = self.envelope();
                self.enter(Phase::FadingOut);
                true
            }
        }
    }

    /// Progress through the current fade window.
    pub fn ratio(&self) -> f64 {
        match self.phase {
            Phase::Starting => 0.0,
            Phase::FadingIn => fade_ratio(self.in_phase, self.timing.fade_in),
            Phase::FadingOut => fade_ratio(self.in_phase, self.timing.fade_out),
            Phase::Holding | Phase::Stopped => 1.0,
        }
    }

    /// Overall output level implied by the phase, in `[0, 1]`.
    pub fn envelope(&self) -> f64 {
        match self.phase {
            Phase::Starting | Phase::Stopped => 0.0,
            Phase::FadingIn => self.ratio(),
            Phase::Holding => 1.0,
            Phase::FadingOut => self.release_level * (1.0 - self.ratio()),
        }
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.in_phase = Duration::ZERO;
        if phase == Phase::FadingIn {
            self.release_level = 1.0;
        }
    }
}

/// Everything needed to turn a function definition into an instance.
pub struct StartContext<'a> {
    pub functions: &'a FunctionRegistry,
    pub algorithms: &'a RgbAlgorithmRegistry,
    pub timing_multiplier: f64,
    pub overrides: TimingOverride,
    pub intensity: f64,
}

impl StartContext<'_> {
    fn resolve(&self, timing: crate::function::Timing) -> ResolvedTiming {
        timing
            .with_override(&self.overrides)
            .resolve(self.timing_multiplier)
    }
}

enum Body {
    Single(Layer),
    Chaser(ChaserRunner),
    /// Members of a collection, sharing its activation.
    Members(Vec<Instance>),
    Inert,
}

/// A started function.
pub struct Instance {
    function: Arc<Function>,
    activation: u64,
    intensity: f64,
    body: Body,
}

impl Instance {
    /// Builds the instance. Problems with the definition are recorded as
    /// diagnostics; an unplayable function yields an already stopped instance.
    pub fn start(
        function: Arc<Function>,
        activation: u64,
        ctx: &StartContext<'_>,
        diagnostics: &mut DiagnosticLog,
    ) -> Self {
        Self::start_within(function, activation, ctx, diagnostics, &mut Vec::new())
    }

    /// `outer` lists the collections this instance is nested in.
    fn start_within(
        function: Arc<Function>,
        activation: u64,
        ctx: &StartContext<'_>,
        diagnostics: &mut DiagnosticLog,
        outer: &mut Vec<FunctionId>,
    ) -> Self {
        let body = match &function.kind {
            FunctionKind::Chaser(chaser) => {
                Body::Chaser(ChaserRunner::new(&function, chaser, ctx, diagnostics))
            }
            FunctionKind::Collection(collection) => {
                outer.push(function.id);
                let mut members = Vec::with_capacity(collection.functions().len());
                for &id in collection.functions() {
                    let reason = match ctx.functions.get(id) {
                        Some(member) if !outer.contains(&id) => {
                            members.push(Self::start_within(
                                member,
                                activation,
                                ctx,
                                diagnostics,
                                outer,
                            ));
                            continue;
                        }
                        Some(_) => "contains this collection",
                        None => "does not exist",
                    };
                    diagnostics.record(Diagnostic::MemberSkipped {
                        collection: function.id,
                        function: id,
                        reason,
                    });
                }
                outer.pop();
                Body::Members(members)
            }
            _ => match Content::for_function(&function, ctx.algorithms) {
                Ok(content) => Body::Single(Layer::new(
                    content,
                    ctx.resolve(function.timing),
                    Default::default(),
                )),
                Err(Unplayable::UnknownAlgorithm(algorithm)) => {
                    diagnostics.record(Diagnostic::UnknownAlgorithm {
                        function: function.id,
                        algorithm,
                    });
                    Body::Inert
                }
                Err(Unplayable::Chaser | Unplayable::Collection) => Body::Inert,
            },
        };
        tracing::debug!(
            function = %function.id,
            kind = function.type_name(),
            activation,
            "instance started"
        );
        Self {
            function,
            activation,
            intensity: ctx.intensity.clamp(0.0, 1.0),
            body,
        }
    }

    pub fn id(&self) -> FunctionId {
        self.function.id
    }

    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    /// Monotonic start order; later activations win LTP merges.
    pub fn activation(&self) -> u64 {
        self.activation
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn set_intensity(&mut self, intensity: f64) {
        self.intensity = intensity.clamp(0.0, 1.0);
        if let Body::Members(members) = &mut self.body {
            for member in members {
                member.set_intensity(intensity);
            }
        }
    }

    /// A collection reports the phase of its first member still playing.
    pub fn phase(&self) -> Phase {
        match &self.body {
            Body::Single(layer) => layer.phase(),
            Body::Chaser(runner) => runner.phase(),
            Body::Members(members) => members
                .iter()
                .map(Instance::phase)
                .find(|phase| *phase != Phase::Stopped)
                .unwrap_or(Phase::Stopped),
            Body::Inert => Phase::Stopped,
        }
    }

    pub fn envelope(&self) -> f64 {
        match &self.body {
            Body::Single(layer) => layer.clock().envelope(),
            Body::Chaser(runner) => runner.envelope(),
            Body::Members(members) => members
                .iter()
                .map(Instance::envelope)
                .fold(0.0, f64::max),
            Body::Inert => 0.0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase() == Phase::Stopped
    }

    /// True once a stop was requested or the content is fading out.
    pub fn is_releasing(&self) -> bool {
        match &self.body {
            Body::Chaser(runner) => runner.is_stopping() || self.is_finished(),
            Body::Members(members) => members.iter().all(Instance::is_releasing),
            _ => matches!(self.phase(), Phase::FadingOut | Phase::Stopped),
        }
    }

    /// Index of the authored chaser step currently playing.
    pub fn current_step(&self) -> Option<usize> {
        match &self.body {
            Body::Chaser(runner) => runner.current_step(),
            _ => None,
        }
    }

    pub fn advance(&mut self, delta: Duration) {
        match &mut self.body {
            Body::Single(layer) => {
                layer.advance(delta);
            }
            Body::Chaser(runner) => runner.advance(delta),
            Body::Members(members) => {
                for member in members {
                    member.advance(delta);
                }
            }
            Body::Inert => {}
        }
    }

    /// Appends this tick's contributions to `out`.
    pub fn render(&mut self, universes: &UniverseArray, out: &mut Vec<Contribution>) {
        if let Body::Members(members) = &mut self.body {
            for member in members {
                member.render(universes, out);
            }
            return;
        }
        let function = self.function.id;
        let activation = self.activation;
        let emit = |universe, channel, value| {
            out.push(Contribution {
                universe,
                channel,
                value,
                activation,
                function,
            })
        };
        match &mut self.body {
            Body::Single(layer) => layer.render(universes, self.intensity, emit),
            Body::Chaser(runner) => runner.render(universes, self.intensity, emit),
            Body::Members(_) | Body::Inert => {}
        }
    }

    /// Begins the fade-out. Stopping twice has no further effect.
    pub fn stop(&mut self) {
        if self.release() {
            tracing::debug!(function = %self.function.id, "instance releasing");
        }
    }

    fn release(&mut self) -> bool {
        match &mut self.body {
            Body::Single(layer) => layer.release(),
            Body::Chaser(runner) => runner.stop(),
            Body::Members(members) => members
                .iter_mut()
                .fold(false, |released, member| member.release() || released),
            Body::Inert => false,
        }
    }

    pub fn next_step(&mut self) {
        self.skip(StepSkip::Next);
    }

    pub fn previous_step(&mut self) {
        self.skip(StepSkip::Previous);
    }

    /// Chasers inside a collection step together.
    fn skip(&mut self, skip: StepSkip) {
        match &mut self.body {
            Body::Chaser(runner) => runner.skip(skip),
            Body::Members(members) => {
                for member in members {
                    member.skip(skip);
                }
            }
            Body::Single(_) | Body::Inert => {}
        }
    }
}
