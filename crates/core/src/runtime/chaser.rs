use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::function::{
    Chaser, ChaserStep, Direction, Function, FunctionId, ResolvedTiming, RunOrder, SpeedMode,
};
use crate::universe::UniverseArray;

use super::layer::{Content, Layer};
use super::{Phase, StartContext};

/// Manual step change requested by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSkip {
    Next,
    Previous,
}

struct ResolvedStep {
    /// Position in the authored step list.
    index: usize,
    content: Content,
    timing: ResolvedTiming,
}

/// Plays chaser steps one after another, each as its own [`Layer`].
pub(crate) struct ChaserRunner {
    chaser: FunctionId,
    steps: Vec<ResolvedStep>,
    run_order: RunOrder,
    direction: Direction,
    position: usize,
    layer: Option<Layer>,
    pending: Option<StepSkip>,
    stopping: bool,
}

impl ChaserRunner {
    pub(crate) fn new(
        function: &Arc<Function>,
        chaser: &Chaser,
        ctx: &StartContext<'_>,
        diagnostics: &mut DiagnosticLog,
    ) -> Self {
        let mut steps = Vec::with_capacity(chaser.steps().len());
        for (index, step) in chaser.steps().iter().enumerate() {
            match Self::resolve_step(function, chaser, step, ctx) {
                Ok(resolved) => steps.push(ResolvedStep { index, ..resolved }),
                Err(reason) => diagnostics.record(Diagnostic::StepSkipped {
                    chaser: function.id,
                    step: index,
                    function: step.function,
                    reason,
                }),
            }
        }
        if steps.is_empty() {
            diagnostics.record(Diagnostic::ChaserEmpty(function.id));
        }

        let position = match function.direction {
            Direction::Forward => 0,
            Direction::Backward => steps.len().saturating_sub(1),
        };
        let layer = steps
            .get(position)
            .map(|step| Layer::new(step.content.clone(), step.timing, Default::default()));
        Self {
            chaser: function.id,
            steps,
            run_order: function.run_order,
            direction: function.direction,
            position,
            layer,
            pending: None,
            stopping: false,
        }
    }

    fn resolve_step(
        function: &Function,
        chaser: &Chaser,
        step: &ChaserStep,
        ctx: &StartContext<'_>,
    ) -> Result<ResolvedStep, &'static str> {
        let target = ctx.functions.get(step.function).ok_or("does not exist")?;
        let content = Content::for_function(&target, ctx.algorithms).map_err(|e| e.reason())?;
        let timing = match chaser.speed_mode {
            SpeedMode::PerStep => step.timing(),
            SpeedMode::Common => function.timing,
        };
        Ok(ResolvedStep {
            index: 0,
            content,
            timing: ctx.resolve(timing),
        })
    }

    pub(crate) fn phase(&self) -> Phase {
        self.layer.as_ref().map_or(Phase::Stopped, Layer::phase)
    }

    pub(crate) fn envelope(&self) -> f64 {
        self.layer
            .as_ref()
            .map_or(0.0, |layer| layer.clock().envelope())
    }

    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub(crate) fn current_step(&self) -> Option<usize> {
        self.layer.as_ref()?;
        self.steps.get(self.position).map(|step| step.index)
    }

    pub(crate) fn stop(&mut self) -> bool {
        if self.stopping {
            return false;
        }
        self.stopping = true;
        self.pending = None;
        self.layer.as_mut().is_some_and(Layer::release)
    }

    /// Requests a step change; the latest request wins and is applied on the
    /// next advance.
    pub(crate) fn skip(&mut self, skip: StepSkip) {
        if !self.stopping && self.layer.is_some() {
            self.pending = Some(skip);
        }
    }

    pub(crate) fn advance(&mut self, delta: Duration) {
        if let Some(skip) = self.pending.take() {
            let direction = match skip {
                StepSkip::Next => self.direction,
                StepSkip::Previous => self.direction.reversed(),
            };
            let next = self.neighbour(direction);
            self.switch_to(next);
        }

        let mut remaining = delta;
        let mut switches = 0;
        loop {
            let Some(layer) = self.layer.as_mut() else {
                return;
            };
            let leftover = layer.advance(remaining);
            if layer.phase() != Phase::Stopped || self.stopping {
                return;
            }
            let Some(next) = self.following() else {
                tracing::debug!(chaser = %self.chaser, "chaser finished");
                return;
            };
            self.switch_to(next);
            remaining = leftover;
            switches += 1;
            // Zero-length steps: leave the new step for the next tick.
            if switches > self.steps.len() {
                return;
            }
        }
    }

    pub(crate) fn render(
        &mut self,
        universes: &UniverseArray,
        intensity: f64,
        emit: impl FnMut(usize, usize, u8),
    ) {
        if let Some(layer) = self.layer.as_mut() {
            layer.render(universes, intensity, emit);
        }
    }

    /// Step that follows the current one under the run order, turning the
    /// direction around for ping-pong. `None` ends a single-shot run.
    fn following(&mut self) -> Option<usize> {
        let len = self.steps.len();
        match (self.direction, self.run_order) {
            (Direction::Forward, _) if self.position + 1 < len => Some(self.position + 1),
            (Direction::Backward, _) if self.position > 0 => Some(self.position - 1),
            (_, RunOrder::SingleShot) => None,
            (direction, RunOrder::Loop) => Some(match direction {
                Direction::Forward => 0,
                Direction::Backward => len - 1,
            }),
            (direction, RunOrder::PingPong) => {
                self.direction = direction.reversed();
                Some(match self.direction {
                    Direction::Forward => 1.min(len - 1),
                    Direction::Backward => len.saturating_sub(2),
                })
            }
        }
    }

    /// Adjacent step in `direction`, wrapping at either end.
    fn neighbour(&self, direction: Direction) -> usize {
        let len = self.steps.len();
        match direction {
            Direction::Forward => (self.position + 1) % len,
            Direction::Backward => (self.position + len - 1) % len,
        }
    }

    fn switch_to(&mut self, position: usize) {
        let handover = self
            .layer
            .take()
            .map(Layer::into_handover)
            .unwrap_or_default();
        self.position = position;
        let step = &self.steps[position];
        tracing::trace!(chaser = %self.chaser, step = step.index, "chaser step");
        self.layer = Some(Layer::new(step.content.clone(), step.timing, handover));
    }
}
