//! The tick-driven engine.
//!
//! [`Engine`] owns everything playback touches: the function registry,
//! running instances, universe buffers and the patch table. Other threads
//! talk to it through a [`CommandQueue`]; queued commands are applied at the
//! start of the next tick, so a tick always computes against one consistent
//! state. [`EngineHandle`] runs an engine on its own thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::function::{
    Function, FunctionId, FunctionRegistry, RgbAlgorithmRegistry, TimingOverride,
};
use crate::patch::{
    OutputLine, PatchInfo, PatchTable, Transport, TransportRegistry, INVALID_LINE,
};
use crate::resolver::{self, Contribution};
use crate::runtime::{Instance, Phase, StartContext};
use crate::universe::{UniverseArray, UniverseSnapshot};
use crate::{LightEngineError, Result};

mod handle;

pub use handle::{EngineHandle, EngineStatus};

/// Per-start playback options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartOptions {
    /// Scales every faded channel value, 0.0 to 1.0.
    pub intensity: f64,
    pub timing: TimingOverride,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            intensity: 1.0,
            timing: TimingOverride::default(),
        }
    }
}

/// A request applied at the next tick boundary.
#[derive(Debug, Clone)]
pub enum Command {
    Start {
        function: FunctionId,
        options: StartOptions,
    },
    Stop(FunctionId),
    StopAll,
    NextStep(FunctionId),
    PreviousStep(FunctionId),
    SetIntensity {
        function: FunctionId,
        intensity: f64,
    },
    /// `transport == None` unpatches the universe.
    SetPatch {
        universe: usize,
        transport: Option<String>,
        line: OutputLine,
    },
    Reconnect(usize),
    UpsertFunction(Box<Function>),
    RemoveFunction(FunctionId),
}

/// Thread-safe FIFO of pending commands.
#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<VecDeque<Command>>>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) -> Result<()> {
        self.lock()?.push_back(command);
        Ok(())
    }

    /// Takes every queued command. The lock is released before returning.
    pub fn drain(&self) -> Result<Vec<Command>> {
        Ok(self.lock()?.drain(..).collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<Command>>> {
        self.inner
            .lock()
            .map_err(|_| LightEngineError::Poisoned("command queue"))
    }
}

/// Measures the time between ticks, clamped so a stalled thread does not
/// make playback jump ahead.
#[derive(Debug, Clone)]
pub struct TickClock {
    last: Option<Instant>,
    max_delta: Duration,
}

impl TickClock {
    pub fn new(max_delta: Duration) -> Self {
        Self {
            last: None,
            max_delta,
        }
    }

    /// Delta since the previous tick; zero for the first one.
    pub fn observe(&mut self, now: Instant) -> Duration {
        let delta = self
            .last
            .map_or(Duration::ZERO, |last| now.saturating_duration_since(last));
        self.last = Some(now);
        self.clamp(delta)
    }

    pub fn clamp(&self, delta: Duration) -> Duration {
        delta.min(self.max_delta)
    }

    /// Time of the latest tick, or the current time before the first tick.
    pub fn now(&self) -> Instant {
        self.last.unwrap_or_else(Instant::now)
    }
}

/// Monitoring view of one running instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunningFunction {
    pub id: FunctionId,
    pub name: String,
    pub activation: u64,
    pub phase: Phase,
    pub step: Option<usize>,
    pub envelope: f64,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickSummary {
    pub delta: Duration,
    pub running: usize,
    pub contributions: usize,
    pub frames_sent: usize,
}

/// The explicitly owned engine context.
pub struct Engine {
    config: EngineConfig,
    functions: FunctionRegistry,
    algorithms: RgbAlgorithmRegistry,
    transports: Arc<Mutex<TransportRegistry>>,
    patches: PatchTable,
    universes: UniverseArray,
    instances: Vec<Instance>,
    next_activation: u64,
    commands: CommandQueue,
    clock: TickClock,
    diagnostics: DiagnosticLog,
    contributions: Vec<Contribution>,
    tick_count: u64,
}

impl Engine {
    /// Validates the configuration and allocates the universe buffers.
    /// Allocation failure is the only fatal engine error.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let universes = UniverseArray::new(config.universe_count)?;
        tracing::info!(
            universes = config.universe_count,
            tick_ms = config.tick_interval_ms,
            merge = ?config.merge_mode,
            "engine created"
        );
        Ok(Self {
            patches: PatchTable::new(config.universe_count, config.settle_delay()),
            clock: TickClock::new(config.max_tick_delta()),
            diagnostics: DiagnosticLog::new(config.diagnostics_capacity),
            functions: FunctionRegistry::new(),
            algorithms: RgbAlgorithmRegistry::with_builtins(),
            transports: Arc::new(Mutex::new(TransportRegistry::new())),
            universes,
            instances: Vec::new(),
            next_activation: 0,
            commands: CommandQueue::new(),
            contributions: Vec::new(),
            tick_count: 0,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn algorithms_mut(&mut self) -> &mut RgbAlgorithmRegistry {
        &mut self.algorithms
    }

    pub fn universes(&self) -> &UniverseArray {
        &self.universes
    }

    pub fn patches(&self) -> &PatchTable {
        &self.patches
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Queue for submitting commands from other threads.
    pub fn command_queue(&self) -> CommandQueue {
        self.commands.clone()
    }

    /// Registry shared with every handle of this engine.
    pub fn transport_registry(&self) -> Arc<Mutex<TransportRegistry>> {
        self.transports.clone()
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
        tracing::info!(transport = transport.name(), "transport registered");
        self.lock_transports()?.register(transport);
        Ok(())
    }

    /// Names of the registered transports.
    pub fn plugin_names(&self) -> Result<Vec<String>> {
        Ok(self
            .lock_transports()?
            .names()
            .map(str::to_string)
            .collect())
    }

    /// Adds or replaces a function definition. Refused while it runs.
    pub fn upsert_function(&mut self, function: Function) -> Result<()> {
        function.validate(self.universes.len())?;
        if self.is_running(function.id) {
            return Err(LightEngineError::FunctionRunning(function.id));
        }
        tracing::debug!(function = %function.id, name = %function.name, "function stored");
        self.functions.insert(function);
        Ok(())
    }

    pub fn remove_function(&mut self, id: FunctionId) -> Result<Arc<Function>> {
        if self.is_running(id) {
            return Err(LightEngineError::FunctionRunning(id));
        }
        self.functions
            .remove(id)
            .ok_or(LightEngineError::FunctionNotFound(id))
    }

    pub fn is_running(&self, id: FunctionId) -> bool {
        self.instances.iter().any(|i| i.id() == id)
    }

    /// Starts a function. Starting one that is already running and not
    /// releasing does nothing; a releasing one is restarted.
    pub fn start(&mut self, id: FunctionId, options: StartOptions) -> Result<()> {
        let function = self
            .functions
            .get(id)
            .ok_or(LightEngineError::FunctionNotFound(id))?;
        if let Some(index) = self.instances.iter().position(|i| i.id() == id) {
            if !self.instances[index].is_releasing() {
                return Ok(());
            }
            self.instances.remove(index);
        }

        let activation = self.next_activation;
        self.next_activation += 1;
        let ctx = StartContext {
            functions: &self.functions,
            algorithms: &self.algorithms,
            timing_multiplier: self.config.timing_multiplier,
            overrides: options.timing,
            intensity: options.intensity,
        };
        let instance = Instance::start(function, activation, &ctx, &mut self.diagnostics);
        self.instances.push(instance);
        Ok(())
    }

    /// Releases a running function. Unknown or stopped ids are ignored.
    pub fn stop(&mut self, id: FunctionId) {
        if let Some(instance) = self.instance_mut(id) {
            instance.stop();
        }
    }

    /// Removes every instance at once, without fade-out.
    pub fn stop_all(&mut self) {
        if !self.instances.is_empty() {
            tracing::info!(count = self.instances.len(), "stopping all functions");
        }
        self.instances.clear();
    }

    pub fn next_step(&mut self, id: FunctionId) {
        if let Some(instance) = self.instance_mut(id) {
            instance.next_step();
        }
    }

    pub fn previous_step(&mut self, id: FunctionId) {
        if let Some(instance) = self.instance_mut(id) {
            instance.previous_step();
        }
    }

    pub fn set_intensity(&mut self, id: FunctionId, intensity: f64) {
        if let Some(instance) = self.instance_mut(id) {
            instance.set_intensity(intensity);
        }
    }

    /// Patches `universe` to `line` of the transport registered as
    /// `transport`, or unpatches it when `transport` is `None`.
    pub fn set_patch(
        &mut self,
        universe: usize,
        transport: Option<&str>,
        line: OutputLine,
    ) -> Result<()> {
        let now = self.clock.now();
        let Some(name) = transport else {
            return self.patches.set_patch(universe, None, INVALID_LINE, now);
        };
        let handle = self
            .lock_transports()?
            .get(name)
            .ok_or_else(|| LightEngineError::UnknownTransport(name.to_string()))?;
        self.patches.set_patch(universe, Some(&handle), line, now)
    }

    pub fn reconnect(&mut self, universe: usize) -> Result<()> {
        let now = self.clock.now();
        self.patches.reconnect(universe, now)
    }

    /// Runs one tick at wall-clock time `now`.
    pub fn tick_at(&mut self, now: Instant) -> TickSummary {
        let delta = self.clock.observe(now);
        self.run_tick(now, delta)
    }

    /// Runs one tick that advances playback by `delta` (clamped), without
    /// consulting the wall clock.
    pub fn advance(&mut self, delta: Duration) -> TickSummary {
        let now = self.clock.now() + delta;
        self.clock.observe(now);
        let delta = self.clock.clamp(delta);
        self.run_tick(now, delta)
    }

    fn run_tick(&mut self, now: Instant, delta: Duration) -> TickSummary {
        let commands = match self.commands.drain() {
            Ok(commands) => commands,
            Err(err) => {
                tracing::error!(%err, "dropping queued commands");
                Vec::new()
            }
        };
        let first_new = self.next_activation;
        for command in commands {
            self.apply(command);
        }

        self.patches.poll(now, &mut self.diagnostics);

        for instance in &mut self.instances {
            // Instances started by this tick's commands begin at zero.
            let step = if instance.activation() >= first_new {
                Duration::ZERO
            } else {
                delta
            };
            instance.advance(step);
        }

        self.contributions.clear();
        for instance in &mut self.instances {
            instance.render(&self.universes, &mut self.contributions);
        }
        let contributions = self.contributions.len();
        resolver::resolve(
            &mut self.contributions,
            self.config.merge_mode,
            &mut self.universes,
            &mut self.diagnostics,
        );

        self.instances.retain(|instance| {
            let finished = instance.is_finished();
            if finished {
                tracing::debug!(function = %instance.id(), "instance finished");
            }
            !finished
        });

        let frames_sent = self.patches.flush(&mut self.universes, &mut self.diagnostics);
        self.tick_count += 1;
        tracing::trace!(
            tick = self.tick_count,
            delta_us = delta.as_micros() as u64,
            contributions,
            frames_sent,
            "tick"
        );
        TickSummary {
            delta,
            running: self.instances.len(),
            contributions,
            frames_sent,
        }
    }

    /// Applies a command, turning failures into diagnostics.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Start { function, options } => {
                if self.start(function, options).is_err() {
                    self.diagnostics
                        .record(Diagnostic::UnknownFunction(function));
                }
            }
            Command::Stop(function) => self.stop(function),
            Command::StopAll => self.stop_all(),
            Command::NextStep(function) => self.next_step(function),
            Command::PreviousStep(function) => self.previous_step(function),
            Command::SetIntensity {
                function,
                intensity,
            } => self.set_intensity(function, intensity),
            Command::SetPatch {
                universe,
                transport,
                line,
            } => {
                if let Err(err) = self.set_patch(universe, transport.as_deref(), line) {
                    self.record_patch_error(universe, err);
                }
            }
            Command::Reconnect(universe) => {
                if let Err(err) = self.reconnect(universe) {
                    self.record_patch_error(universe, err);
                }
            }
            Command::UpsertFunction(function) => {
                let id = function.id;
                if let Err(err) = self.upsert_function(*function) {
                    self.diagnostics
                        .record(Diagnostic::EditRefused(id, err.to_string()));
                }
            }
            Command::RemoveFunction(id) => {
                if let Err(err) = self.remove_function(id) {
                    self.diagnostics
                        .record(Diagnostic::EditRefused(id, err.to_string()));
                }
            }
        }
    }

    fn record_patch_error(&mut self, universe: usize, err: LightEngineError) {
        let diagnostic = match (&err, self.patches.patch(universe)) {
            (LightEngineError::Transport(transport_err), Some(info)) => {
                Diagnostic::TransportOpenFailed {
                    universe,
                    transport: info.transport,
                    line: info.line,
                    reason: transport_err.to_string(),
                }
            }
            _ => Diagnostic::PatchRefused {
                universe,
                reason: err.to_string(),
            },
        };
        self.diagnostics.record(diagnostic);
    }

    pub fn snapshot(&self) -> UniverseSnapshot {
        self.universes.snapshot()
    }

    pub fn running_functions(&self) -> Vec<RunningFunction> {
        self.instances
            .iter()
            .map(|instance| RunningFunction {
                id: instance.id(),
                name: instance.function().name.clone(),
                activation: instance.activation(),
                phase: instance.phase(),
                step: instance.current_step(),
                envelope: instance.envelope(),
            })
            .collect()
    }

    pub fn patch_infos(&self) -> Vec<PatchInfo> {
        self.patches.infos()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn drain_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.drain()
    }

    fn instance_mut(&mut self, id: FunctionId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id() == id)
    }

    fn lock_transports(&self) -> Result<MutexGuard<'_, TransportRegistry>> {
        self.transports
            .lock()
            .map_err(|_| LightEngineError::Poisoned("transport registry"))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("functions", &self.functions.len())
            .field("running", &self.instances.len())
            .field("tick_count", &self.tick_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeMode;
    use crate::function::{Chaser, ChaserStep, FunctionKind, RunOrder, Scene, SceneValue, Timing};
    use crate::record::{CaptureSettings, CaptureTransport};

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    fn scene(id: u32, values: &[(usize, usize, u8)], timing: Timing) -> Function {
        let mut scene = Scene::default();
        for &(universe, channel, value) in values {
            scene.set_value(SceneValue::new(universe, channel, value));
        }
        Function::new(id, format!("Scene {id}"), FunctionKind::Scene(scene)).with_timing(timing)
    }

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn commands_take_effect_on_the_next_tick() {
        let mut engine = engine();
        engine
            .upsert_function(scene(1, &[(0, 0, 255)], Timing::held(0, 0)))
            .unwrap();
        let queue = engine.command_queue();
        queue
            .push(Command::Start {
                function: FunctionId(1),
                options: StartOptions::default(),
            })
            .unwrap();
        assert_eq!(engine.universes().value(0, 0), Some(0));
        assert!(engine.running_functions().is_empty());

        engine.advance(ms(25));
        assert_eq!(engine.universes().value(0, 0), Some(255));
        assert_eq!(engine.running_functions()[0].phase, Phase::Holding);
        assert_eq!(queue.len().unwrap(), 0);
    }

    #[test]
    fn large_deltas_are_clamped() {
        let mut engine = engine();
        let start = Instant::now();
        assert_eq!(engine.tick_at(start).delta, Duration::ZERO);
        assert_eq!(engine.tick_at(start + ms(20)).delta, ms(20));
        assert_eq!(engine.tick_at(start + ms(2020)).delta, ms(50));
        assert_eq!(engine.advance(ms(500)).delta, ms(50));
    }

    #[test]
    fn later_start_wins_and_swapping_order_swaps_winner() {
        for (first, second, expected) in [(1, 2, 200), (2, 1, 50)] {
            let mut engine = engine();
            engine
                .upsert_function(scene(1, &[(0, 1, 50)], Timing::held(0, 0)))
                .unwrap();
            engine
                .upsert_function(scene(2, &[(0, 1, 200)], Timing::held(0, 0)))
                .unwrap();
            engine.start(FunctionId(first), StartOptions::default()).unwrap();
            engine.start(FunctionId(second), StartOptions::default()).unwrap();
            engine.advance(ms(25));
            assert_eq!(engine.universes().value(0, 1), Some(expected));
        }
    }

    #[test]
    fn htp_mode_takes_the_highest_value() {
        let config = EngineConfig {
            merge_mode: MergeMode::Htp,
            ..Default::default()
        };
        let mut engine = Engine::new(config).unwrap();
        engine
            .upsert_function(scene(1, &[(0, 1, 200)], Timing::held(0, 0)))
            .unwrap();
        engine
            .upsert_function(scene(2, &[(0, 1, 50)], Timing::held(0, 0)))
            .unwrap();
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        engine.start(FunctionId(2), StartOptions::default()).unwrap();
        engine.advance(ms(25));
        assert_eq!(engine.universes().value(0, 1), Some(200));
    }

    #[test]
    fn values_hold_after_an_instance_is_gone() {
        let mut engine = engine();
        engine
            .upsert_function(scene(1, &[(0, 0, 100)], Timing::new(0, 0, 50)))
            .unwrap();
        engine.universes.get_mut(0).unwrap().write(9, 42);
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        engine.advance(ms(25));
        assert_eq!(engine.universes().value(0, 0), Some(100));

        engine.advance(ms(25));
        engine.advance(ms(25));
        assert!(engine.running_functions().is_empty());
        // Fade-out to zero was rendered; untouched channels keep their value.
        assert_eq!(engine.universes().value(0, 0), Some(0));
        assert_eq!(engine.universes().value(0, 9), Some(42));
    }

    #[test]
    fn stop_is_idempotent_and_start_while_running_is_a_no_op() {
        let mut engine = engine();
        engine
            .upsert_function(scene(1, &[(0, 0, 100)], Timing::held(0, 100)))
            .unwrap();
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        engine.advance(ms(25));
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        assert_eq!(engine.running_functions()[0].activation, 0);

        engine.stop(FunctionId(1));
        engine.stop(FunctionId(1));
        engine.stop(FunctionId(77));
        engine.advance(ms(50));
        assert_eq!(engine.universes().value(0, 0), Some(50));

        // Restarting a releasing function replaces the instance.
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        assert_eq!(engine.running_functions()[0].activation, 1);
    }

    #[test]
    fn unknown_functions_become_diagnostics() {
        let mut engine = engine();
        engine.apply(Command::Start {
            function: FunctionId(9999),
            options: StartOptions::default(),
        });
        assert_eq!(
            engine.drain_diagnostics(),
            vec![Diagnostic::UnknownFunction(FunctionId(9999))]
        );
    }

    #[test]
    fn running_functions_cannot_be_edited() {
        let mut engine = engine();
        engine
            .upsert_function(scene(1, &[(0, 0, 100)], Timing::held(0, 0)))
            .unwrap();
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        assert!(matches!(
            engine.upsert_function(scene(1, &[(0, 0, 1)], Timing::held(0, 0))),
            Err(LightEngineError::FunctionRunning(FunctionId(1)))
        ));
        assert!(engine.remove_function(FunctionId(1)).is_err());

        engine.stop_all();
        assert!(engine.remove_function(FunctionId(1)).is_ok());
    }

    #[test]
    fn functions_outside_the_address_space_are_rejected() {
        let mut engine = engine();
        assert!(matches!(
            engine.upsert_function(scene(1, &[(4, 0, 1)], Timing::default())),
            Err(LightEngineError::UniverseOutOfRange { universe: 4, .. })
        ));
    }

    #[test]
    fn chaser_of_missing_steps_never_runs() {
        let mut engine = engine();
        let chaser = Function::new(
            5,
            "Ghost",
            FunctionKind::Chaser(Chaser::new([ChaserStep::new(9999, 0, 0, 100)])),
        )
        .with_run_order(RunOrder::Loop);
        engine.upsert_function(chaser).unwrap();
        engine.start(FunctionId(5), StartOptions::default()).unwrap();
        engine.advance(ms(25));
        assert!(engine.running_functions().is_empty());
        assert!(engine
            .drain_diagnostics()
            .contains(&Diagnostic::ChaserEmpty(FunctionId(5))));
    }

    #[test]
    fn flush_reaches_the_patched_transport() {
        let mut engine = engine();
        let capture = Arc::new(CaptureTransport::new("Capture", 2, CaptureSettings::default()));
        engine.register_transport(capture.clone()).unwrap();
        assert_eq!(engine.plugin_names().unwrap(), ["Capture"]);
        engine
            .upsert_function(scene(1, &[(1, 0, 255)], Timing::held(0, 0)))
            .unwrap();

        engine
            .command_queue()
            .push(Command::SetPatch {
                universe: 1,
                transport: Some("Capture".into()),
                line: 1,
            })
            .unwrap();
        engine.start(FunctionId(1), StartOptions::default()).unwrap();
        engine.advance(ms(25));

        assert_eq!(capture.open_count(1), 1);
        assert_eq!(capture.last_frame(1).unwrap()[0], 255);
        assert_eq!(engine.patch_infos()[1].output, "Capture line 2");
    }

    #[test]
    fn repatching_settles_before_opening() {
        let mut engine = engine();
        let p = Arc::new(CaptureTransport::new("P", 1, CaptureSettings::default()));
        let q = Arc::new(CaptureTransport::new("Q", 2, CaptureSettings::default()));
        engine.register_transport(p.clone()).unwrap();
        engine.register_transport(q.clone()).unwrap();

        engine.set_patch(2, Some("P"), 0).unwrap();
        engine.advance(ms(25));
        engine.set_patch(2, Some("Q"), 1).unwrap();
        assert_eq!(q.open_count(1), 0);
        engine.advance(ms(5));
        assert_eq!(q.open_count(1), 0);
        engine.advance(ms(5));
        engine.advance(ms(25));

        assert_eq!((p.open_count(0), p.close_count(0)), (1, 1));
        assert_eq!(q.open_count(1), 1);
        assert_eq!(q.rejected_opens(), 0);
    }

    #[test]
    fn bad_patch_requests_are_reported() {
        let mut engine = engine();
        assert!(matches!(
            engine.set_patch(0, Some("Nowhere"), 0),
            Err(LightEngineError::UnknownTransport(_))
        ));
        engine.apply(Command::SetPatch {
            universe: 9,
            transport: None,
            line: INVALID_LINE,
        });
        assert!(matches!(
            engine.drain_diagnostics().as_slice(),
            [Diagnostic::PatchRefused { universe: 9, .. }]
        ));
    }
}
