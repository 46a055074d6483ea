use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use serde::Serialize;

use super::{Command, CommandQueue, Engine, RunningFunction, StartOptions};
use crate::diagnostics::Diagnostic;
use crate::function::{Function, FunctionId};
use crate::patch::{
    OutputLine, PatchInfo, Transport, TransportRegistry, INVALID_LINE, OUTPUT_NONE,
};
use crate::universe::UniverseSnapshot;
use crate::{LightEngineError, Result};

/// State published by the engine thread after every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub tick_count: u64,
    pub snapshot: UniverseSnapshot,
    pub running: Vec<RunningFunction>,
    pub patches: Vec<PatchInfo>,
}

#[derive(Debug, Default)]
struct Shared {
    status: EngineStatus,
    diagnostics: Vec<Diagnostic>,
}

/// Runs an [`Engine`] on a dedicated thread with a fixed tick period.
///
/// Requests are queued and applied at the next tick boundary. Dropping the
/// handle stops the thread.
pub struct EngineHandle {
    commands: CommandQueue,
    transports: Arc<Mutex<TransportRegistry>>,
    shared: Arc<Mutex<Shared>>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    universe_count: usize,
}

impl EngineHandle {
    pub fn spawn(engine: Engine) -> Result<Self> {
        let commands = engine.command_queue();
        let transports = engine.transport_registry();
        let universe_count = engine.universes().len();
        let capacity = engine.config().diagnostics_capacity;
        let shared = Arc::new(Mutex::new(Shared::default()));
        let running = Arc::new(AtomicBool::new(true));

        let thread = {
            let shared = shared.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("light-engine".into())
                .spawn(move || run(engine, &shared, &running, capacity))?
        };
        tracing::info!("engine thread started");

        Ok(Self {
            commands,
            transports,
            shared,
            running,
            thread: Some(thread),
            universe_count,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn send(&self, command: Command) -> Result<()> {
        if !self.is_running() {
            return Err(LightEngineError::EngineStopped);
        }
        self.commands.push(command)
    }

    pub fn start(&self, function: FunctionId, options: StartOptions) -> Result<()> {
        self.send(Command::Start { function, options })
    }

    pub fn stop(&self, function: FunctionId) -> Result<()> {
        self.send(Command::Stop(function))
    }

    pub fn stop_all(&self) -> Result<()> {
        self.send(Command::StopAll)
    }

    pub fn next_step(&self, function: FunctionId) -> Result<()> {
        self.send(Command::NextStep(function))
    }

    pub fn previous_step(&self, function: FunctionId) -> Result<()> {
        self.send(Command::PreviousStep(function))
    }

    pub fn upsert_function(&self, function: Function) -> Result<()> {
        self.send(Command::UpsertFunction(Box::new(function)))
    }

    pub fn remove_function(&self, function: FunctionId) -> Result<()> {
        self.send(Command::RemoveFunction(function))
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) -> Result<()> {
        tracing::info!(transport = transport.name(), "transport registered");
        self.lock_transports()?.register(transport);
        Ok(())
    }

    pub fn plugin_names(&self) -> Result<Vec<String>> {
        Ok(self
            .lock_transports()?
            .names()
            .map(str::to_string)
            .collect())
    }

    /// Validates and queues a patch change. `plugin` `"None"` unpatches.
    pub fn set_patch(&self, universe: usize, plugin: &str, line: OutputLine) -> Result<()> {
        if universe >= self.universe_count {
            return Err(LightEngineError::UniverseOutOfRange {
                universe,
                count: self.universe_count,
            });
        }
        if plugin == OUTPUT_NONE {
            return self.unpatch(universe);
        }
        let outputs = self
            .lock_transports()?
            .get(plugin)
            .map(|t| t.outputs().len())
            .ok_or_else(|| LightEngineError::UnknownTransport(plugin.to_string()))?;
        if line as usize >= outputs {
            return Err(LightEngineError::InvalidLine {
                transport: plugin.to_string(),
                line,
            });
        }
        self.send(Command::SetPatch {
            universe,
            transport: Some(plugin.to_string()),
            line,
        })
    }

    pub fn unpatch(&self, universe: usize) -> Result<()> {
        self.send(Command::SetPatch {
            universe,
            transport: None,
            line: INVALID_LINE,
        })
    }

    pub fn reconnect(&self, universe: usize) -> Result<()> {
        self.send(Command::Reconnect(universe))
    }

    /// Latest published state.
    pub fn status(&self) -> Result<EngineStatus> {
        Ok(self.lock_shared()?.status.clone())
    }

    pub fn snapshot(&self) -> Result<UniverseSnapshot> {
        Ok(self.lock_shared()?.status.snapshot.clone())
    }

    pub fn running_functions(&self) -> Result<Vec<RunningFunction>> {
        Ok(self.lock_shared()?.status.running.clone())
    }

    pub fn patch(&self, universe: usize) -> Result<Option<PatchInfo>> {
        Ok(self.lock_shared()?.status.patches.get(universe).cloned())
    }

    pub fn drain_diagnostics(&self) -> Result<Vec<Diagnostic>> {
        Ok(std::mem::take(&mut self.lock_shared()?.diagnostics))
    }

    /// Stops the engine thread and waits for it. Open lines are closed as
    /// the engine is dropped.
    pub fn shutdown(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| LightEngineError::msg("engine thread panicked"))?;
            tracing::info!("engine thread stopped");
        }
        Ok(())
    }

    fn lock_shared(&self) -> Result<MutexGuard<'_, Shared>> {
        self.shared
            .lock()
            .map_err(|_| LightEngineError::Poisoned("engine status"))
    }

    fn lock_transports(&self) -> Result<MutexGuard<'_, TransportRegistry>> {
        self.transports
            .lock()
            .map_err(|_| LightEngineError::Poisoned("transport registry"))
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(%err, "engine shutdown failed");
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("running", &self.is_running())
            .field("universes", &self.universe_count)
            .finish()
    }
}

/// Deadline-based tick loop. A late tick is not made up for: when the loop
/// falls more than one period behind it restarts from the current time.
fn run(mut engine: Engine, shared: &Mutex<Shared>, running: &AtomicBool, capacity: usize) {
    let _running = ClearOnExit(running);
    let period = engine.config().tick_interval();
    let mut deadline = Instant::now();
    while running.load(Ordering::Acquire) {
        engine.tick_at(Instant::now());
        publish(&mut engine, shared, capacity);

        deadline += period;
        let now = Instant::now();
        if now > deadline + period {
            tracing::debug!(
                behind_ms = (now - deadline).as_millis() as u64,
                "tick loop resynced"
            );
            deadline = now;
        } else if deadline > now {
            thread::sleep(deadline - now);
        }
    }
}

/// Marks the engine stopped when the loop ends, including by a panic, so
/// the handle stops accepting commands nobody will apply.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            tracing::error!("engine thread panicked");
        }
        self.0.store(false, Ordering::Release);
    }
}

fn publish(engine: &mut Engine, shared: &Mutex<Shared>, capacity: usize) {
    let diagnostics = engine.drain_diagnostics();
    let status = EngineStatus {
        tick_count: engine.tick_count(),
        snapshot: engine.snapshot(),
        running: engine.running_functions(),
        patches: engine.patch_infos(),
    };
    let Ok(mut shared) = shared.lock() else {
        tracing::error!("engine status lock poisoned; state not published");
        return;
    };
    shared.status = status;
    shared.diagnostics.extend(diagnostics);
    let excess = shared.diagnostics.len().saturating_sub(capacity);
    shared.diagnostics.drain(..excess);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::function::{FunctionKind, Scene, SceneValue, Timing};
    use crate::record::{CaptureSettings, CaptureTransport};

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn engine_thread_plays_and_publishes() {
        let config = EngineConfig {
            tick_interval_ms: 5,
            ..Default::default()
        };
        let engine = Engine::new(config).unwrap();
        let mut handle = EngineHandle::spawn(engine).unwrap();
        let capture = Arc::new(CaptureTransport::new("Capture", 1, CaptureSettings::default()));
        handle.register_transport(capture.clone()).unwrap();
        assert_eq!(handle.plugin_names().unwrap(), ["Capture"]);

        let scene = Scene::new([SceneValue::new(0, 3, 200)]);
        let function =
            Function::new(1, "Wash", FunctionKind::Scene(scene)).with_timing(Timing::held(0, 0));
        handle.upsert_function(function).unwrap();
        handle.set_patch(0, "Capture", 0).unwrap();
        handle.start(FunctionId(1), StartOptions::default()).unwrap();

        assert!(wait_for(|| capture
            .last_frame(0)
            .is_some_and(|frame| frame[3] == 200)));
        assert!(wait_for(|| handle
            .snapshot()
            .is_ok_and(|s| s.value(0, 3) == Some(200))));
        assert_eq!(handle.patch(0).unwrap().unwrap().transport, "Capture");

        handle.shutdown().unwrap();
        assert!(!handle.is_running());
        assert!(matches!(
            handle.stop(FunctionId(1)),
            Err(LightEngineError::EngineStopped)
        ));
        assert_eq!(capture.close_count(0), 1);
    }

    #[derive(Debug)]
    struct FaultyTransport;

    impl Transport for FaultyTransport {
        fn name(&self) -> &str {
            "Faulty"
        }

        fn outputs(&self) -> Vec<String> {
            vec!["Faulty line 1".into()]
        }

        fn open(&self, _line: OutputLine) -> std::result::Result<(), crate::TransportError> {
            Ok(())
        }

        fn close(&self, _line: OutputLine) {}

        fn send(
            &self,
            _line: OutputLine,
            _frame: &[u8; crate::UNIVERSE_SIZE],
        ) -> std::result::Result<(), crate::TransportError> {
            panic!("device fault");
        }
    }

    #[test]
    fn dead_engine_thread_refuses_commands() {
        let config = EngineConfig {
            tick_interval_ms: 5,
            settle_delay_ms: 0,
            ..Default::default()
        };
        let engine = Engine::new(config).unwrap();
        let mut handle = EngineHandle::spawn(engine).unwrap();
        handle.register_transport(Arc::new(FaultyTransport)).unwrap();
        handle.set_patch(0, "Faulty", 0).unwrap();

        assert!(wait_for(|| !handle.is_running()));
        assert!(matches!(
            handle.stop_all(),
            Err(LightEngineError::EngineStopped)
        ));
        assert!(handle.shutdown().is_err());
    }

    #[test]
    fn patch_requests_are_validated_before_queueing() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let handle = EngineHandle::spawn(engine).unwrap();
        assert!(matches!(
            handle.set_patch(0, "Missing", 0),
            Err(LightEngineError::UnknownTransport(_))
        ));
        assert!(matches!(
            handle.set_patch(99, OUTPUT_NONE, INVALID_LINE),
            Err(LightEngineError::UniverseOutOfRange { universe: 99, .. })
        ));
        handle.set_patch(0, OUTPUT_NONE, INVALID_LINE).unwrap();
    }
}
