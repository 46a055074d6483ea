//! Universe-to-output routing.
//!
//! A [`Transport`] is a device or protocol adapter with a list of output
//! lines. Transports are registered by name in a [`TransportRegistry`],
//! which owns them; the [`PatchTable`] only keeps weak handles, one
//! [`OutputPatch`] per universe. An unpatched universe is a silent sink.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::universe::{UniverseArray, UNIVERSE_SIZE};
use crate::{LightEngineError, Result};

mod output;

pub use output::{OutputPatch, PatchState};

/// Index into a transport's output list.
pub type OutputLine = u32;

/// "No output selected".
pub const INVALID_LINE: OutputLine = u32::MAX;

/// Name reported for an unpatched universe or an unknown line.
pub const OUTPUT_NONE: &str = "None";

/// Status of a transport call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("cannot open line {line}: {reason}")]
    Open { line: OutputLine, reason: String },
    #[error("cannot send to line {line}: {reason}")]
    Send { line: OutputLine, reason: String },
    #[error("line {0} is not open")]
    NotOpen(OutputLine),
    /// The device went away, or the transport was unregistered.
    #[error("transport disconnected")]
    Disconnected,
    #[error("operation not supported by this transport")]
    Unsupported,
}

/// Output adapter contract.
///
/// Calls are made from the engine thread once per tick and must return
/// quickly; adapters talking to slow devices hand the data off internally.
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    /// Ordered names of the available output lines.
    fn outputs(&self) -> Vec<String>;

    fn open(&self, line: OutputLine) -> std::result::Result<(), TransportError>;

    fn close(&self, line: OutputLine);

    fn send(
        &self,
        line: OutputLine,
        frame: &[u8; UNIVERSE_SIZE],
    ) -> std::result::Result<(), TransportError>;

    fn supports_partial_writes(&self) -> bool {
        false
    }

    /// Writes `data` starting at channel `offset`.
    fn send_range(
        &self,
        _line: OutputLine,
        _offset: usize,
        _data: &[u8],
    ) -> std::result::Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }
}

/// Transports known to the engine, by name.
#[derive(Default, Clone)]
pub struct TransportRegistry {
    transports: BTreeMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transport, replacing any previous one of the same name.
    pub fn register(&mut self, transport: Arc<dyn Transport>) -> Option<Arc<dyn Transport>> {
        self.transports
            .insert(transport.name().to_string(), transport)
    }

    /// Drops the registry's handle. Patches using the transport stop
    /// sending once no other owner keeps it alive.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.transports.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.transports.keys()).finish()
    }
}

/// Current mapping of one universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchInfo {
    pub universe: usize,
    pub transport: String,
    pub line: OutputLine,
    pub output: String,
    pub state: PatchState,
}

/// One [`OutputPatch`] per universe.
#[derive(Debug)]
pub struct PatchTable {
    patches: Vec<OutputPatch>,
    settle_delay: Duration,
}

impl PatchTable {
    pub fn new(universe_count: usize, settle_delay: Duration) -> Self {
        Self {
            patches: (0..universe_count).map(OutputPatch::new).collect(),
            settle_delay,
        }
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn patch(&self, universe: usize) -> Option<PatchInfo> {
        self.patches.get(universe).map(|p| PatchInfo {
            universe,
            transport: p.transport_name().to_string(),
            line: p.line(),
            output: p.output_name(),
            state: p.state(),
        })
    }

    pub fn infos(&self) -> Vec<PatchInfo> {
        (0..self.patches.len())
            .filter_map(|universe| self.patch(universe))
            .collect()
    }

    /// Routes `universe` to `line` of `transport`, or unpatches it when
    /// `transport` is `None`.
    ///
    /// The line must exist and must not already be patched to another
    /// universe. Re-patching to the current target is a no-op.
    pub fn set_patch(
        &mut self,
        universe: usize,
        transport: Option<&Arc<dyn Transport>>,
        line: OutputLine,
        now: Instant,
    ) -> Result<()> {
        let count = self.patches.len();
        if universe >= count {
            return Err(LightEngineError::UniverseOutOfRange { universe, count });
        }
        if let Some(transport) = transport {
            let name = transport.name();
            if line as usize >= transport.outputs().len() {
                return Err(LightEngineError::InvalidLine {
                    transport: name.to_string(),
                    line,
                });
            }
            if let Some(other) = self
                .patches
                .iter()
                .find(|p| p.universe() != universe && p.is_patched_to(name, line))
            {
                return Err(LightEngineError::LineInUse {
                    transport: name.to_string(),
                    line,
                    universe: other.universe(),
                });
            }
            let current = &self.patches[universe];
            if current.is_patched_to(name, line) && current.state() != PatchState::Failed {
                return Ok(());
            }
        }

        let settle = self.settle_delay;
        let patch = &mut self.patches[universe];
        patch.set(transport, line, now, settle)?;
        tracing::info!(
            universe,
            transport = patch.transport_name(),
            line,
            "universe patched"
        );
        Ok(())
    }

    pub fn unpatch(&mut self, universe: usize, now: Instant) -> Result<()> {
        self.set_patch(universe, None, INVALID_LINE, now)
    }

    /// Closes and, after the settle delay, reopens the universe's line.
    pub fn reconnect(&mut self, universe: usize, now: Instant) -> Result<()> {
        let count = self.patches.len();
        let settle = self.settle_delay;
        let patch = self
            .patches
            .get_mut(universe)
            .ok_or(LightEngineError::UniverseOutOfRange { universe, count })?;
        patch.reconnect(now, settle)?;
        Ok(())
    }

    /// Opens lines whose settle delay has elapsed.
    pub fn poll(&mut self, now: Instant, diagnostics: &mut DiagnosticLog) {
        for patch in &mut self.patches {
            if let Some(Err(err)) = patch.poll(now) {
                diagnostics.record(open_failed(patch, &err));
            }
        }
    }

    /// Hands every changed universe to its patched line. Unpatched or failed
    /// universes are skipped silently. Returns the number of frames sent.
    pub fn flush(
        &mut self,
        universes: &mut UniverseArray,
        diagnostics: &mut DiagnosticLog,
    ) -> usize {
        let mut sent = 0;
        for (index, buffer) in universes.iter_mut() {
            let dirty = buffer.take_dirty();
            let Some(patch) = self.patches.get_mut(index) else {
                continue;
            };
            match patch.dump(buffer.values(), dirty) {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(TransportError::Disconnected) => {
                    diagnostics.record(Diagnostic::TransportGone {
                        universe: index,
                        transport: patch.transport_name().to_string(),
                    });
                }
                Err(err) => diagnostics.record(Diagnostic::TransportSendFailed {
                    universe: index,
                    transport: patch.transport_name().to_string(),
                    line: patch.line(),
                    reason: err.to_string(),
                }),
            }
        }
        sent
    }
}

pub(crate) fn open_failed(patch: &OutputPatch, err: &TransportError) -> Diagnostic {
    Diagnostic::TransportOpenFailed {
        universe: patch.universe(),
        transport: patch.transport_name().to_string(),
        line: patch.line(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CaptureSettings, CaptureTransport};

    const SETTLE: Duration = Duration::from_millis(10);

    fn capture(name: &str, lines: usize) -> (Arc<CaptureTransport>, Arc<dyn Transport>) {
        let capture = Arc::new(CaptureTransport::new(name, lines, CaptureSettings::default()));
        let transport: Arc<dyn Transport> = capture.clone();
        (capture, transport)
    }

    #[test]
    fn repatching_closes_old_line_once_and_opens_new_line_once() {
        let (p, p_dyn) = capture("P", 1);
        let (q, q_dyn) = capture("Q", 2);
        let mut table = PatchTable::new(4, SETTLE);
        let now = Instant::now();

        table.set_patch(2, Some(&p_dyn), 0, now).unwrap();
        assert_eq!(p.open_count(0), 1);

        table.set_patch(2, Some(&q_dyn), 1, now).unwrap();
        assert_eq!(p.close_count(0), 1);
        assert_eq!(q.open_count(1), 0);
        assert_eq!(table.patch(2).unwrap().state, PatchState::Settling);

        let mut diagnostics = DiagnosticLog::default();
        table.poll(now + SETTLE / 2, &mut diagnostics);
        assert_eq!(q.open_count(1), 0);
        table.poll(now + SETTLE, &mut diagnostics);
        table.poll(now + SETTLE * 2, &mut diagnostics);

        assert_eq!(p.open_count(0), 1);
        assert_eq!(p.close_count(0), 1);
        assert_eq!(q.open_count(1), 1);
        assert_eq!(q.rejected_opens(), 0);
        assert!(diagnostics.is_empty());

        let info = table.patch(2).unwrap();
        assert_eq!((info.transport.as_str(), info.line), ("Q", 1));
        assert_eq!(info.output, "Q line 2");
        assert_eq!(info.state, PatchState::Open);
    }

    #[test]
    fn unpatched_universe_flushes_without_transport_calls() {
        let (capture, _transport) = capture("P", 1);
        let mut table = PatchTable::new(2, SETTLE);
        let mut universes = UniverseArray::new(2).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        universes.get_mut(1).unwrap().write(0, 255);

        assert_eq!(table.flush(&mut universes, &mut diagnostics), 0);
        assert_eq!(universes.value(1, 0), Some(255));
        assert_eq!(capture.frame_count(), 0);
        assert!(diagnostics.is_empty());

        let info = table.patch(1).unwrap();
        assert_eq!(info.transport, OUTPUT_NONE);
        assert_eq!(info.output, OUTPUT_NONE);
        assert_eq!(info.line, INVALID_LINE);
    }

    #[test]
    fn first_frame_is_full_then_only_changes_are_sent() {
        let capture = Arc::new(CaptureTransport::new(
            "Partial",
            1,
            CaptureSettings {
                partial_writes: true,
                ..Default::default()
            },
        ));
        let transport: Arc<dyn Transport> = capture.clone();
        let mut table = PatchTable::new(1, SETTLE);
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        table.set_patch(0, Some(&transport), 0, Instant::now()).unwrap();

        assert_eq!(table.flush(&mut universes, &mut diagnostics), 1);
        assert_eq!(capture.last_write(0), Some((0, UNIVERSE_SIZE)));

        assert_eq!(table.flush(&mut universes, &mut diagnostics), 0);

        universes.get_mut(0).unwrap().write(5, 1);
        universes.get_mut(0).unwrap().write(7, 1);
        assert_eq!(table.flush(&mut universes, &mut diagnostics), 1);
        assert_eq!(capture.last_write(0), Some((5, 3)));
        assert_eq!(capture.last_frame(0).unwrap()[7], 1);
    }

    #[test]
    fn a_line_serves_only_one_universe() {
        let (_capture, transport) = capture("P", 2);
        let mut table = PatchTable::new(2, SETTLE);
        let now = Instant::now();
        table.set_patch(0, Some(&transport), 0, now).unwrap();

        assert!(matches!(
            table.set_patch(1, Some(&transport), 0, now),
            Err(LightEngineError::LineInUse { universe: 0, .. })
        ));
        assert!(matches!(
            table.set_patch(1, Some(&transport), 2, now),
            Err(LightEngineError::InvalidLine { line: 2, .. })
        ));
        assert!(matches!(
            table.set_patch(5, Some(&transport), 1, now),
            Err(LightEngineError::UniverseOutOfRange { universe: 5, .. })
        ));
        table.set_patch(1, Some(&transport), 1, now).unwrap();
    }

    #[test]
    fn patching_the_same_target_again_is_a_no_op() {
        let (capture, transport) = capture("P", 1);
        let mut table = PatchTable::new(1, SETTLE);
        let now = Instant::now();
        table.set_patch(0, Some(&transport), 0, now).unwrap();
        table.set_patch(0, Some(&transport), 0, now).unwrap();
        assert_eq!(capture.open_count(0), 1);
        assert_eq!(capture.close_count(0), 0);
    }

    #[test]
    fn reconnect_closes_then_reopens_after_settle() {
        let (capture, transport) = capture("P", 1);
        let mut table = PatchTable::new(1, SETTLE);
        let mut diagnostics = DiagnosticLog::default();
        let now = Instant::now();
        table.set_patch(0, Some(&transport), 0, now).unwrap();

        table.reconnect(0, now).unwrap();
        assert_eq!(capture.close_count(0), 1);
        assert_eq!(table.patch(0).unwrap().state, PatchState::Settling);

        table.poll(now + SETTLE, &mut diagnostics);
        assert_eq!(capture.open_count(0), 2);
        assert_eq!(capture.rejected_opens(), 0);
    }

    #[test]
    fn failed_open_acts_as_null_sink_until_reconnected() {
        let (capture, transport) = capture("P", 1);
        capture.set_fail_open(true);
        let mut table = PatchTable::new(1, Duration::ZERO);
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        let now = Instant::now();

        let err = table.set_patch(0, Some(&transport), 0, now).unwrap_err();
        assert!(matches!(err, LightEngineError::Transport(TransportError::Open { .. })));
        assert_eq!(table.patch(0).unwrap().state, PatchState::Failed);

        universes.get_mut(0).unwrap().write(0, 9);
        assert_eq!(table.flush(&mut universes, &mut diagnostics), 0);

        capture.set_fail_open(false);
        table.reconnect(0, now).unwrap();
        assert_eq!(table.patch(0).unwrap().state, PatchState::Open);
        assert_eq!(table.flush(&mut universes, &mut diagnostics), 1);
        assert_eq!(capture.last_frame(0).unwrap()[0], 9);
    }

    #[test]
    fn send_failure_is_reported_once() {
        let (capture, transport) = capture("P", 1);
        let mut table = PatchTable::new(1, SETTLE);
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        table.set_patch(0, Some(&transport), 0, Instant::now()).unwrap();

        capture.set_fail_send(true);
        universes.get_mut(0).unwrap().write(0, 1);
        table.flush(&mut universes, &mut diagnostics);
        universes.get_mut(0).unwrap().write(0, 2);
        table.flush(&mut universes, &mut diagnostics);

        assert!(matches!(
            diagnostics.drain().as_slice(),
            [Diagnostic::TransportSendFailed { universe: 0, .. }]
        ));
        assert_eq!(table.patch(0).unwrap().state, PatchState::Failed);
    }

    #[test]
    fn dropped_transport_is_reported_as_gone() {
        let (capture, transport) = capture("P", 1);
        let mut table = PatchTable::new(1, SETTLE);
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        table.set_patch(0, Some(&transport), 0, Instant::now()).unwrap();
        drop(transport);
        drop(capture);

        universes.get_mut(0).unwrap().write(0, 1);
        table.flush(&mut universes, &mut diagnostics);
        assert!(matches!(
            diagnostics.drain().as_slice(),
            [Diagnostic::TransportGone { universe: 0, .. }]
        ));
    }

    #[test]
    fn dropping_the_table_closes_open_lines() {
        let (capture, transport) = capture("P", 1);
        let mut table = PatchTable::new(1, SETTLE);
        table.set_patch(0, Some(&transport), 0, Instant::now()).unwrap();
        drop(table);
        assert_eq!(capture.close_count(0), 1);
    }
}
