use std::ops::Range;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{OutputLine, Transport, TransportError, INVALID_LINE, OUTPUT_NONE};
use crate::universe::UNIVERSE_SIZE;

/// Observable state of a patch's output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatchState {
    /// No transport, or the line is closed. Flushes are silently dropped.
    Closed,
    /// Waiting for the previous line to release before opening.
    Settling,
    Open,
    /// Open or send failed; behaves like `Closed` until reconnected.
    Failed,
}

#[derive(Debug, Clone, Copy)]
enum LineState {
    Closed,
    Settling { until: Instant },
    Open,
    Failed,
}

/// Binding of one universe to a transport output line.
///
/// The patch holds only a weak handle: the transport's lifetime belongs to
/// whoever registered it. At most one `open` is outstanding per patch.
pub struct OutputPatch {
    universe: usize,
    transport: Option<(String, Weak<dyn Transport>)>,
    line: OutputLine,
    state: LineState,
    /// The transport accepted `open` and has not been closed since.
    line_open: bool,
    needs_full: bool,
}

impl OutputPatch {
    pub fn new(universe: usize) -> Self {
        Self {
            universe,
            transport: None,
            line: INVALID_LINE,
            state: LineState::Closed,
            line_open: false,
            needs_full: false,
        }
    }

    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn line(&self) -> OutputLine {
        self.line
    }

    /// Registered name of the patched transport, or `"None"`.
    pub fn transport_name(&self) -> &str {
        self.transport
            .as_ref()
            .map_or(OUTPUT_NONE, |(name, _)| name.as_str())
    }

    /// Name of the patched line as reported by the transport, or `"None"`.
    pub fn output_name(&self) -> String {
        self.transport()
            .and_then(|t| t.outputs().into_iter().nth(self.line as usize))
            .unwrap_or_else(|| OUTPUT_NONE.to_string())
    }

    pub fn is_patched(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_patched_to(&self, transport: &str, line: OutputLine) -> bool {
        self.line == line && self.transport_name() == transport && self.is_patched()
    }

    pub fn state(&self) -> PatchState {
        match self.state {
            LineState::Closed => PatchState::Closed,
            LineState::Settling { .. } => PatchState::Settling,
            LineState::Open => PatchState::Open,
            LineState::Failed => PatchState::Failed,
        }
    }

    /// Replaces the patch target. A line that was open is closed first; the
    /// new line then waits out `settle` before being opened by [`poll`].
    ///
    /// [`poll`]: OutputPatch::poll
    pub fn set(
        &mut self,
        transport: Option<&Arc<dyn Transport>>,
        line: OutputLine,
        now: Instant,
        settle: Duration,
    ) -> Result<(), TransportError> {
        let released = self.close();
        let Some(transport) = transport else {
            self.transport = None;
            self.line = INVALID_LINE;
            return Ok(());
        };
        self.transport = Some((transport.name().to_string(), Arc::downgrade(transport)));
        self.line = line;
        if released && !settle.is_zero() {
            self.state = LineState::Settling {
                until: now + settle,
            };
            return Ok(());
        }
        self.open(transport)
    }

    /// Closes the current line and schedules it to reopen after `settle`.
    pub fn reconnect(&mut self, now: Instant, settle: Duration) -> Result<(), TransportError> {
        let Some(transport) = self.transport() else {
            return Ok(());
        };
        self.close();
        if settle.is_zero() {
            return self.open(&transport);
        }
        self.state = LineState::Settling {
            until: now + settle,
        };
        Ok(())
    }

    /// Opens a settling line once its deadline has passed. Returns the open
    /// result when an attempt was made.
    pub fn poll(&mut self, now: Instant) -> Option<Result<(), TransportError>> {
        let LineState::Settling { until } = self.state else {
            return None;
        };
        if now < until {
            return None;
        }
        let Some(transport) = self.transport() else {
            self.state = LineState::Failed;
            return Some(Err(TransportError::Disconnected));
        };
        Some(self.open(&transport))
    }

    /// Sends the buffer to the open line. The first frame after opening is
    /// always complete; afterwards only `dirty` is sent when the transport
    /// accepts partial writes. Returns whether anything was sent.
    pub fn dump(
        &mut self,
        values: &[u8; UNIVERSE_SIZE],
        dirty: Option<Range<usize>>,
    ) -> Result<bool, TransportError> {
        if !matches!(self.state, LineState::Open) {
            return Ok(false);
        }
        let Some(transport) = self.transport() else {
            self.state = LineState::Failed;
            return Err(TransportError::Disconnected);
        };
        let range = match (self.needs_full, dirty) {
            (true, _) => 0..UNIVERSE_SIZE,
            (false, Some(range)) => range,
            (false, None) => return Ok(false),
        };
        let result = if range.len() < UNIVERSE_SIZE && transport.supports_partial_writes() {
            transport.send_range(self.line, range.start, &values[range])
        } else {
            transport.send(self.line, values)
        };
        match result {
            Ok(()) => {
                self.needs_full = false;
                Ok(true)
            }
            Err(err) => {
                self.state = LineState::Failed;
                Err(err)
            }
        }
    }

    fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.as_ref()?.1.upgrade()
    }

    fn open(&mut self, transport: &Arc<dyn Transport>) -> Result<(), TransportError> {
        match transport.open(self.line) {
            Ok(()) => {
                tracing::debug!(
                    universe = self.universe,
                    transport = transport.name(),
                    line = self.line,
                    "output line opened"
                );
                self.state = LineState::Open;
                self.line_open = true;
                self.needs_full = true;
                Ok(())
            }
            Err(err) => {
                self.state = LineState::Failed;
                Err(err)
            }
        }
    }

    /// Closes the line if the transport holds it open. Returns true when a
    /// line was open or still settling, so the next open has to wait.
    fn close(&mut self) -> bool {
        let settling = matches!(self.state, LineState::Settling { .. });
        self.state = LineState::Closed;
        if !self.line_open {
            return settling;
        }
        self.line_open = false;
        if let Some(transport) = self.transport() {
            transport.close(self.line);
            tracing::debug!(
                universe = self.universe,
                transport = transport.name(),
                line = self.line,
                "output line closed"
            );
        }
        true
    }
}

impl Drop for OutputPatch {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for OutputPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputPatch")
            .field("universe", &self.universe)
            .field("transport", &self.transport_name())
            .field("line", &self.line)
            .field("state", &self.state)
            .finish()
    }
}
