use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::patch::{OutputLine, Transport, TransportError};
use crate::universe::UNIVERSE_SIZE;

/// Configuration options for the capture transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Frames kept per line.
    pub history: usize,
    /// Accept `send_range` calls instead of full frames only.
    pub partial_writes: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            history: 16,
            partial_writes: false,
        }
    }
}

#[derive(Debug, Default)]
struct LineRecord {
    open: bool,
    opens: usize,
    closes: usize,
    /// Latest output, with partial writes applied on top.
    frame: Option<[u8; UNIVERSE_SIZE]>,
    /// `(offset, len)` of the most recent write.
    last_write: Option<(usize, usize)>,
    history: VecDeque<Vec<u8>>,
}

#[derive(Debug, Default)]
struct CaptureState {
    lines: BTreeMap<OutputLine, LineRecord>,
    frames: usize,
    rejected_opens: usize,
    fail_open: bool,
    fail_send: bool,
}

/// In-memory transport that records everything sent to it.
///
/// Used for monitoring, demos and tests. A line opened twice without a close
/// in between is rejected and counted.
#[derive(Debug)]
pub struct CaptureTransport {
    name: String,
    lines: usize,
    settings: CaptureSettings,
    state: Mutex<CaptureState>,
}

impl CaptureTransport {
    pub fn new(name: impl Into<String>, lines: usize, settings: CaptureSettings) -> Self {
        Self {
            name: name.into(),
            lines,
            settings,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Makes every following `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    /// Makes every following send fail.
    pub fn set_fail_send(&self, fail: bool) {
        self.lock().fail_send = fail;
    }

    pub fn open_count(&self, line: OutputLine) -> usize {
        self.lock().lines.get(&line).map_or(0, |r| r.opens)
    }

    pub fn close_count(&self, line: OutputLine) -> usize {
        self.lock().lines.get(&line).map_or(0, |r| r.closes)
    }

    pub fn is_open(&self, line: OutputLine) -> bool {
        self.lock().lines.get(&line).is_some_and(|r| r.open)
    }

    /// Opens refused because the line was already open.
    pub fn rejected_opens(&self) -> usize {
        self.lock().rejected_opens
    }

    /// Total successful writes over all lines.
    pub fn frame_count(&self) -> usize {
        self.lock().frames
    }

    pub fn last_frame(&self, line: OutputLine) -> Option<[u8; UNIVERSE_SIZE]> {
        self.lock().lines.get(&line)?.frame
    }

    pub fn last_write(&self, line: OutputLine) -> Option<(usize, usize)> {
        self.lock().lines.get(&line)?.last_write
    }

    /// Recent frames of `line`, oldest first.
    pub fn history(&self, line: OutputLine) -> Vec<Vec<u8>> {
        self.lock()
            .lines
            .get(&line)
            .map(|r| r.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, line: OutputLine, offset: usize, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_send {
            return Err(TransportError::Send {
                line,
                reason: "capture configured to fail".into(),
            });
        }
        let history = self.settings.history;
        let record = state
            .lines
            .get_mut(&line)
            .filter(|r| r.open)
            .ok_or(TransportError::NotOpen(line))?;
        let end = offset + data.len();
        if end > UNIVERSE_SIZE {
            return Err(TransportError::Send {
                line,
                reason: format!("write of {} bytes at {offset} overruns the frame", data.len()),
            });
        }
        let frame = record.frame.get_or_insert([0; UNIVERSE_SIZE]);
        frame[offset..end].copy_from_slice(data);
        let snapshot = frame.to_vec();
        record.last_write = Some((offset, data.len()));
        if history > 0 {
            if record.history.len() == history {
                record.history.pop_front();
            }
            record.history.push_back(snapshot);
        }
        state.frames += 1;
        Ok(())
    }
}

impl Transport for CaptureTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn outputs(&self) -> Vec<String> {
        (1..=self.lines)
            .map(|n| format!("{} line {n}", self.name))
            .collect()
    }

    fn open(&self, line: OutputLine) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(TransportError::Open {
                line,
                reason: "capture configured to fail".into(),
            });
        }
        if line as usize >= self.lines {
            return Err(TransportError::Open {
                line,
                reason: "no such line".into(),
            });
        }
        let already_open = state.lines.get(&line).is_some_and(|r| r.open);
        if already_open {
            state.rejected_opens += 1;
            return Err(TransportError::Open {
                line,
                reason: "line is already open".into(),
            });
        }
        let record = state.lines.entry(line).or_default();
        record.open = true;
        record.opens += 1;
        Ok(())
    }

    fn close(&self, line: OutputLine) {
        if let Some(record) = self.lock().lines.get_mut(&line) {
            if record.open {
                record.open = false;
                record.closes += 1;
            }
        }
    }

    fn send(&self, line: OutputLine, frame: &[u8; UNIVERSE_SIZE]) -> Result<(), TransportError> {
        self.write(line, 0, frame)
    }

    fn supports_partial_writes(&self) -> bool {
        self.settings.partial_writes
    }

    fn send_range(
        &self,
        line: OutputLine,
        offset: usize,
        data: &[u8],
    ) -> Result<(), TransportError> {
        if !self.settings.partial_writes {
            return Err(TransportError::Unsupported);
        }
        self.write(line, offset, data)
    }
}
