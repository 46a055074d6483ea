use std::collections::VecDeque;

use crate::function::FunctionId;
use crate::patch::OutputLine;

/// Recoverable condition absorbed by the engine.
///
/// Diagnostics never interrupt playback. Each one is logged when recorded
/// and kept in a bounded [`DiagnosticLog`] for monitoring.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Diagnostic {
    #[error("chaser {chaser} step {step} skipped: function {function} {reason}")]
    StepSkipped {
        chaser: FunctionId,
        step: usize,
        function: FunctionId,
        reason: &'static str,
    },
    #[error("collection {collection} member {function} skipped: {reason}")]
    MemberSkipped {
        collection: FunctionId,
        function: FunctionId,
        reason: &'static str,
    },
    #[error("chaser {0} has no playable steps")]
    ChaserEmpty(FunctionId),
    #[error("cannot start function {0}: no such function")]
    UnknownFunction(FunctionId),
    #[error("function {function} uses unknown RGB algorithm `{algorithm}`")]
    UnknownAlgorithm {
        function: FunctionId,
        algorithm: String,
    },
    #[error("edit of function {0} refused: {1}")]
    EditRefused(FunctionId, String),
    #[error("patch of universe {universe} refused: {reason}")]
    PatchRefused { universe: usize, reason: String },
    #[error("channel {channel} of universe {universe} is out of range")]
    ChannelOutOfRange { universe: usize, channel: usize },
    #[error("universe {universe}: opening {transport} line {line} failed: {reason}")]
    TransportOpenFailed {
        universe: usize,
        transport: String,
        line: OutputLine,
        reason: String,
    },
    #[error("universe {universe}: sending to {transport} line {line} failed: {reason}")]
    TransportSendFailed {
        universe: usize,
        transport: String,
        line: OutputLine,
        reason: String,
    },
    #[error("universe {universe}: transport {transport} is gone")]
    TransportGone { universe: usize, transport: String },
}

/// Ring buffer of the most recent diagnostics.
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
    dropped: u64,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic, "playback diagnostic");
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of diagnostics evicted because the log was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn drain(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_entries_are_evicted() {
        let mut log = DiagnosticLog::new(2);
        for id in 0..3 {
            log.record(Diagnostic::UnknownFunction(FunctionId(id)));
        }
        assert_eq!(log.dropped(), 1);
        assert_eq!(
            log.drain(),
            vec![
                Diagnostic::UnknownFunction(FunctionId(1)),
                Diagnostic::UnknownFunction(FunctionId(2)),
            ]
        );
        assert!(log.is_empty());
    }

    #[test]
    fn messages_name_the_offender() {
        let diagnostic = Diagnostic::StepSkipped {
            chaser: FunctionId(1),
            step: 0,
            function: FunctionId(9999),
            reason: "does not exist",
        };
        assert_eq!(
            diagnostic.to_string(),
            "chaser 1 step 0 skipped: function 9999 does not exist"
        );
    }
}
