//! Fixed-size DMX universe buffers.
//!
//! Buffers are never cleared between ticks: a channel nobody writes keeps the
//! value it was last given. Each buffer tracks the span of channels that
//! changed since the last flush so transports that accept partial writes can
//! be handed only that span.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{LightEngineError, Result};

/// Number of channels in a universe.
pub const UNIVERSE_SIZE: usize = 512;

/// One universe worth of channel values.
#[derive(Clone, PartialEq, Eq)]
pub struct Universe {
    values: [u8; UNIVERSE_SIZE],
    dirty: Option<Range<usize>>,
}

impl Default for Universe {
    fn default() -> Self {
        Self {
            values: [0; UNIVERSE_SIZE],
            dirty: None,
        }
    }
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.values
    }

    pub fn value(&self, channel: usize) -> Option<u8> {
        self.values.get(channel).copied()
    }

    /// Writes a channel value. Returns `false` when the channel is out of range.
    pub fn write(&mut self, channel: usize, value: u8) -> bool {
        debug_assert!(channel < UNIVERSE_SIZE, "channel {channel} out of range");
        let Some(slot) = self.values.get_mut(channel) else {
            return false;
        };
        if *slot != value {
            *slot = value;
            self.mark(channel..channel + 1);
        }
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.is_some()
    }

    pub fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Forces the whole buffer to be flushed on the next dump.
    pub fn mark_all_dirty(&mut self) {
        self.dirty = Some(0..UNIVERSE_SIZE);
    }

    /// Returns the changed span and resets the dirty state.
    pub fn take_dirty(&mut self) -> Option<Range<usize>> {
        self.dirty.take()
    }

    fn mark(&mut self, span: Range<usize>) {
        self.dirty = Some(match self.dirty.take() {
            Some(existing) => existing.start.min(span.start)..existing.end.max(span.end),
            None => span,
        });
    }
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lit = self.values.iter().filter(|v| **v > 0).count();
        f.debug_struct("Universe")
            .field("lit_channels", &lit)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// The full address space of the engine: a fixed number of universes.
#[derive(Debug, Clone)]
pub struct UniverseArray {
    universes: Vec<Universe>,
}

impl UniverseArray {
    /// Allocates `count` zeroed universes. Allocation failure is reported
    /// rather than aborting the process.
    pub fn new(count: usize) -> Result<Self> {
        let mut universes = Vec::new();
        universes
            .try_reserve_exact(count)
            .map_err(|_| LightEngineError::ResourceExhausted(count))?;
        universes.resize_with(count, Universe::default);
        Ok(Self { universes })
    }

    pub fn len(&self) -> usize {
        self.universes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    pub fn get(&self, universe: usize) -> Option<&Universe> {
        self.universes.get(universe)
    }

    pub fn get_mut(&mut self, universe: usize) -> Option<&mut Universe> {
        self.universes.get_mut(universe)
    }

    /// Current value of a channel, or `None` if the address is out of range.
    pub fn value(&self, universe: usize, channel: usize) -> Option<u8> {
        self.universes.get(universe)?.value(channel)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Universe)> {
        self.universes.iter_mut().enumerate()
    }

    pub fn snapshot(&self) -> UniverseSnapshot {
        UniverseSnapshot {
            universes: self.universes.iter().map(|u| u.values.to_vec()).collect(),
        }
    }
}

/// Read-only copy of all universe buffers, published after each flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub universes: Vec<Vec<u8>>,
}

impl UniverseSnapshot {
    pub fn value(&self, universe: usize, channel: usize) -> Option<u8> {
        self.universes.get(universe)?.get(channel).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_range_spans_every_changed_channel() {
        let mut universe = Universe::new();
        assert!(!universe.is_dirty());

        universe.write(10, 255);
        universe.write(3, 1);
        universe.write(40, 0); // unchanged, does not widen the span

        assert_eq!(universe.take_dirty(), Some(3..11));
        assert_eq!(universe.take_dirty(), None);
        assert_eq!(universe.value(10), Some(255));
    }

    #[test]
    fn rewriting_the_same_value_keeps_buffer_clean() {
        let mut universe = Universe::new();
        universe.write(0, 12);
        universe.take_dirty();
        universe.write(0, 12);
        assert!(!universe.is_dirty());
    }

    #[test]
    fn array_snapshot_is_a_copy() {
        let mut array = UniverseArray::new(2).unwrap();
        array.get_mut(1).unwrap().write(511, 7);

        let snapshot = array.snapshot();
        array.get_mut(1).unwrap().write(511, 9);

        assert_eq!(snapshot.value(1, 511), Some(7));
        assert_eq!(array.value(1, 511), Some(9));
        assert_eq!(snapshot.value(2, 0), None);
    }
}
