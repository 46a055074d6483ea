//! Merges per-instance channel contributions into the universe buffers.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::config::MergeMode;
use crate::diagnostics::{Diagnostic, DiagnosticLog};
use crate::function::FunctionId;
use crate::universe::{UniverseArray, UNIVERSE_SIZE};

/// A value one running instance wants on one channel this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contribution {
    pub universe: usize,
    pub channel: usize,
    pub value: u8,
    /// Start order of the contributing instance.
    pub activation: u64,
    pub function: FunctionId,
}

/// Writes the winning value of every contributed channel.
///
/// With [`MergeMode::Ltp`] the most recently activated instance wins and ties
/// go to the lowest function id. With [`MergeMode::Htp`] the highest value
/// wins. Channels nobody contributed to keep their previous value.
///
/// Returns the number of channels written.
pub fn resolve(
    contributions: &mut [Contribution],
    mode: MergeMode,
    universes: &mut UniverseArray,
    diagnostics: &mut DiagnosticLog,
) -> usize {
    let mut winners: BTreeMap<(usize, usize), u8> = BTreeMap::new();
    match mode {
        MergeMode::Ltp => {
            contributions.sort_by_key(|c| (c.activation, Reverse(c.function)));
            for c in contributions.iter() {
                winners.insert((c.universe, c.channel), c.value);
            }
        }
        MergeMode::Htp => {
            for c in contributions.iter() {
                let slot = winners.entry((c.universe, c.channel)).or_insert(0);
                *slot = (*slot).max(c.value);
            }
        }
    }

    let mut written = 0;
    for ((universe, channel), value) in winners {
        debug_assert!(
            universe < universes.len() && channel < UNIVERSE_SIZE,
            "contribution outside the address space: {universe}/{channel}"
        );
        match universes.get_mut(universe) {
            Some(buffer) if channel < UNIVERSE_SIZE => {
                buffer.write(channel, value);
                written += 1;
            }
            _ => diagnostics.record(Diagnostic::ChannelOutOfRange { universe, channel }),
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contribution(function: u32, activation: u64, channel: usize, value: u8) -> Contribution {
        Contribution {
            universe: 0,
            channel,
            value,
            activation,
            function: FunctionId(function),
        }
    }

    fn run(contributions: &mut [Contribution], mode: MergeMode) -> UniverseArray {
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        resolve(contributions, mode, &mut universes, &mut diagnostics);
        universes
    }

    #[test]
    fn latest_activation_wins() {
        let mut first_a = [contribution(1, 1, 0, 50), contribution(2, 2, 0, 200)];
        assert_eq!(run(&mut first_a, MergeMode::Ltp).value(0, 0), Some(200));

        // Starting in the opposite order swaps the winner.
        let mut first_b = [contribution(1, 2, 0, 50), contribution(2, 1, 0, 200)];
        assert_eq!(run(&mut first_b, MergeMode::Ltp).value(0, 0), Some(50));
    }

    #[test]
    fn activation_ties_go_to_the_lowest_id() {
        let mut tied = [contribution(7, 3, 0, 70), contribution(4, 3, 0, 40)];
        assert_eq!(run(&mut tied, MergeMode::Ltp).value(0, 0), Some(40));
    }

    #[test]
    fn highest_value_wins_in_htp() {
        let mut contributions = [
            contribution(1, 2, 0, 50),
            contribution(2, 1, 0, 200),
            contribution(3, 3, 0, 120),
        ];
        assert_eq!(run(&mut contributions, MergeMode::Htp).value(0, 0), Some(200));
    }

    fn out_of_range_contributions() -> [Contribution; 3] {
        let mut wrong_universe = contribution(2, 2, 4, 90);
        wrong_universe.universe = 3;
        [
            contribution(1, 1, 0, 10),
            contribution(1, 1, UNIVERSE_SIZE, 20),
            wrong_universe,
        ]
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn out_of_range_addresses_are_reported_in_release_builds() {
        let mut universes = UniverseArray::new(1).unwrap();
        let mut diagnostics = DiagnosticLog::default();
        let written = resolve(
            &mut out_of_range_contributions(),
            MergeMode::Ltp,
            &mut universes,
            &mut diagnostics,
        );
        assert_eq!(written, 1);
        assert_eq!(universes.value(0, 0), Some(10));
        assert_eq!(
            diagnostics.drain(),
            [
                Diagnostic::ChannelOutOfRange {
                    universe: 0,
                    channel: UNIVERSE_SIZE
                },
                Diagnostic::ChannelOutOfRange {
                    universe: 3,
                    channel: 4
                },
            ]
        );
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "outside the address space")]
    fn out_of_range_addresses_fail_fast_in_debug_builds() {
        run(&mut out_of_range_contributions(), MergeMode::Ltp);
    }

    #[test]
    fn untouched_channels_keep_their_value() {
        let mut universes = UniverseArray::new(1).unwrap();
        universes.get_mut(0).unwrap().write(9, 77);
        let mut diagnostics = DiagnosticLog::default();
        let written = resolve(
            &mut [contribution(1, 1, 0, 10)],
            MergeMode::Ltp,
            &mut universes,
            &mut diagnostics,
        );
        assert_eq!(written, 1);
        assert_eq!(universes.value(0, 9), Some(77));
        assert_eq!(universes.value(0, 0), Some(10));
    }
}
