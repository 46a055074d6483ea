use std::f64::consts::{FRAC_PI_2, TAU};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Direction;

/// Shape traced by the pan/tilt pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EfxAlgorithm {
    #[default]
    Circle,
    Eight,
    Line,
    Diamond,
    Lissajous,
}

/// A moving head driven by the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EfxHead {
    pub universe: usize,
    pub pan: usize,
    pub tilt: usize,
    /// Optional intensity channel, faded with the function envelope.
    #[serde(default)]
    pub dimmer: Option<usize>,
}

/// Parametric pan/tilt pattern generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Efx {
    pub algorithm: EfxAlgorithm,
    /// Horizontal amplitude, 0..=127.
    pub width: f64,
    /// Vertical amplitude, 0..=127.
    pub height: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub x_frequency: f64,
    pub y_frequency: f64,
    pub x_phase: f64,
    pub y_phase: f64,
    /// Time for one full cycle of the pattern.
    pub period_ms: u32,
    /// Phase offset between consecutive heads as a fraction of a cycle.
    pub spread: f64,
    /// Level written to head dimmer channels while running.
    pub dimmer_level: u8,
    pub heads: Vec<EfxHead>,
}

impl Default for Efx {
    fn default() -> Self {
        Self {
            algorithm: EfxAlgorithm::Circle,
            width: 127.0,
            height: 127.0,
            x_offset: 127.0,
            y_offset: 127.0,
            x_frequency: 2.0,
            y_frequency: 3.0,
            x_phase: FRAC_PI_2,
            y_phase: 0.0,
            period_ms: 2000,
            spread: 0.0,
            dimmer_level: 255,
            heads: Vec::new(),
        }
    }
}

impl Efx {
    /// Raw pattern coordinates in `[-1, 1]` at angle `iterator` (radians).
    fn unit_point(&self, iterator: f64) -> (f64, f64) {
        match self.algorithm {
            EfxAlgorithm::Circle => ((iterator + FRAC_PI_2).cos(), iterator.cos()),
            EfxAlgorithm::Eight => ((iterator * 2.0 + FRAC_PI_2).cos(), iterator.cos()),
            EfxAlgorithm::Line => (iterator.cos(), iterator.cos()),
            EfxAlgorithm::Diamond => (
                (iterator - FRAC_PI_2).cos().powi(3),
                iterator.cos().powi(3),
            ),
            EfxAlgorithm::Lissajous => (
                (self.x_frequency * iterator - self.x_phase).cos(),
                (self.y_frequency * iterator - self.y_phase).cos(),
            ),
        }
    }

    /// Pan/tilt values at angle `iterator`.
    pub fn point(&self, iterator: f64) -> (u8, u8) {
        let (x, y) = self.unit_point(iterator);
        let pan = (self.x_offset + x * self.width).round().clamp(0.0, 255.0);
        let tilt = (self.y_offset + y * self.height).round().clamp(0.0, 255.0);
        (pan as u8, tilt as u8)
    }

    /// Pattern angle of head `index` after `elapsed` playback time.
    pub fn iterator(&self, elapsed: Duration, index: usize, direction: Direction) -> f64 {
        let cycle = if self.period_ms == 0 {
            0.0
        } else {
            elapsed.as_secs_f64() * 1000.0 / f64::from(self.period_ms)
        };
        let angle = ((cycle + self.spread * index as f64) * TAU).rem_euclid(TAU);
        match direction {
            Direction::Forward => angle,
            Direction::Backward => TAU - angle,
        }
    }

    pub(crate) fn addresses(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.heads.iter().flat_map(|head| {
            [Some(head.pan), Some(head.tilt), head.dimmer]
                .into_iter()
                .flatten()
                .map(move |channel| (head.universe, channel))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circle_starts_at_the_top_centre() {
        let efx = Efx::default();
        assert_eq!(efx.point(0.0), (127, 254));
        assert_eq!(efx.point(std::f64::consts::PI), (127, 0));
    }

    #[test]
    fn iterator_wraps_every_period() {
        let efx = Efx {
            period_ms: 1000,
            ..Default::default()
        };
        let quarter = efx.iterator(Duration::from_millis(250), 0, Direction::Forward);
        let again = efx.iterator(Duration::from_millis(1250), 0, Direction::Forward);
        assert!((quarter - FRAC_PI_2).abs() < 1e-9);
        assert!((again - quarter).abs() < 1e-9);

        let backward = efx.iterator(Duration::from_millis(250), 0, Direction::Backward);
        assert!((backward - (TAU - FRAC_PI_2)).abs() < 1e-9);
    }

    #[test]
    fn spread_offsets_heads() {
        let efx = Efx {
            period_ms: 1000,
            spread: 0.5,
            ..Default::default()
        };
        let first = efx.iterator(Duration::ZERO, 0, Direction::Forward);
        let second = efx.iterator(Duration::ZERO, 1, Direction::Forward);
        assert!((second - first - std::f64::consts::PI).abs() < 1e-9);
    }

    #[test]
    fn values_stay_in_dmx_range() {
        let efx = Efx {
            algorithm: EfxAlgorithm::Lissajous,
            x_offset: 250.0,
            ..Default::default()
        };
        for step in 0..64 {
            let (pan, _) = efx.point(step as f64 * TAU / 64.0);
            assert!(pan >= 123);
        }
    }
}
