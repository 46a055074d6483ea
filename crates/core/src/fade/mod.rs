use std::time::Duration;

/// Position inside a fade window, clamped to `[0, 1]`. A zero-length fade is
/// always complete.
pub fn fade_ratio(elapsed: Duration, fade: Duration) -> f64 {
    if fade.is_zero() {
        return 1.0;
    }
    (elapsed.as_secs_f64() / fade.as_secs_f64()).clamp(0.0, 1.0)
}

/// Linear interpolation between two channel values.
pub fn interpolate(start: u8, target: u8, ratio: f64) -> u8 {
    let ratio = ratio.clamp(0.0, 1.0);
    let value = f64::from(start) + (f64::from(target) - f64::from(start)) * ratio;
    value.round().clamp(0.0, 255.0) as u8
}

/// Scales a channel value by an intensity in `[0, 1]`.
pub fn scale(value: u8, intensity: f64) -> u8 {
    (f64::from(value) * intensity.clamp(0.0, 1.0))
        .round()
        .clamp(0.0, 255.0) as u8
}

/// Runtime fade state of a single channel.
///
/// `start` is captured when the fade begins (from the universe buffer or
/// from a previous fade's `current`), `current` is what was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FadeChannel {
    pub universe: usize,
    pub channel: usize,
    pub start: u8,
    pub target: u8,
    pub current: u8,
}

impl FadeChannel {
    pub fn new(universe: usize, channel: usize, start: u8, target: u8) -> Self {
        Self {
            universe,
            channel,
            start,
            target,
            current: start,
        }
    }

    pub fn address(&self) -> (usize, usize) {
        (self.universe, self.channel)
    }

    /// Moves `current` to where the fade should be at `ratio` and returns it.
    pub fn calculate(&mut self, ratio: f64) -> u8 {
        self.current = interpolate(self.start, self.target, ratio);
        self.current
    }

    /// Restarts the fade from the current value towards a new target.
    pub fn retarget(&mut self, target: u8) {
        self.start = self.current;
        self.target = target;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_clamped_and_zero_fade_is_instant() {
        let fade = Duration::from_millis(100);
        assert_eq!(fade_ratio(Duration::ZERO, fade), 0.0);
        assert_eq!(fade_ratio(Duration::from_millis(50), fade), 0.5);
        assert_eq!(fade_ratio(Duration::from_millis(500), fade), 1.0);
        assert_eq!(fade_ratio(Duration::ZERO, Duration::ZERO), 1.0);
    }

    #[test]
    fn fade_in_is_monotonic() {
        let fade = Duration::from_millis(1000);
        let mut previous = 0;
        for ms in 0..=1000 {
            let value = interpolate(10, 240, fade_ratio(Duration::from_millis(ms), fade));
            assert!(value >= previous, "value dropped at {ms} ms");
            previous = value;
        }
        assert_eq!(previous, 240);
    }

    #[test]
    fn fades_downwards_too() {
        assert_eq!(interpolate(200, 0, 0.0), 200);
        assert_eq!(interpolate(200, 0, 0.5), 100);
        assert_eq!(interpolate(200, 0, 1.0), 0);
    }

    #[test]
    fn retarget_starts_from_current_value() {
        let mut fc = FadeChannel::new(0, 4, 0, 200);
        assert_eq!(fc.calculate(0.5), 100);
        fc.retarget(0);
        assert_eq!(fc.start, 100);
        assert_eq!(fc.calculate(0.5), 50);
    }

    #[test]
    fn scale_applies_intensity() {
        assert_eq!(scale(200, 0.5), 100);
        assert_eq!(scale(200, 2.0), 200);
        assert_eq!(scale(200, 0.0), 0);
    }
}
