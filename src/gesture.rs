//! Touch gesture detection: a polled state machine over a raw level.
//!
//! Taps are resolved only after a quiet window following the last release,
//! which is what lets a double-tap be told apart from two single taps. The
//! tap counter resets after every resolution and after every long-hold
//! firing; long-hold fires at most once per continuous press.

use std::time::{Duration, Instant};

/// Logical action produced by gesture resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureAction {
    /// Single tap
    Capture,
    /// Two or more taps
    ToggleRecording,
    /// Continuous long hold
    ToggleStreaming,
}

/// Detector thresholds and windows.
#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Raw level above which the input counts as pressed
    pub threshold: u16,
    /// Continuous press length that fires the long-hold action
    pub long_hold: Duration,
    /// Quiet time after the last release before taps resolve
    pub quiet_window: Duration,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            threshold: 40,
            long_hold: Duration::from_millis(1000),
            quiet_window: Duration::from_millis(400),
        }
    }
}

/// Debounced interpretation of the raw touch signal. No persisted identity
/// across power cycles; construct fresh at startup.
#[derive(Debug)]
pub struct GestureDetector {
    cfg: GestureConfig,
    pressed: bool,
    pressed_at: Option<Instant>,
    released_at: Option<Instant>,
    taps: u32,
    long_hold_fired: bool,
}

impl GestureDetector {
    pub fn new(cfg: GestureConfig) -> Self {
        Self {
            cfg,
            pressed: false,
            pressed_at: None,
            released_at: None,
            taps: 0,
            long_hold_fired: false,
        }
    }

    /// Feed one raw sample. At most one action per poll.
    pub fn poll(&mut self, level: u16, now: Instant) -> Option<GestureAction> {
        let touched = level > self.cfg.threshold;

        if touched && !self.pressed {
            self.pressed = true;
            self.taps += 1;
            self.pressed_at = Some(now);
            self.long_hold_fired = false;
            return None;
        }

        if !touched && self.pressed {
            self.pressed = false;
            self.released_at = Some(now);
            self.long_hold_fired = false;
            return None;
        }

        if self.pressed && !self.long_hold_fired {
            if let Some(pressed_at) = self.pressed_at {
                if now.duration_since(pressed_at) >= self.cfg.long_hold {
                    // Once per continuous press
                    self.long_hold_fired = true;
                    self.taps = 0;
                    return Some(GestureAction::ToggleStreaming);
                }
            }
        }

        if !self.pressed && self.taps > 0 {
            if let Some(released_at) = self.released_at {
                if now.duration_since(released_at) > self.cfg.quiet_window {
                    let action = if self.taps == 1 {
                        GestureAction::Capture
                    } else {
                        GestureAction::ToggleRecording
                    };
                    self.taps = 0;
                    return Some(action);
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HI: u16 = 100;
    const LO: u16 = 0;

    fn detector() -> GestureDetector {
        GestureDetector::new(GestureConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Replay (level, offset-ms) samples, collecting fired actions.
    fn replay(det: &mut GestureDetector, samples: &[(u16, u64)]) -> Vec<GestureAction> {
        let t0 = Instant::now();
        samples
            .iter()
            .filter_map(|&(level, at)| det.poll(level, t0 + ms(at)))
            .collect()
    }

    #[test]
    fn single_tap_resolves_to_capture() {
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[(HI, 0), (HI, 50), (LO, 100), (LO, 300), (LO, 501), (LO, 600)],
        );
        assert_eq!(actions, vec![GestureAction::Capture]);
        assert_eq!(det.taps, 0);
    }

    #[test]
    fn double_tap_resolves_to_one_record_toggle() {
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[
                (HI, 0),
                (LO, 80),
                (HI, 200), // second tap inside the quiet window
                (LO, 280),
                (LO, 681), // quiet window elapsed
                (LO, 800),
            ],
        );
        assert_eq!(actions, vec![GestureAction::ToggleRecording]);
        assert_eq!(det.taps, 0);
    }

    #[test]
    fn two_separated_taps_resolve_to_two_captures() {
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[
                (HI, 0),
                (LO, 80),
                (LO, 481), // first quiet window elapsed → capture
                (HI, 600),
                (LO, 680),
                (LO, 1081), // second quiet window elapsed → capture
            ],
        );
        assert_eq!(
            actions,
            vec![GestureAction::Capture, GestureAction::Capture]
        );
    }

    #[test]
    fn triple_tap_is_still_a_record_toggle() {
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[
                (HI, 0),
                (LO, 60),
                (HI, 150),
                (LO, 210),
                (HI, 300),
                (LO, 360),
                (LO, 761),
            ],
        );
        assert_eq!(actions, vec![GestureAction::ToggleRecording]);
    }

    #[test]
    fn long_hold_fires_exactly_once() {
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[
                (HI, 0),
                (HI, 500),
                (HI, 1000), // long-hold threshold
                (HI, 1500), // still held: no refire
                (HI, 3000),
                (LO, 3100),
                (LO, 3600), // no tap left to resolve
            ],
        );
        assert_eq!(actions, vec![GestureAction::ToggleStreaming]);
        assert_eq!(det.taps, 0);
    }

    #[test]
    fn release_and_repress_rearms_long_hold() {
        let mut det = detector();
        let first = replay(&mut det, &[(HI, 0), (HI, 1000), (LO, 1100)]);
        assert_eq!(first, vec![GestureAction::ToggleStreaming]);

        let t0 = Instant::now() + ms(2000);
        assert!(det.poll(HI, t0).is_none());
        assert_eq!(
            det.poll(HI, t0 + ms(1000)),
            Some(GestureAction::ToggleStreaming)
        );
    }

    #[test]
    fn tap_then_hold_does_not_resolve_taps() {
        // Tap, then a long hold inside the quiet window: the hold fires and
        // swallows the pending tap.
        let mut det = detector();
        let actions = replay(
            &mut det,
            &[
                (HI, 0),
                (LO, 80),
                (HI, 200),
                (HI, 1200), // long-hold fires, taps reset
                (LO, 1300),
                (LO, 1800), // quiet window passes with no taps pending
            ],
        );
        assert_eq!(actions, vec![GestureAction::ToggleStreaming]);
    }

    #[test]
    fn below_threshold_never_presses() {
        let mut det = detector();
        let actions = replay(&mut det, &[(40, 0), (39, 100), (0, 2000)]);
        assert!(actions.is_empty());
        assert!(!det.pressed);
    }
}
