use crate::enums::DecDirection;
use std::collections::VecDeque;

/// Pulse widths are clamped to this limit (`MAX_COMP_AMOUNT` in the source),
/// in milliseconds.
pub const MAX_PULSE_WIDTH_MS: u32 = 8000;
/// Capacity of the residual-offset history used for self-tuning.
const HISTORY_SIZE: usize = 10;
/// Ceiling defaults to 1.5x the initial pulse width when not explicitly set.
const DEFAULT_CEILING_MULTIPLIER: f64 = 1.5;

/// Stateful per-axis (conventionally declination) backlash compensator
/// (4.4). Adds `pulse_width` to the outgoing pulse on a direction reversal
/// and self-tunes `pulse_width` from the residual error observed after each
/// compensated pulse lands.
#[derive(Debug, Clone)]
pub struct BacklashCompensator {
    pulse_width_ms: u32,
    ceiling_ms: u32,
    fixed_size: bool,
    active: bool,
    last_direction: Option<DecDirection>,
    just_compensated: bool,
    residual_offsets: VecDeque<f64>,
}

impl BacklashCompensator {
    pub fn new(pulse_width_ms: u32, fixed_size: bool, ceiling_ms: u32, active: bool) -> Self {
        let mut comp = Self {
            pulse_width_ms: 0,
            ceiling_ms: 0,
            fixed_size,
            active,
            last_direction: None,
            just_compensated: false,
            residual_offsets: VecDeque::with_capacity(HISTORY_SIZE),
        };
        comp.set_comp_values(pulse_width_ms, ceiling_ms);
        comp
    }

    /// Normalizes pulse width and ceiling together, mirroring
    /// `BacklashComp::SetCompValues`: a ceiling below the requested pulse
    /// width is replaced by 1.5x the pulse width, then both are clamped to
    /// `MAX_PULSE_WIDTH_MS`.
    fn set_comp_values(&mut self, pulse_width_ms: u32, ceiling_ms: u32) {
        self.pulse_width_ms = pulse_width_ms.min(MAX_PULSE_WIDTH_MS);
        self.ceiling_ms = if ceiling_ms < self.pulse_width_ms {
            ((self.pulse_width_ms as f64 * DEFAULT_CEILING_MULTIPLIER) as u32).min(MAX_PULSE_WIDTH_MS)
        } else {
            ceiling_ms.min(MAX_PULSE_WIDTH_MS)
        };
    }

    pub fn pulse_width_ms(&self) -> u32 {
        self.pulse_width_ms
    }

    pub fn ceiling_ms(&self) -> u32 {
        self.ceiling_ms
    }

    pub fn fixed_size(&self) -> bool {
        self.fixed_size
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn just_compensated(&self) -> bool {
        self.just_compensated
    }

    pub fn residual_offsets(&self) -> &VecDeque<f64> {
        &self.residual_offsets
    }

    /// Explicit reconfiguration, matching `SetBacklashPulse`.
    pub fn set_backlash_pulse(&mut self, pulse_width_ms: u32, fixed_size: bool, ceiling_ms: u32) {
        self.set_comp_values(pulse_width_ms, ceiling_ms);
        self.fixed_size = fixed_size;
    }

    /// `lastDirection` is reset to `None` when guiding is paused or
    /// restarted, so the first post-restart pulse is never interpreted as
    /// a reversal (Testable Property 5).
    pub fn reset_baseline(&mut self) {
        self.last_direction = None;
        self.just_compensated = false;
    }

    /// Contract: `apply(direction, axis_error, inout pulse_amount)` (4.4).
    /// On a direction reversal, adds `pulse_width_ms` to `pulse_amount_ms`
    /// and sets `just_compensated`. No-ops if inactive, the pulse width is
    /// zero, or `axis_error` is zero.
    pub fn apply(&mut self, direction: DecDirection, axis_error: f64, pulse_amount_ms: &mut u32) {
        self.just_compensated = false;

        if !self.active || self.pulse_width_ms == 0 || axis_error == 0.0 {
            self.last_direction = Some(direction);
            return;
        }

        if let Some(last) = self.last_direction {
            if last != direction {
                *pulse_amount_ms += self.pulse_width_ms;
                self.just_compensated = true;
            }
        }

        self.last_direction = Some(direction);
    }

    /// Self-tuning (4.4 steps 1-8), invoked after a compensated pulse has
    /// landed and a new image has measured the residual error.
    /// `residual_error` is the raw (unsigned-by-direction) pixel error in
    /// the commanded direction; `commanded_direction` is the direction of
    /// the pulse that included compensation.
    pub fn observe_residual(
        &mut self,
        commanded_direction: DecDirection,
        residual_error: f64,
        min_move: f64,
        axis_rate: f64,
    ) {
        if self.fixed_size {
            return;
        }

        let observed_direction = if residual_error > 0.0 {
            DecDirection::Down
        } else {
            DecDirection::Up
        };
        let residual_magnitude = residual_error.abs();
        let min_move = min_move.max(0.0);

        // Positive miss: star still moving the same way we commanded
        // (under-shoot). Negative: it reversed past the target (over-shoot).
        let miss = if observed_direction == commanded_direction {
            residual_magnitude
        } else {
            -residual_magnitude
        };

        if self.residual_offsets.len() == HISTORY_SIZE {
            self.residual_offsets.pop_front();
        }
        self.residual_offsets.push_back(miss);

        if residual_magnitude < min_move {
            return;
        }

        let num_points = self.residual_offsets.len();
        let avg_miss: f64 = self.residual_offsets.iter().sum::<f64>() / num_points as f64;

        if avg_miss.abs() <= min_move {
            return;
        }

        let corr = (avg_miss.abs() / axis_rate + 0.5).floor() as i64;
        let current = self.pulse_width_ms as i64;

        let nominal: i64 = if miss >= 0.0 {
            // under-shot the target
            if avg_miss > 0.0 {
                current + corr
            } else {
                current
            }
        } else {
            // over-shot the target
            if avg_miss < 0.0 {
                current - corr
            } else {
                current
            }
        };

        let new_width: i64 = if miss >= 0.0 {
            let cap = ((current as f64 * 1.1).min(self.ceiling_ms as f64)).round() as i64;
            nominal.min(cap).min(self.ceiling_ms as i64)
        } else {
            let floor = ((current as f64 * 0.8).max(0.0)).round() as i64;
            nominal.max(floor).max(0)
        };
        let new_width = new_width.clamp(0, self.ceiling_ms as i64) as u32;

        if new_width != self.pulse_width_ms && num_points > 2 {
            self.residual_offsets.pop_front();
        }
        if new_width != self.pulse_width_ms {
            self.set_comp_values(new_width, self.ceiling_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn s1_compensation_on_reversal() {
        let mut comp = BacklashCompensator::new(200, false, 400, true);
        // seed lastDirection = Up via a non-reversing apply.
        let mut seed = 0u32;
        comp.apply(DecDirection::Up, 1.0, &mut seed);

        let mut pulse = 300u32;
        comp.apply(DecDirection::Down, -1.2, &mut pulse);
        assert_eq!(pulse, 500);
        assert!(comp.just_compensated());
        assert_eq!(comp.residual_offsets().len(), 0); // only observe_residual appends
    }

    #[test]
    fn s2_no_compensation_without_direction_change() {
        let mut comp = BacklashCompensator::new(200, false, 400, true);
        let mut seed = 0u32;
        comp.apply(DecDirection::Up, 1.0, &mut seed);

        let mut pulse = 300u32;
        comp.apply(DecDirection::Up, 1.0, &mut pulse);
        assert_eq!(pulse, 300);
        assert!(!comp.just_compensated());
    }

    #[test]
    fn first_pulse_after_reset_is_untouched_p5() {
        let mut comp = BacklashCompensator::new(200, false, 400, true);
        comp.reset_baseline();
        let mut pulse = 300u32;
        comp.apply(DecDirection::Down, -1.0, &mut pulse);
        assert_eq!(pulse, 300);
        assert!(!comp.just_compensated());
    }

    #[test]
    fn s3_self_tune_bounded_increase() {
        let mut comp = BacklashCompensator::new(200, false, 400, true);
        let mut last_width = comp.pulse_width_ms();
        for _ in 0..10 {
            comp.observe_residual(DecDirection::Up, 0.8, 0.1, 0.04);
            let width = comp.pulse_width_ms();
            assert!(width as f64 <= last_width as f64 * 1.1 + 1.0);
            assert!(width <= comp.ceiling_ms());
            last_width = width;
        }
        assert!(comp.pulse_width_ms() >= 200);
    }

    #[test]
    fn pulse_width_never_exceeds_ceiling_p3() {
        let mut comp = BacklashCompensator::new(7900, false, 0, true);
        assert!(comp.pulse_width_ms() <= comp.ceiling_ms());
        assert!(comp.ceiling_ms() <= MAX_PULSE_WIDTH_MS);
    }

    #[test]
    fn residual_history_bounded_p2() {
        let mut comp = BacklashCompensator::new(200, false, 400, true);
        for _ in 0..25 {
            comp.observe_residual(DecDirection::Up, 5.0, 0.1, 0.04);
            assert!(comp.residual_offsets().len() <= 10);
        }
    }

    #[test]
    fn fixed_size_disables_self_tuning() {
        let mut comp = BacklashCompensator::new(200, true, 400, true);
        let before = comp.pulse_width_ms();
        comp.observe_residual(DecDirection::Up, 5.0, 0.1, 0.04);
        assert_eq!(comp.pulse_width_ms(), before);
    }

    #[test]
    fn ceiling_defaults_to_one_point_five_times_pulse_width() {
        let comp = BacklashCompensator::new(200, false, 0, true);
        assert_f64_near!(comp.ceiling_ms() as f64, 300.0);
    }

    #[test]
    fn inactive_compensator_never_injects() {
        let mut comp = BacklashCompensator::new(200, false, 400, false);
        let mut seed = 0u32;
        comp.apply(DecDirection::Up, 1.0, &mut seed);
        let mut pulse = 300u32;
        comp.apply(DecDirection::Down, -1.0, &mut pulse);
        assert_eq!(pulse, 300);
    }
}
