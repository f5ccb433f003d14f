use super::GuideAlgorithm;

/// Penalizes direction reversals: a raw error that would flip the sign of
/// the previous commanded correction is scaled down, on the theory that
/// oscillation around the lock position is more often seeing noise than a
/// real drift reversal. A sustained reversal still gets through at full
/// strength after `reset` or once the damped value itself reverses sign.
pub struct ResistSwitch {
    last_result: f64,
    resistance: f64,
}

impl ResistSwitch {
    pub fn new() -> Self {
        Self {
            last_result: 0.0,
            resistance: 0.5,
        }
    }

    pub fn with_resistance(resistance: f64) -> Self {
        Self {
            last_result: 0.0,
            resistance: resistance.clamp(0.0, 1.0),
        }
    }
}

impl Default for ResistSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl GuideAlgorithm for ResistSwitch {
    fn result(&mut self, raw_error: f64) -> f64 {
        let is_reversal = self.last_result != 0.0 && raw_error.signum() != self.last_result.signum();
        let out = if is_reversal {
            raw_error * (1.0 - self.resistance)
        } else {
            raw_error
        };
        self.last_result = out;
        out
    }

    fn reset(&mut self) {
        self.last_result = 0.0;
    }

    fn summary(&self) -> String {
        format!("ResistSwitch(resistance={:.2})", self.resistance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn damps_a_sign_reversal() {
        let mut r = ResistSwitch::with_resistance(0.5);
        assert_f64_near!(r.result(5.0), 5.0);
        assert_f64_near!(r.result(-2.0), -1.0);
    }

    #[test]
    fn same_direction_passes_through() {
        let mut r = ResistSwitch::with_resistance(0.5);
        r.result(5.0);
        assert_f64_near!(r.result(3.0), 3.0);
    }
}
