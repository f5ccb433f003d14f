use super::GuideAlgorithm;

/// Classic PHD-style hysteresis filter: the commanded correction is a
/// weighted blend of the current and previous raw errors, damped by
/// `aggression` so a single noisy sample doesn't fully translate into a
/// pulse.
pub struct Hysteresis {
    aggression: f64,
    hysteresis: f64,
    last_error: f64,
}

impl Hysteresis {
    pub fn new(aggression: f64, hysteresis: f64) -> Self {
        Self {
            aggression: aggression.clamp(0.0, 1.0),
            hysteresis: hysteresis.clamp(0.0, 1.0),
            last_error: 0.0,
        }
    }
}

impl GuideAlgorithm for Hysteresis {
    fn result(&mut self, raw_error: f64) -> f64 {
        let blended = (1.0 - self.hysteresis) * raw_error + self.hysteresis * self.last_error;
        self.last_error = raw_error;
        blended * self.aggression
    }

    fn reset(&mut self) {
        self.last_error = 0.0;
    }

    fn summary(&self) -> String {
        format!(
            "Hysteresis(aggression={:.2}, hysteresis={:.2})",
            self.aggression, self.hysteresis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn blends_with_previous_error() {
        let mut h = Hysteresis::new(1.0, 0.1);
        assert_f64_near!(h.result(10.0), 10.0);
        // second call blends 90% of the new sample with 10% of the last.
        assert_f64_near!(h.result(0.0), 1.0);
    }

    #[test]
    fn reset_clears_history() {
        let mut h = Hysteresis::new(1.0, 0.5);
        h.result(10.0);
        h.reset();
        assert_f64_near!(h.result(0.0), 0.0);
    }
}
