use super::GuideAlgorithm;

/// Two-stage lowpass: a slope estimate is maintained across the raw error
/// history and only errors whose magnitude clears `min_move` are allowed to
/// move the output, so a slow drift still gets corrected while seeing-driven
/// jitter below the noise floor is fully absorbed.
pub struct Lowpass2 {
    slope_weight: f64,
    min_move: f64,
    history: Option<f64>,
    slope: f64,
}

impl Lowpass2 {
    pub fn new(slope_weight: f64, min_move: f64) -> Self {
        Self {
            slope_weight: slope_weight.clamp(0.0, 1.0),
            min_move: min_move.max(0.0),
            history: None,
            slope: 0.0,
        }
    }
}

impl GuideAlgorithm for Lowpass2 {
    fn result(&mut self, raw_error: f64) -> f64 {
        let prev = match self.history {
            None => {
                self.history = Some(raw_error);
                return raw_error;
            }
            Some(p) => p,
        };

        let diff = raw_error - prev;
        self.slope += self.slope_weight * (diff - self.slope);
        let filtered = prev + self.slope;
        self.history = Some(filtered);

        if raw_error.abs() < self.min_move {
            0.0
        } else {
            filtered
        }
    }

    fn reset(&mut self) {
        self.history = None;
        self.slope = 0.0;
    }

    fn summary(&self) -> String {
        format!(
            "Lowpass2(slope_weight={:.2}, min_move={:.2})",
            self.slope_weight, self.min_move
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_errors_under_min_move() {
        let mut l = Lowpass2::new(0.5, 1.0);
        l.result(5.0);
        assert_eq!(l.result(0.2), 0.0);
    }

    #[test]
    fn reset_clears_slope_and_history() {
        let mut l = Lowpass2::new(0.5, 0.1);
        l.result(5.0);
        l.result(5.0);
        l.reset();
        assert_eq!(l.result(2.0), 2.0);
    }
}
