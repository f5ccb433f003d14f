use super::GuideAlgorithm;

/// Single-pole lowpass: the output is an exponential moving average of the
/// raw error, so sustained drift passes through while single-frame noise is
/// attenuated.
pub struct Lowpass {
    slope_weight: f64,
    history: Option<f64>,
}

impl Lowpass {
    pub fn new(slope_weight: f64) -> Self {
        Self {
            slope_weight: slope_weight.clamp(0.0, 1.0),
            history: None,
        }
    }
}

impl GuideAlgorithm for Lowpass {
    fn result(&mut self, raw_error: f64) -> f64 {
        let filtered = match self.history {
            None => raw_error,
            Some(prev) => prev + self.slope_weight * (raw_error - prev),
        };
        self.history = Some(filtered);
        filtered
    }

    fn reset(&mut self) {
        self.history = None;
    }

    fn summary(&self) -> String {
        format!("Lowpass(slope_weight={:.2})", self.slope_weight)
    }
}
